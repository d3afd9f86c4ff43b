//! Contains misc and utility functions.

/// Clamp a value in place. Used on accumulators and output sums.
pub fn clamp(val: &mut f32, range: (f32, f32)) {
    if *val < range.0 {
        *val = range.0;
    } else if *val > range.1 {
        *val = range.1;
    }
}

/// Clamp to a symmetric range about 0. Limits with a negative magnitude are treated as 0.
/// NaN maps to 0.
pub fn constrain_abs(val: f32, limit: f32) -> f32 {
    if val.is_nan() {
        return 0.;
    }
    let limit = limit.max(0.);
    val.clamp(-limit, limit)
}

/// Utility function to linearly map an input value to an output
pub fn map_linear(val: f32, range_in: (f32, f32), range_out: (f32, f32)) -> f32 {
    let portion = (val - range_in.0) / (range_in.1 - range_in.0);

    portion * (range_out.1 - range_out.0) + range_out.0
}

/// Elapsed microseconds between two readings of a free-running `u32` µs counter. Handles wraparound.
pub fn elapsed_us(now_us: u32, since_us: u32) -> u32 {
    now_us.wrapping_sub(since_us)
}

/// A percentage from a config byte, as a fraction.
pub fn pct(val: u8) -> f32 {
    val as f32 / 100.
}
