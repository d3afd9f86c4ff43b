//! Storing and loading PID config and profiles as versioned byte records.
//!
//! The backend (internal flash, external flash, EEPROM emulation, RAM for tests) implements
//! `ConfigStore`. Records are keyed by a schema id and slot, and carry a layout version.
//! Layouts only ever have fields appended, so an older record is migrated by decoding it
//! over the current defaults.

use core::fmt;

#[cfg(feature = "defmt")]
use defmt::Format;

use num_enum::TryFromPrimitive; // Enum from integer

use crate::{
    log_macros::{debug, info, warn},
    profile::{PidConfig, PidProfile, PidProfiles, PID_PROFILE_COUNT, PID_PROFILE_SIZE},
};

pub const PID_PROFILE_VERSION: u8 = 3;
pub const PID_CONFIG_VERSION: u8 = 2;

/// Largest record any schema produces.
pub const MAX_RECORD_SIZE: usize = PID_PROFILE_SIZE;

#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConfigError {
    /// A buffer was too short for the record it should hold.
    BufferTooSmall,
    /// A stored enum field has no matching variant.
    InvalidEnum { field: &'static str },
    OutOfRange { field: &'static str },
    /// A profile slot index was not below `PID_PROFILE_COUNT`.
    ProfileIndex,
    /// The stored record is newer than this firmware understands.
    UnsupportedVersion,
    NotFound,
    StoreFull,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small for record"),
            Self::InvalidEnum { field } => write!(f, "invalid enum value in `{}`", field),
            Self::OutOfRange { field } => write!(f, "`{}` out of range", field),
            Self::ProfileIndex => write!(f, "profile index out of range"),
            Self::UnsupportedVersion => write!(f, "unsupported record version"),
            Self::NotFound => write!(f, "record not found"),
            Self::StoreFull => write!(f, "config store full"),
        }
    }
}

/// Identifies the layout of a stored record.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SchemaId {
    PidConfig = 0,
    PidProfile = 1,
}

impl SchemaId {
    pub fn current_version(self) -> u8 {
        match self {
            Self::PidConfig => PID_CONFIG_VERSION,
            Self::PidProfile => PID_PROFILE_VERSION,
        }
    }
}

/// A backend that persists versioned byte records.
pub trait ConfigStore {
    /// Write a record, replacing any existing one with the same schema and slot.
    fn save(&mut self, schema: SchemaId, slot: u8, version: u8, data: &[u8])
        -> Result<(), ConfigError>;

    /// Read a record into `buf`. Returns its version and length.
    fn load(&self, schema: SchemaId, slot: u8, buf: &mut [u8]) -> Result<(u8, usize), ConfigError>;
}

#[derive(Clone, Copy)]
struct Record {
    schema: SchemaId,
    slot: u8,
    version: u8,
    len: usize,
    data: [u8; MAX_RECORD_SIZE],
}

/// Fixed-capacity store in RAM. Useful for tests, and as a write-back cache in front of flash.
pub struct RamConfigStore<const N: usize> {
    records: [Option<Record>; N],
}

impl<const N: usize> Default for RamConfigStore<N> {
    fn default() -> Self {
        Self { records: [None; N] }
    }
}

impl<const N: usize> RamConfigStore<N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, schema: SchemaId, slot: u8) -> Option<usize> {
        self.records.iter().position(|r| match r {
            Some(r) => r.schema == schema && r.slot == slot,
            None => false,
        })
    }
}

impl<const N: usize> ConfigStore for RamConfigStore<N> {
    fn save(
        &mut self,
        schema: SchemaId,
        slot: u8,
        version: u8,
        data: &[u8],
    ) -> Result<(), ConfigError> {
        if data.len() > MAX_RECORD_SIZE {
            return Err(ConfigError::BufferTooSmall);
        }

        let i = match self.find(schema, slot) {
            Some(i) => i,
            None => self
                .records
                .iter()
                .position(|r| r.is_none())
                .ok_or(ConfigError::StoreFull)?,
        };

        let mut record = Record {
            schema,
            slot,
            version,
            len: data.len(),
            data: [0; MAX_RECORD_SIZE],
        };
        record.data[..data.len()].clone_from_slice(data);
        self.records[i] = Some(record);

        Ok(())
    }

    fn load(&self, schema: SchemaId, slot: u8, buf: &mut [u8]) -> Result<(u8, usize), ConfigError> {
        let i = self.find(schema, slot).ok_or(ConfigError::NotFound)?;
        let record = match &self.records[i] {
            Some(r) => r,
            None => return Err(ConfigError::NotFound),
        };

        if buf.len() < record.len {
            return Err(ConfigError::BufferTooSmall);
        }
        buf[..record.len].clone_from_slice(&record.data[..record.len]);

        Ok((record.version, record.len))
    }
}

/// Bring a stored record up to the current layout. `defaults` is the current-layout
/// encoding of the default value; a shorter, older record overwrites its leading bytes.
fn migrate<const S: usize>(
    schema: SchemaId,
    version: u8,
    stored: &[u8],
    defaults: [u8; S],
) -> Result<[u8; S], ConfigError> {
    let current = schema.current_version();

    if version > current {
        warn!("Stored config record is newer than supported; ignoring it");
        return Err(ConfigError::UnsupportedVersion);
    }
    if version == current && stored.len() < S {
        return Err(ConfigError::BufferTooSmall);
    }

    let mut result = defaults;
    let len = stored.len().min(S);
    result[..len].clone_from_slice(&stored[..len]);

    if version < current {
        info!(
            "Migrated config record from version {} to {}",
            version, current
        );
    }
    Ok(result)
}

pub fn save_profile(
    store: &mut impl ConfigStore,
    slot: usize,
    profile: &PidProfile,
) -> Result<(), ConfigError> {
    if slot >= PID_PROFILE_COUNT {
        return Err(ConfigError::ProfileIndex);
    }
    store.save(
        SchemaId::PidProfile,
        slot as u8,
        PID_PROFILE_VERSION,
        &profile.to_bytes(),
    )
}

/// Load, migrate and validate one profile.
pub fn load_profile(store: &impl ConfigStore, slot: usize) -> Result<PidProfile, ConfigError> {
    if slot >= PID_PROFILE_COUNT {
        return Err(ConfigError::ProfileIndex);
    }
    let mut buf = [0; MAX_RECORD_SIZE];
    let (version, len) = store.load(SchemaId::PidProfile, slot as u8, &mut buf)?;

    let bytes = migrate(
        SchemaId::PidProfile,
        version,
        &buf[..len],
        PidProfile::default().to_bytes(),
    )?;
    let result = PidProfile::from_bytes(&bytes)?;
    result.validate()?;

    Ok(result)
}

pub fn save_profiles(store: &mut impl ConfigStore, profiles: &PidProfiles) -> Result<(), ConfigError> {
    for (slot, profile) in profiles.all().iter().enumerate() {
        save_profile(store, slot, profile)?;
    }
    Ok(())
}

/// Load every profile slot. Slots with no record keep their defaults; any other error aborts.
pub fn load_profiles(store: &impl ConfigStore) -> Result<PidProfiles, ConfigError> {
    let mut result = PidProfiles::default();

    for slot in 0..PID_PROFILE_COUNT {
        match load_profile(store, slot) {
            Ok(p) => {
                if let Some(dest) = result.get_mut(slot) {
                    *dest = p;
                }
            }
            Err(ConfigError::NotFound) => debug!("No stored PID profile {}; using defaults", slot),
            Err(e) => return Err(e),
        }
    }
    Ok(result)
}

pub fn save_pid_config(store: &mut impl ConfigStore, cfg: &PidConfig) -> Result<(), ConfigError> {
    store.save(SchemaId::PidConfig, 0, PID_CONFIG_VERSION, &cfg.to_bytes())
}

pub fn load_pid_config(store: &impl ConfigStore) -> Result<PidConfig, ConfigError> {
    let mut buf = [0; MAX_RECORD_SIZE];
    let (version, len) = store.load(SchemaId::PidConfig, 0, &mut buf)?;

    let bytes = migrate(
        SchemaId::PidConfig,
        version,
        &buf[..len],
        PidConfig::default().to_bytes(),
    )?;
    let result = PidConfig::from_bytes(&bytes)?;
    result.validate()?;

    Ok(result)
}
