//! Error kinds surfaced by the registry and the coordinator.

use thiserror::Error;

use crate::state::types::MagnetId;

/// Startup configuration problems. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("magnet table must contain exactly {expected} entries, found {found}")]
    WrongCount { expected: usize, found: usize },
    #[error("magnet id {0} is outside 1..={max}", max = crate::state::types::MAGNET_COUNT)]
    IdOutOfRange(i64),
    #[error("magnet id {0} appears more than once")]
    DuplicateId(u8),
    #[error("magnet id {id} has non-finite or negative gains (kp={kp}, ki={ki})")]
    InvalidGains { id: u8, kp: f32, ki: f32 },
    #[error("magnet id {id} has invalid loop period {dt_us} us")]
    InvalidPeriod { id: u8, dt_us: u64 },
    #[error("magnet id {id} period {dt_us} us is not a whole multiple of the fast loop period {base_us} us")]
    UnalignedPeriod { id: u8, dt_us: u64, base_us: u64 },
    #[error("duty range {min}..={max} is empty")]
    InvalidDutyRange { min: u16, max: u16 },
    #[error("failed to read magnet table: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse magnet table: {0}")]
    Parse(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("{0} is not registered")]
    MagnetNotFound(MagnetId),
    #[error("no {0} recorded yet")]
    EmptyHistory(&'static str),
    #[error("{0} has not received a control command yet")]
    NoCommandYet(MagnetId),
    #[error("{0} has no current sample since its last command")]
    NoSampleYet(MagnetId),
}

pub type CoreResult<T> = Result<T, CoreError>;
