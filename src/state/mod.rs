//! Shared control state: registry, per-magnet controller state, orientation
//! store and the coordinator that owns them.

pub mod types;
pub mod error;
pub mod history;
pub mod registry;
pub mod magnet;
pub mod orientation;
pub mod coordinator;

pub use coordinator::{ControlCoordinator, MagnetSnapshot, StepOutcome};
pub use error::{ConfigError, CoreError, CoreResult};
pub use magnet::{DriveUpdate, DutyRange, MagnetState, Saturation};
pub use registry::{PiGains, Registry, RegistryEntry};
pub use types::*;
