//! coordinator.rs
//! Shared-state façade used by every task: fast loop, slow loop, diagnostics.
//!
//! Locking layout
//! - Registry: immutable, read without locks.
//! - One `parking_lot::Mutex<MagnetState>` per magnet. Operations on different
//!   magnets never touch the same lock.
//! - Orientation histories, offset, ideal direction and the kill latch are
//!   guarded independently inside [`OrientationStore`].
//!
//! No method here performs peripheral I/O, so no lock is ever held across a
//! bus transaction. Every read returns an owned copy.

use log::{info, warn};
use parking_lot::Mutex;

use crate::config::{MagnetConfig, RuntimeConfig};
use crate::state::{
    error::{CoreError, CoreResult},
    magnet::{DriveUpdate, DutyRange, MagnetState},
    orientation::OrientationStore,
    registry::{Registry, RegistryEntry},
    types::{
        AdcAddress, AngularVelocitySample, ControlCommand, CurrentSample, MagnetId, Orientation,
        OrientationSample, PwmAddress, Vector3,
    },
};

/// What the fast loop should do for one magnet after recording its sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// No command yet, or the latest command is zero.
    Idle,
    Drive(DriveUpdate),
}

/// Consistent view of one magnet, taken under a single lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetSnapshot {
    pub id: MagnetId,
    pub active_samples: usize,
    pub archived_total: u64,
    pub integral: f32,
    pub latest_command: Option<ControlCommand>,
}

pub struct ControlCoordinator {
    registry: Registry,
    magnets: Vec<Mutex<MagnetState>>,
    orientation: OrientationStore,
    duty_range: DutyRange,
}

impl ControlCoordinator {
    /// Builds the coordinator around an already validated registry.
    /// Fails when the configured duty range is empty.
    pub fn new(registry: Registry, cfg: &RuntimeConfig) -> CoreResult<Self> {
        let duty_range = DutyRange::checked(cfg.duty_min, cfg.duty_max)?;
        let magnets = registry
            .ids()
            .map(|id| Mutex::new(MagnetState::new(id, cfg)))
            .collect();
        info!("[Coordinator] {} magnets registered", registry.len());
        Ok(Self {
            registry,
            magnets,
            orientation: OrientationStore::new(cfg.orientation_history),
            duty_range,
        })
    }

    /// Validates `rows` and builds the coordinator. Nothing is returned on a bad table.
    pub fn from_config(rows: &[MagnetConfig], cfg: &RuntimeConfig) -> CoreResult<Self> {
        let registry = Registry::from_config(rows)?;
        Self::new(registry, cfg)
    }

    /// Built-in magnet layout with default runtime parameters.
    pub fn with_defaults() -> CoreResult<Self> {
        Self::from_config(&crate::config::default_magnet_table(), &RuntimeConfig::default())
    }

    // ========================================================================
    // Registry lookups
    // ========================================================================

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn magnet_ids(&self) -> Vec<MagnetId> {
        self.registry.ids().collect()
    }

    pub fn entry(&self, id: MagnetId) -> CoreResult<&RegistryEntry> {
        self.registry.get(id).ok_or(CoreError::MagnetNotFound(id))
    }

    pub fn pwm_address(&self, id: MagnetId) -> CoreResult<PwmAddress> {
        Ok(self.entry(id)?.pwm)
    }

    pub fn adc_address(&self, id: MagnetId) -> CoreResult<AdcAddress> {
        Ok(self.entry(id)?.adc)
    }

    pub fn duty_range(&self) -> DutyRange {
        self.duty_range
    }

    fn slot(&self, id: MagnetId) -> CoreResult<&Mutex<MagnetState>> {
        self.entry(id)?;
        self.magnets.get(id.index()).ok_or(CoreError::MagnetNotFound(id))
    }

    // ========================================================================
    // Orientation / angular velocity
    // ========================================================================

    pub fn orientation(&self) -> CoreResult<OrientationSample> {
        self.orientation.orientation()
    }

    pub fn set_orientation(&self, sample: OrientationSample) {
        self.orientation.set_orientation(sample);
    }

    pub fn orientation_history(&self, last_n: Option<usize>) -> Vec<OrientationSample> {
        self.orientation.orientation_history(last_n)
    }

    pub fn reset_orientation(&self) {
        self.orientation.reset_orientation();
    }

    pub fn angular_velocity(&self) -> CoreResult<AngularVelocitySample> {
        self.orientation.angular_velocity()
    }

    pub fn set_angular_velocity(&self, sample: AngularVelocitySample) {
        self.orientation.set_angular_velocity(sample);
    }

    pub fn angular_velocity_history(&self, last_n: Option<usize>) -> Vec<AngularVelocitySample> {
        self.orientation.angular_velocity_history(last_n)
    }

    pub fn reset_angular_velocity(&self) {
        self.orientation.reset_angular_velocity();
    }

    pub fn offset(&self) -> Orientation {
        self.orientation.offset()
    }

    pub fn set_offset(&self, value: Orientation) {
        self.orientation.set_offset(value);
    }

    pub fn ideal_direction(&self) -> Vector3 {
        self.orientation.ideal_direction()
    }

    pub fn set_ideal_direction(&self, value: Vector3) {
        self.orientation.set_ideal_direction(value);
    }

    // ========================================================================
    // Control commands
    // ========================================================================

    /// Latest command of every magnet whose latest command is non-zero, by id.
    pub fn latest_controls(&self) -> Vec<ControlCommand> {
        self.magnets
            .iter()
            .filter_map(|m| m.lock().latest_command())
            .filter(|c| !c.is_zero())
            .collect()
    }

    pub fn latest_control(&self, id: MagnetId) -> CoreResult<ControlCommand> {
        self.slot(id)?
            .lock()
            .latest_command()
            .ok_or(CoreError::EmptyHistory("control command"))
    }

    pub fn control_history(&self, id: MagnetId, last_n: Option<usize>) -> CoreResult<Vec<ControlCommand>> {
        Ok(self.slot(id)?.lock().control_history(last_n))
    }

    /// Accepts `command`: appends it, archives pending samples, resets the integral.
    /// After `kill()` a non-zero command is replaced by the zero command.
    pub fn set_control(&self, command: ControlCommand) -> CoreResult<()> {
        let slot = self.slot(command.magnet)?;
        // Latch is read under the magnet lock so a command cannot slip in
        // behind the zero broadcast of a concurrent kill().
        let coerced = {
            let mut m = slot.lock();
            let (command, coerced) = self.gate(command);
            m.accept_control_command(command);
            coerced
        };
        if coerced {
            warn!(
                "[Coordinator] killed: {} command {:.1} replaced by zero",
                command.magnet, command.value
            );
        }
        Ok(())
    }

    /// Batch form. Every id is checked before any command is applied.
    pub fn set_controls(&self, commands: &[ControlCommand]) -> CoreResult<()> {
        if let Some(bad) = commands.iter().find(|c| self.registry.get(c.magnet).is_none()) {
            return Err(CoreError::MagnetNotFound(bad.magnet));
        }
        for command in commands {
            self.set_control(*command)?;
        }
        Ok(())
    }

    /// Sends the zero command to every registered magnet.
    pub fn zero_control(&self) {
        for slot in &self.magnets {
            let mut m = slot.lock();
            let id = m.id();
            m.accept_control_command(ControlCommand::zero(id));
        }
    }

    fn gate(&self, command: ControlCommand) -> (ControlCommand, bool) {
        if self.orientation.is_killed() && !command.is_zero() {
            return (ControlCommand::at(command.magnet, 0.0, command.timestamp), true);
        }
        (command, false)
    }

    // ========================================================================
    // Current samples
    // ========================================================================

    pub fn record_current_sample(&self, sample: CurrentSample) -> CoreResult<()> {
        self.slot(sample.magnet)?.lock().record_current_sample(sample);
        Ok(())
    }

    pub fn current_values(&self, id: MagnetId, last_n: Option<usize>) -> CoreResult<Vec<CurrentSample>> {
        Ok(self.slot(id)?.lock().current_history(last_n))
    }

    /// Active histories of all magnets, ascending id. Each magnet is read under
    /// its own lock; the result is not a cross-magnet snapshot.
    pub fn all_current_values(&self, last_n: Option<usize>) -> Vec<(MagnetId, Vec<CurrentSample>)> {
        self.magnets
            .iter()
            .map(|slot| {
                let m = slot.lock();
                (m.id(), m.current_history(last_n))
            })
            .collect()
    }

    pub fn latest_current_value(&self, id: MagnetId) -> CoreResult<CurrentSample> {
        self.slot(id)?
            .lock()
            .latest_sample()
            .ok_or(CoreError::EmptyHistory("current sample"))
    }

    pub fn flushed_current_values(&self, id: MagnetId, last_n: Option<usize>) -> CoreResult<Vec<CurrentSample>> {
        Ok(self.slot(id)?.lock().flushed_history(last_n))
    }

    pub fn snapshot(&self, id: MagnetId) -> CoreResult<MagnetSnapshot> {
        let m = self.slot(id)?.lock();
        Ok(MagnetSnapshot {
            id,
            active_samples: m.active_len(),
            archived_total: m.archived_total(),
            integral: m.integral(),
            latest_command: m.latest_command(),
        })
    }

    /// Fast-loop step for one magnet: record `sample`, then run the PI update
    /// if the magnet is actively commanded. Both happen in one critical
    /// section so a concurrent flush lands either before or after the step.
    pub fn record_and_update(&self, sample: CurrentSample) -> CoreResult<StepOutcome> {
        let entry = self.entry(sample.magnet)?;
        let slot = self.slot(sample.magnet)?;
        let mut m = slot.lock();
        m.record_current_sample(sample);
        if !m.is_active() {
            return Ok(StepOutcome::Idle);
        }
        let update = m.compute_drive_update(entry.gains, entry.dt(), self.duty_range)?;
        Ok(StepOutcome::Drive(update))
    }

    // ========================================================================
    // Safety latch
    // ========================================================================

    /// Latches the safe state and zeroes every magnet. Never cleared.
    pub fn kill(&self) {
        if self.orientation.kill() {
            self.zero_control();
        }
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.orientation.is_killed()
    }
}
