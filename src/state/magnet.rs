//! magnet.rs
//! Per-magnet controller state and the PI current update.
//!
//! A `MagnetState` is only ever touched through its own lock in the
//! coordinator, so every method here runs with exclusive access. The flush in
//! `accept_control_command` (archive active samples, reset the integral) is a
//! single `&mut self` call and cannot be observed half-done.

use log::trace;

use crate::config::RuntimeConfig;
use crate::state::{
    error::{ConfigError, CoreError, CoreResult},
    history::History,
    registry::PiGains,
    types::{ControlCommand, CurrentSample, MagnetId},
};

/// Which rail the last dispatched output was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Saturation {
    #[default]
    None,
    High,
    Low,
}

/// Output bounds of the PWM stage, in duty counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyRange {
    pub min: u16,
    pub max: u16,
}

impl DutyRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Like [`DutyRange::new`] but rejects `min > max`.
    pub fn checked(min: u16, max: u16) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidDutyRange { min, max });
        }
        Ok(Self::new(min, max))
    }

    /// Saturates `raw` into the range and truncates toward zero.
    /// NaN maps to `min`.
    pub fn clamp(&self, raw: f32) -> (u16, Saturation) {
        let lo = f32::from(self.min);
        let hi = f32::from(self.max);
        if raw.is_nan() || raw <= lo {
            let sat = if raw < lo || raw.is_nan() { Saturation::Low } else { Saturation::None };
            return (self.min, sat);
        }
        if raw >= hi {
            let sat = if raw > hi { Saturation::High } else { Saturation::None };
            return (self.max, sat);
        }
        (raw.trunc() as u16, Saturation::None)
    }
}

impl Default for DutyRange {
    fn default() -> Self {
        Self::new(crate::config::PWM_DUTY_MIN, crate::config::PWM_DUTY_MAX)
    }
}

/// Result of one PI step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveUpdate {
    pub error: f32,
    /// Unbounded controller output `kp * error + integral`.
    pub raw_drive: f32,
    pub integral: f32,
    /// `raw_drive` saturated into the duty range.
    pub duty: u16,
    pub saturation: Saturation,
}

#[derive(Debug, Clone)]
pub struct MagnetState {
    id: MagnetId,
    active: History<CurrentSample>,
    archived: History<CurrentSample>,
    commands: History<ControlCommand>,
    integral: f32,
    saturation: Saturation,
}

impl MagnetState {
    pub fn new(id: MagnetId, cfg: &RuntimeConfig) -> Self {
        Self {
            id,
            active: History::with_capacity(cfg.active_history),
            archived: History::with_capacity(cfg.archive_history),
            commands: History::with_capacity(cfg.command_history),
            integral: 0.0,
            saturation: Saturation::None,
        }
    }

    pub fn id(&self) -> MagnetId {
        self.id
    }

    pub fn record_current_sample(&mut self, sample: CurrentSample) {
        self.active.push(sample);
    }

    /// Appends `command`, then archives the active samples and resets the
    /// integral and the saturation memory.
    pub fn accept_control_command(&mut self, command: ControlCommand) {
        self.commands.push(command);
        self.flush();
    }

    fn flush(&mut self) {
        let moved = self.active.len();
        self.archived.drain_from(&mut self.active);
        self.integral = 0.0;
        self.saturation = Saturation::None;
        trace!("[{}] flushed {} samples", self.id, moved);
    }

    /// One PI step against the newest command and sample.
    ///
    /// Anti-windup is conditional integration: when the previous step was
    /// clamped and `error` pushes further into the same rail, the integral is
    /// held instead of accumulated.
    pub fn compute_drive_update(&mut self, gains: PiGains, dt: f32, range: DutyRange) -> CoreResult<DriveUpdate> {
        let command = self.commands.latest().ok_or(CoreError::NoCommandYet(self.id))?;
        let sample = self.active.latest().ok_or(CoreError::NoSampleYet(self.id))?;

        let error = command.value - sample.current;
        let winding_up = match self.saturation {
            Saturation::High => error > 0.0,
            Saturation::Low => error < 0.0,
            Saturation::None => false,
        };
        if !winding_up {
            self.integral += gains.ki * error * dt;
        }

        let raw_drive = gains.kp * error + self.integral;
        let (duty, saturation) = range.clamp(raw_drive);
        self.saturation = saturation;

        Ok(DriveUpdate {
            error,
            raw_drive,
            integral: self.integral,
            duty,
            saturation,
        })
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn latest_command(&self) -> Option<ControlCommand> {
        self.commands.latest()
    }

    pub fn latest_sample(&self) -> Option<CurrentSample> {
        self.active.latest()
    }

    /// True when the newest command asks for a non-zero drive.
    pub fn is_active(&self) -> bool {
        self.commands.latest().is_some_and(|c| !c.is_zero())
    }

    pub fn current_history(&self, last_n: Option<usize>) -> Vec<CurrentSample> {
        self.active.window(last_n)
    }

    pub fn control_history(&self, last_n: Option<usize>) -> Vec<ControlCommand> {
        self.commands.window(last_n)
    }

    pub fn flushed_history(&self, last_n: Option<usize>) -> Vec<CurrentSample> {
        self.archived.window(last_n)
    }

    /// Samples ever archived, including those evicted from the capped archive.
    pub fn archived_total(&self) -> u64 {
        self.archived.total()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> MagnetState {
        MagnetState::new(MagnetId(1), &RuntimeConfig::default())
    }

    #[test]
    fn command_archives_pending_samples_and_resets_integral() {
        let mut m = state();
        m.accept_control_command(ControlCommand::new(MagnetId(1), 10.0));
        m.record_current_sample(CurrentSample::new(MagnetId(1), 0.0));
        m.compute_drive_update(PiGains::default(), 0.0003, DutyRange::default()).unwrap();
        assert!(m.integral() != 0.0);

        m.record_current_sample(CurrentSample::new(MagnetId(1), 1.0));
        m.record_current_sample(CurrentSample::new(MagnetId(1), 2.0));
        let archived_before = m.archived_total();
        m.accept_control_command(ControlCommand::new(MagnetId(1), 5.0));

        assert_eq!(m.integral(), 0.0);
        assert_eq!(m.active_len(), 0);
        assert_eq!(m.archived_total() - archived_before, 3);
        let tail: Vec<f32> = m.flushed_history(Some(2)).iter().map(|s| s.current).collect();
        assert_eq!(tail, vec![1.0, 2.0]);
    }

    #[test]
    fn two_samples_then_command_archives_exactly_two() {
        let mut m = state();
        m.record_current_sample(CurrentSample::new(MagnetId(1), 1.0));
        m.record_current_sample(CurrentSample::new(MagnetId(1), 2.0));
        m.accept_control_command(ControlCommand::new(MagnetId(1), 3.0));
        assert_eq!(m.archived_total(), 2);
        assert_eq!(m.flushed_history(None).len(), 2);
        assert!(m.current_history(None).is_empty());
        assert_eq!(m.integral(), 0.0);
    }

    #[test]
    fn missing_inputs_are_reported() {
        let mut m = state();
        let err = m.compute_drive_update(PiGains::default(), 0.0003, DutyRange::default()).unwrap_err();
        assert!(matches!(err, CoreError::NoCommandYet(MagnetId(1))));

        m.accept_control_command(ControlCommand::new(MagnetId(1), 1.0));
        let err = m.compute_drive_update(PiGains::default(), 0.0003, DutyRange::default()).unwrap_err();
        assert!(matches!(err, CoreError::NoSampleYet(MagnetId(1))));
    }

    #[test]
    fn reference_step_matches_hand_calculation() {
        let mut m = state();
        m.accept_control_command(ControlCommand::new(MagnetId(1), 255.0));
        m.record_current_sample(CurrentSample::new(MagnetId(1), 0.0));

        let up = m
            .compute_drive_update(PiGains::new(50.0, 15_000.0), 0.0003, DutyRange::default())
            .unwrap();
        assert_eq!(up.error, 255.0);
        assert!((up.integral - 1147.5).abs() < 1e-2, "integral {}", up.integral);
        assert!((up.raw_drive - 13_897.5).abs() < 1e-1, "raw {}", up.raw_drive);
        assert_eq!(up.duty, 255);
        assert_eq!(up.saturation, Saturation::High);
    }

    #[test]
    fn integral_is_held_while_saturated() {
        let mut m = state();
        m.accept_control_command(ControlCommand::new(MagnetId(1), 255.0));
        m.record_current_sample(CurrentSample::new(MagnetId(1), 0.0));
        let first = m.compute_drive_update(PiGains::default(), 0.0003, DutyRange::default()).unwrap();
        m.record_current_sample(CurrentSample::new(MagnetId(1), 0.0));
        let second = m.compute_drive_update(PiGains::default(), 0.0003, DutyRange::default()).unwrap();
        assert_eq!(first.integral, second.integral);

        // error flips sign: integration resumes and unwinds
        m.record_current_sample(CurrentSample::new(MagnetId(1), 300.0));
        let third = m.compute_drive_update(PiGains::default(), 0.0003, DutyRange::default()).unwrap();
        assert!(third.integral < second.integral);
    }

    #[test]
    fn clamp_truncates_and_saturates() {
        let r = DutyRange::new(0, 255);
        assert_eq!(r.clamp(12.9), (12, Saturation::None));
        assert_eq!(r.clamp(-3.0), (0, Saturation::Low));
        assert_eq!(r.clamp(0.0), (0, Saturation::None));
        assert_eq!(r.clamp(255.0), (255, Saturation::None));
        assert_eq!(r.clamp(1e9), (255, Saturation::High));
        assert_eq!(r.clamp(f32::NAN), (0, Saturation::Low));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            DutyRange::checked(200, 100),
            Err(ConfigError::InvalidDutyRange { min: 200, max: 100 })
        ));
        assert_eq!(DutyRange::checked(10, 10).unwrap(), DutyRange::new(10, 10));
    }

    #[test]
    fn zero_command_is_not_active() {
        let mut m = state();
        assert!(!m.is_active());
        m.accept_control_command(ControlCommand::new(MagnetId(1), 4.0));
        assert!(m.is_active());
        m.accept_control_command(ControlCommand::zero(MagnetId(1)));
        assert!(!m.is_active());
    }
}
