//! counters.rs
//! Live counters shared between the control tasks and whoever reports on them.
//! All fields are plain atomics; nothing here blocks.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::types::{MAGNET_COUNT, MagnetId};

/// Per-magnet transient I/O fault counts.
pub struct FaultCounters {
    adc: Vec<AtomicU64>,
    pwm: Vec<AtomicU64>,
}

impl FaultCounters {
    pub fn new() -> Self {
        Self {
            adc: (0..MAGNET_COUNT).map(|_| AtomicU64::new(0)).collect(),
            pwm: (0..MAGNET_COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Returns the new count for `id`.
    #[inline]
    pub fn record_adc(&self, id: MagnetId) -> u64 {
        self.adc.get(id.index()).map_or(0, |c| c.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Returns the new count for `id`.
    #[inline]
    pub fn record_pwm(&self, id: MagnetId) -> u64 {
        self.pwm.get(id.index()).map_or(0, |c| c.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn adc(&self, id: MagnetId) -> u64 {
        self.adc.get(id.index()).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn pwm(&self, id: MagnetId) -> u64 {
        self.pwm.get(id.index()).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// ADC plus PWM faults for `id`.
    pub fn total(&self, id: MagnetId) -> u64 {
        self.adc(id) + self.pwm(id)
    }

    pub fn total_all(&self) -> u64 {
        self.adc
            .iter()
            .chain(self.pwm.iter())
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for FaultCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Loop-level counters for the fast and slow tasks.
#[derive(Default)]
pub struct LoopCounters {
    pub ticks: AtomicU64,
    pub overruns: AtomicU64,
    pub missed_releases: AtomicU64,
    pub max_tick_ns: AtomicU64,
    pub slow_cycles: AtomicU64,
    pub slow_overruns: AtomicU64,
    pub imu_faults: AtomicU64,
    pub planner_commands: AtomicU64,
}

impl LoopCounters {
    #[inline]
    pub fn record_tick(&self, elapsed_ns: u64, overrun: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.max_tick_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_missed_release(&self) {
        self.missed_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoopCountersSnapshot {
        LoopCountersSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            missed_releases: self.missed_releases.load(Ordering::Relaxed),
            max_tick_ns: self.max_tick_ns.load(Ordering::Relaxed),
            slow_cycles: self.slow_cycles.load(Ordering::Relaxed),
            slow_overruns: self.slow_overruns.load(Ordering::Relaxed),
            imu_faults: self.imu_faults.load(Ordering::Relaxed),
            planner_commands: self.planner_commands.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopCountersSnapshot {
    pub ticks: u64,
    pub overruns: u64,
    pub missed_releases: u64,
    pub max_tick_ns: u64,
    pub slow_cycles: u64,
    pub slow_overruns: u64,
    pub imu_faults: u64,
    pub planner_commands: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_counters_are_per_magnet() {
        let f = FaultCounters::new();
        f.record_adc(MagnetId(3));
        f.record_adc(MagnetId(3));
        f.record_pwm(MagnetId(3));
        f.record_pwm(MagnetId(20));
        f.record_adc(MagnetId(0));

        assert_eq!(f.adc(MagnetId(3)), 2);
        assert_eq!(f.total(MagnetId(3)), 3);
        assert_eq!(f.total(MagnetId(20)), 1);
        assert_eq!(f.total(MagnetId(0)), 0);
        assert_eq!(f.total_all(), 4);
    }

    #[test]
    fn tick_counters_track_max_and_overruns() {
        let c = LoopCounters::default();
        c.record_tick(120_000, false);
        c.record_tick(410_000, true);
        c.record_tick(90_000, false);
        c.record_missed_release();
        let s = c.snapshot();
        assert_eq!(s.ticks, 3);
        assert_eq!(s.overruns, 1);
        assert_eq!(s.missed_releases, 1);
        assert_eq!(s.max_tick_ns, 410_000);
    }
}
