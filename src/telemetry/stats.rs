//! stats.rs
//! Streaming tick-time statistics (single writer) and an offline percentile
//! summary used by the loop-timing diagnostic.

use std::time::Duration;

use average::{Estimate, Max, Mean};
use statrs::statistics::{Data, OrderStatistics};

/// Mean / max of tick durations plus overrun and missed-release counts. Owned by the loop
/// that produces the samples; readers get a [`TimingSummary`] copy.
#[derive(Debug, Clone)]
pub struct LoopStats {
    mean_us: Mean,
    max_us: Max,
    overruns: u64,
    missed_releases: u64,
}

impl LoopStats {
    pub fn new() -> Self {
        Self { mean_us: Mean::new(), max_us: Max::new(), overruns: 0, missed_releases: 0 }
    }

    pub fn record(&mut self, elapsed: Duration, overrun: bool) {
        let us = elapsed.as_secs_f64() * 1e6;
        self.mean_us.add(us);
        self.max_us.add(us);
        if overrun {
            self.overruns += 1;
        }
    }

    /// The next tick started after its release time.
    pub fn record_missed_release(&mut self) {
        self.missed_releases += 1;
    }

    pub fn summary(&self) -> TimingSummary {
        let samples = self.mean_us.len();
        TimingSummary {
            samples,
            mean_us: if samples == 0 { 0.0 } else { self.mean_us.mean() },
            max_us: if samples == 0 { 0.0 } else { self.max_us.max() },
            overruns: self.overruns,
            missed_releases: self.missed_releases,
        }
    }
}

impl Default for LoopStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingSummary {
    pub samples: u64,
    pub mean_us: f64,
    pub max_us: f64,
    pub overruns: u64,
    pub missed_releases: u64,
}

/// 99th percentile of `samples_us`. Returns 0 for an empty slice.
pub fn p99_us(samples_us: &[f64]) -> f64 {
    if samples_us.is_empty() {
        return 0.0;
    }
    let mut data = Data::new(samples_us.to_vec());
    data.percentile(99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_are_zero() {
        let s = LoopStats::new().summary();
        assert_eq!(s, TimingSummary::default());
    }

    #[test]
    fn mean_max_and_overruns() {
        let mut s = LoopStats::new();
        s.record(Duration::from_micros(100), false);
        s.record(Duration::from_micros(300), false);
        s.record(Duration::from_micros(500), true);
        s.record_missed_release();
        let sum = s.summary();
        assert_eq!(sum.samples, 3);
        assert!((sum.mean_us - 300.0).abs() < 1e-6);
        assert!((sum.max_us - 500.0).abs() < 1e-6);
        assert_eq!(sum.overruns, 1);
        assert_eq!(sum.missed_releases, 1);
    }

    #[test]
    fn p99_of_uniform_ramp() {
        let ramp: Vec<f64> = (1..=100).map(f64::from).collect();
        let p = p99_us(&ramp);
        assert!(p >= 98.0 && p <= 100.0, "p99 = {}", p);
        assert_eq!(p99_us(&[]), 0.0);
    }
}
