//! Telemetry for the control tasks.
//!
//! - `recorder`: lock-free event queue with a background CSV exporter.
//! - `counters`: per-magnet fault counters and loop counters (atomics).
//! - `stats`: tick-time mean/max and percentile helpers.

pub mod counters;
pub mod recorder;
pub mod stats;

use std::sync::Arc;

pub use counters::{FaultCounters, LoopCounters, LoopCountersSnapshot};
pub use recorder::{TelemetryError, TelemetryEvent, TelemetryRecord, TelemetryRecorder};
pub use stats::{LoopStats, TimingSummary, p99_us};

/// Handle given to every task that reports: one recorder, one set of counters.
#[derive(Clone, Default)]
pub struct Telemetry {
    pub recorder: TelemetryRecorder,
    pub faults: Arc<FaultCounters>,
    pub loops: Arc<LoopCounters>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, event: TelemetryEvent) {
        self.recorder.record(event);
    }
}
