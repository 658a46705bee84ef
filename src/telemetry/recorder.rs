//! recorder.rs
//! Best-effort telemetry: bounded lock-free queue → background CSV exporter.
//!
//! - `record()` never blocks. When the queue is full the event is dropped and
//!   counted, so the fast loop is never held up by a slow sink.
//! - The exporter thread drains in batches and flushes every few batches to
//!   keep syscall jitter off the control tasks.

use std::{
    fs::File,
    io::{self, BufWriter},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::state::types::MagnetId;

const TELEMETRY_CAPACITY: usize = 16_384;
const EXPORT_POLL_MS: u64 = 5;
const EXPORT_BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry exporter already running")]
    AlreadyRunning,
    #[error("telemetry export failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    /// A fast-loop tick took longer than its period.
    TickOverrun { tick: u64, elapsed_us: u64, period_us: u64 },
    /// The fast loop woke up after its next release time had already passed.
    ReleaseMissed { tick: u64, late_us: u64 },
    /// ADC read failed or exceeded the I/O budget; last-known-good output reused.
    AdcFault { tick: u64, magnet: MagnetId, timed_out: bool },
    /// PWM write failed or exceeded the I/O budget.
    PwmFault { tick: u64, magnet: MagnetId, timed_out: bool },
    /// PI update could not run for an active magnet.
    ComputeFault { tick: u64, magnet: MagnetId },
    /// First tick that observed the kill latch.
    KillObserved { tick: u64 },
    /// IMU read failed in the slow loop.
    ImuFault { cycle: u64 },
    /// Slow-loop cycle took longer than its period.
    SlowLoopOverrun { cycle: u64, elapsed_us: u64 },
    /// Commands produced by the planner and accepted.
    PlannerCommands { cycle: u64, count: u32 },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::TickOverrun { .. } => "tick_overrun",
            TelemetryEvent::ReleaseMissed { .. } => "release_missed",
            TelemetryEvent::AdcFault { .. } => "adc_fault",
            TelemetryEvent::PwmFault { .. } => "pwm_fault",
            TelemetryEvent::ComputeFault { .. } => "compute_fault",
            TelemetryEvent::KillObserved { .. } => "kill_observed",
            TelemetryEvent::ImuFault { .. } => "imu_fault",
            TelemetryEvent::SlowLoopOverrun { .. } => "slow_loop_overrun",
            TelemetryEvent::PlannerCommands { .. } => "planner_commands",
        }
    }

    fn magnet(&self) -> Option<u8> {
        match self {
            TelemetryEvent::AdcFault { magnet, .. }
            | TelemetryEvent::PwmFault { magnet, .. }
            | TelemetryEvent::ComputeFault { magnet, .. } => Some(magnet.0),
            _ => None,
        }
    }

    /// Cycle index for the slow loop, tick index for the fast loop.
    fn cycle(&self) -> u64 {
        match *self {
            TelemetryEvent::TickOverrun { tick, .. }
            | TelemetryEvent::ReleaseMissed { tick, .. }
            | TelemetryEvent::AdcFault { tick, .. }
            | TelemetryEvent::PwmFault { tick, .. }
            | TelemetryEvent::ComputeFault { tick, .. }
            | TelemetryEvent::KillObserved { tick } => tick,
            TelemetryEvent::ImuFault { cycle }
            | TelemetryEvent::SlowLoopOverrun { cycle, .. }
            | TelemetryEvent::PlannerCommands { cycle, .. } => cycle,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            TelemetryEvent::TickOverrun { elapsed_us, .. }
            | TelemetryEvent::SlowLoopOverrun { elapsed_us, .. } => elapsed_us as f64,
            TelemetryEvent::ReleaseMissed { late_us, .. } => late_us as f64,
            TelemetryEvent::AdcFault { timed_out, .. } | TelemetryEvent::PwmFault { timed_out, .. } => {
                if timed_out { 1.0 } else { 0.0 }
            }
            TelemetryEvent::PlannerCommands { count, .. } => f64::from(count),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TelemetryRecord {
    pub seq: u64,
    pub ts_ns: u64,
    pub event: TelemetryEvent,
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    ts_ns: u64,
    event: &'static str,
    cycle: u64,
    magnet: Option<u8>,
    value: f64,
}

impl From<&TelemetryRecord> for CsvRow {
    fn from(r: &TelemetryRecord) -> Self {
        CsvRow {
            seq: r.seq,
            ts_ns: r.ts_ns,
            event: r.event.name(),
            cycle: r.event.cycle(),
            magnet: r.event.magnet(),
            value: r.event.value(),
        }
    }
}

/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct TelemetryRecorder {
    queue: Arc<ArrayQueue<TelemetryRecord>>,
    dropped: Arc<AtomicU64>,
    seq: Arc<AtomicU64>,
    run_start: Instant,
    running: Arc<AtomicBool>,
    exporter: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::with_capacity(TELEMETRY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            dropped: Arc::new(AtomicU64::new(0)),
            seq: Arc::new(AtomicU64::new(1)),
            run_start: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            exporter: Arc::new(Mutex::new(None)),
        }
    }

    /// Enqueues `event`; drops and counts it when the queue is full.
    #[inline]
    pub fn record(&self, event: TelemetryEvent) {
        let rec = TelemetryRecord {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts_ns: self.now_ns(),
            event,
        };
        if self.queue.push(rec).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pops everything currently queued. Used when no exporter is running.
    pub fn drain(&self) -> Vec<TelemetryRecord> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(rec) = self.queue.pop() {
            out.push(rec);
        }
        out
    }

    /// Spawns the CSV exporter. Fails if one is already running.
    pub fn start_exporter(&self, output_csv: PathBuf) -> Result<(), TelemetryError> {
        let mut guard = self.exporter.lock();
        if guard.is_some() {
            return Err(TelemetryError::AlreadyRunning);
        }

        let file = File::create(&output_csv)?;

        let queue = self.queue.clone();
        let running = self.running.clone();
        let dropped = self.dropped.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("telemetry_export".into())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut batches = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..EXPORT_BATCH {
                        match queue.pop() {
                            Some(rec) => {
                                any = true;
                                if let Err(e) = wtr.serialize(CsvRow::from(&rec)) {
                                    error!("[Telemetry] write failed: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        batches += 1;
                        if batches >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            batches = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(EXPORT_POLL_MS));
                    }
                }

                while let Some(rec) = queue.pop() {
                    wtr.serialize(CsvRow::from(&rec)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "[Telemetry] exporter exiting, dropped={}",
                    dropped.load(Ordering::Relaxed)
                );
            })?;

        *guard = Some(handle);
        Ok(())
    }

    /// Stops the exporter after a final drain. No-op when none is running.
    pub fn stop_exporter(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.exporter.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}
