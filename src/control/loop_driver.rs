//! loop_driver.rs
//! Fixed-period fast loop: for every registered magnet, in id order,
//! sample the coil current, run the PI step, and write the PWM duty.
//!
//! - Peripheral calls happen outside every coordinator lock.
//! - An ADC/PWM call that fails, or that takes longer than the I/O budget,
//!   is a transient fault: the magnet is re-driven with its last value that
//!   reached the PWM, and its fault counter is bumped.
//! - The kill latch is read right before each PWM write, so a kill lands
//!   within one tick. A killed or stopped loop writes duty 0 regardless of
//!   the configured duty range.
//! - A magnet whose period is N times the loop period is sampled and stepped
//!   every N ticks; in between its last duty is re-dispatched.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::control::peripherals::{AdcSampler, PeripheralError, PwmDriver};
use crate::state::{
    coordinator::{ControlCoordinator, StepOutcome},
    registry::RegistryEntry,
    types::{CurrentSample, MagnetId},
};
use crate::telemetry::{LoopStats, Telemetry, TelemetryEvent, TimingSummary};

/// Fault reports are logged on the first occurrence and then every this many.
const FAULT_LOG_EVERY: u64 = 1_000;

/// Output for idle, killed and stopped magnets.
pub const OFF_DUTY: u16 = 0;

/// Outcome of one pass over every magnet.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub elapsed: Duration,
    pub overrun: bool,
    pub killed: bool,
    /// Duty written (or attempted) for each magnet, ascending id.
    pub duties: Vec<(MagnetId, u16)>,
    pub adc_faults: u32,
    pub pwm_faults: u32,
}

impl TickReport {
    pub fn duty(&self, id: MagnetId) -> Option<u16> {
        self.duties.iter().find(|(m, _)| *m == id).map(|&(_, d)| d)
    }

    pub fn faults(&self) -> u32 {
        self.adc_faults + self.pwm_faults
    }
}

pub struct ControlLoop<A, P> {
    coordinator: Arc<ControlCoordinator>,
    adc: Arc<A>,
    pwm: Arc<P>,
    telemetry: Telemetry,
    period: Duration,
    io_budget: Duration,
    /// Ticks between updates, indexed by registry position.
    strides: Vec<u64>,
    /// Last duty that reached the PWM, indexed by registry position.
    last_good: Vec<u16>,
    tick: u64,
    kill_seen: bool,
    stats: LoopStats,
}

impl<A, P> ControlLoop<A, P>
where
    A: AdcSampler + 'static,
    P: PwmDriver + 'static,
{
    /// Period is the fastest `dt` in the registry.
    pub fn new(
        coordinator: Arc<ControlCoordinator>,
        adc: Arc<A>,
        pwm: Arc<P>,
        telemetry: Telemetry,
        io_budget: Duration,
    ) -> Self {
        let registry = coordinator.registry();
        let period = registry.fastest_period();
        let strides: Vec<u64> = registry.entries().iter().map(|e| registry.stride(e)).collect();
        let count = strides.len();
        Self {
            coordinator,
            adc,
            pwm,
            telemetry,
            period,
            io_budget,
            strides,
            last_good: vec![OFF_DUTY; count],
            tick: 0,
            kill_seen: false,
            stats: LoopStats::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn timing(&self) -> TimingSummary {
        self.stats.summary()
    }

    /// One pass over every registered magnet. Magnets that are not due this
    /// tick keep their last duty, or get 0 once killed.
    pub fn tick(&mut self) -> TickReport {
        let start = Instant::now();
        self.tick += 1;
        let tick = self.tick;

        let coordinator = Arc::clone(&self.coordinator);
        let entries = coordinator.registry().entries();
        let mut duties = Vec::with_capacity(entries.len());
        let mut adc_faults = 0u32;
        let mut pwm_faults = 0u32;

        for (slot, entry) in entries.iter().enumerate() {
            let fallback = self.last_good.get(slot).copied().unwrap_or(OFF_DUTY);
            let stride = self.strides.get(slot).copied().unwrap_or(1);
            let due = (tick - 1) % stride == 0;

            // ReadSample → Compute
            let computed = if !due {
                fallback
            } else {
                match self.read_current(entry) {
                    Ok(current) => self.compute(entry.id, current, fallback, tick),
                    Err(e) => {
                        adc_faults += 1;
                        let n = self.telemetry.faults.record_adc(entry.id);
                        self.telemetry.record(TelemetryEvent::AdcFault {
                            tick,
                            magnet: entry.id,
                            timed_out: e == PeripheralError::Timeout,
                        });
                        if n == 1 || n % FAULT_LOG_EVERY == 0 {
                            warn!("[FastLoop] {} ADC fault #{}: {}", entry.id, n, e);
                        }
                        fallback
                    }
                }
            };

            // Dispatch
            let duty = if coordinator.is_killed() { OFF_DUTY } else { computed };
            match self.write_duty(entry, duty) {
                Ok(()) => {
                    if let Some(g) = self.last_good.get_mut(slot) {
                        *g = duty;
                    }
                }
                Err(e) => {
                    pwm_faults += 1;
                    let n = self.telemetry.faults.record_pwm(entry.id);
                    self.telemetry.record(TelemetryEvent::PwmFault {
                        tick,
                        magnet: entry.id,
                        timed_out: e == PeripheralError::Timeout,
                    });
                    if n == 1 || n % FAULT_LOG_EVERY == 0 {
                        warn!("[FastLoop] {} PWM fault #{}: {}", entry.id, n, e);
                    }
                }
            }
            duties.push((entry.id, duty));
        }

        let killed = coordinator.is_killed();
        if killed && !self.kill_seen {
            self.kill_seen = true;
            self.telemetry.record(TelemetryEvent::KillObserved { tick });
            warn!("[FastLoop] kill observed at tick {}, outputs forced to {}", tick, OFF_DUTY);
        }

        let elapsed = start.elapsed();
        let overrun = elapsed > self.period;
        self.stats.record(elapsed, overrun);
        self.telemetry.loops.record_tick(elapsed.as_nanos() as u64, overrun);
        if overrun {
            self.telemetry.record(TelemetryEvent::TickOverrun {
                tick,
                elapsed_us: elapsed.as_micros() as u64,
                period_us: self.period.as_micros() as u64,
            });
        }

        TickReport { tick, elapsed, overrun, killed, duties, adc_faults, pwm_faults }
    }

    /// Runs ticks at the loop period until `running` is cleared, then drives
    /// every magnet to 0. A release that is already late when the tick ends
    /// is reported and the schedule re-anchored.
    pub fn run(&mut self, running: &AtomicBool) -> TimingSummary {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now() + self.period;
        info!(
            "[FastLoop] started: {} magnets, period {} µs",
            self.last_good.len(),
            self.period.as_micros()
        );

        while running.load(Ordering::Acquire) {
            self.tick();

            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
                next_deadline += self.period;
            } else {
                self.record_missed_release(now - next_deadline);
                // Re-anchor instead of bursting to catch up.
                next_deadline = now + self.period;
            }
        }

        self.shutdown_outputs();
        let summary = self.timing();
        info!(
            "[FastLoop] stopped after {} ticks: mean {:.1} µs, max {:.1} µs, overruns {}, missed releases {}",
            summary.samples, summary.mean_us, summary.max_us, summary.overruns, summary.missed_releases
        );
        summary
    }

    /// Writes 0 to every magnet. Faults are counted, not retried.
    pub fn shutdown_outputs(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        for (slot, entry) in coordinator.registry().entries().iter().enumerate() {
            match self.pwm.drive(entry.pwm, OFF_DUTY) {
                Ok(()) => {
                    if let Some(g) = self.last_good.get_mut(slot) {
                        *g = OFF_DUTY;
                    }
                }
                Err(e) => {
                    self.telemetry.faults.record_pwm(entry.id);
                    error!("[FastLoop] {} could not be zeroed on shutdown: {}", entry.id, e);
                }
            }
        }
    }

    /// Moves the loop onto a dedicated max-priority thread, optionally pinned
    /// to `core`. The handle yields the final timing summary.
    pub fn spawn(
        mut self,
        running: Arc<AtomicBool>,
        core: Option<usize>,
    ) -> io::Result<JoinHandle<TimingSummary>> {
        thread::Builder::new()
            .name("fast_loop".into())
            .spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    warn!("[FastLoop] running without max priority: {:?}", e);
                }
                if let Some(core) = core {
                    pin_to_core(core);
                }
                self.run(&running)
            })
    }

    /// The release after tick `self.tick` had already passed by `late`.
    fn record_missed_release(&mut self, late: Duration) {
        let tick = self.tick;
        self.stats.record_missed_release();
        self.telemetry.loops.record_missed_release();
        self.telemetry.record(TelemetryEvent::ReleaseMissed { tick, late_us: late.as_micros() as u64 });
        let n = self.stats.summary().missed_releases;
        if n == 1 || n % FAULT_LOG_EVERY == 0 {
            warn!("[FastLoop] release missed after tick {} by {} µs (#{})", tick, late.as_micros(), n);
        }
    }

    fn read_current(&self, entry: &RegistryEntry) -> Result<f32, PeripheralError> {
        let started = Instant::now();
        let current = self.adc.sample(entry.adc)?;
        if started.elapsed() > self.io_budget {
            return Err(PeripheralError::Timeout);
        }
        Ok(current)
    }

    fn write_duty(&self, entry: &RegistryEntry, duty: u16) -> Result<(), PeripheralError> {
        let started = Instant::now();
        self.pwm.drive(entry.pwm, duty)?;
        if started.elapsed() > self.io_budget {
            return Err(PeripheralError::Timeout);
        }
        Ok(())
    }

    fn compute(&self, id: MagnetId, current: f32, fallback: u16, tick: u64) -> u16 {
        match self.coordinator.record_and_update(CurrentSample::new(id, current)) {
            Ok(StepOutcome::Drive(update)) => update.duty,
            Ok(StepOutcome::Idle) => OFF_DUTY,
            Err(e) => {
                self.telemetry.record(TelemetryEvent::ComputeFault { tick, magnet: id });
                debug!("[FastLoop] {} compute skipped: {}", id, e);
                fallback
            }
        }
    }
}

/// Convenience wrapper: build a loop and start it on its own thread.
pub fn spawn_fast_loop<A, P>(
    coordinator: Arc<ControlCoordinator>,
    adc: Arc<A>,
    pwm: Arc<P>,
    telemetry: Telemetry,
    io_budget: Duration,
    running: Arc<AtomicBool>,
    core: Option<usize>,
) -> io::Result<JoinHandle<TimingSummary>>
where
    A: AdcSampler + 'static,
    P: PwmDriver + 'static,
{
    ControlLoop::new(coordinator, adc, pwm, telemetry, io_budget).spawn(running, core)
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) if core_affinity::set_for_current(*core_id) => {
            info!("[FastLoop] pinned to core {}", core);
        }
        Some(_) => error!("[FastLoop] failed to pin to core {}", core),
        None => error!("[FastLoop] core {} not among available cores", core),
    }
}
