//! slow_loop.rs
//! Attitude cadence (≈10 ms): read the IMU, store orientation and angular
//! velocity, ask the planner for commands and push them to the coordinator.
//!
//! The loop is an async task on a tokio interval with `MissedTickBehavior::Skip`.
//! IMU readings can come straight from an `ImuSource` or through a bounded
//! crossbeam channel fed by a separate reader thread (`ChannelImu`).

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::control::{
    peripherals::{ImuReading, ImuSource, PeripheralError},
    planner::{CommandPlanner, PlannerInput},
};
use crate::state::{
    coordinator::ControlCoordinator,
    types::{AngularVelocitySample, OrientationSample},
};
use crate::telemetry::{Telemetry, TelemetryEvent};

const IMU_FAULT_LOG_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub imu_ok: bool,
    /// Commands accepted this cycle; `None` when planning was skipped.
    pub planned: Option<usize>,
    pub overrun: bool,
}

pub struct SlowLoop<I, P> {
    coordinator: Arc<ControlCoordinator>,
    imu: Arc<I>,
    planner: P,
    telemetry: Telemetry,
    period: Duration,
    cycle: u64,
}

impl<I, P> SlowLoop<I, P>
where
    I: ImuSource + 'static,
    P: CommandPlanner + 'static,
{
    pub fn new(
        coordinator: Arc<ControlCoordinator>,
        imu: Arc<I>,
        planner: P,
        telemetry: Telemetry,
        period: Duration,
    ) -> Self {
        Self { coordinator, imu, planner, telemetry, period, cycle: 0 }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One IMU read plus at most one planning step.
    pub fn cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        self.cycle += 1;
        let cycle = self.cycle;

        let imu_ok = match self.imu.read() {
            Ok(reading) => {
                self.store(reading);
                true
            }
            Err(e) => {
                let n = self.telemetry.loops.imu_faults.fetch_add(1, Ordering::Relaxed) + 1;
                self.telemetry.record(TelemetryEvent::ImuFault { cycle });
                if n == 1 || n % IMU_FAULT_LOG_EVERY == 0 {
                    warn!("[SlowLoop] IMU read failed (#{}): {}", n, e);
                }
                false
            }
        };

        let planned = self.plan(cycle);

        self.telemetry.loops.slow_cycles.fetch_add(1, Ordering::Relaxed);
        let elapsed = start.elapsed();
        let overrun = elapsed > self.period;
        if overrun {
            self.telemetry.loops.slow_overruns.fetch_add(1, Ordering::Relaxed);
            self.telemetry.record(TelemetryEvent::SlowLoopOverrun {
                cycle,
                elapsed_us: elapsed.as_micros() as u64,
            });
        }

        CycleReport { cycle, imu_ok, planned, overrun }
    }

    fn store(&self, reading: ImuReading) {
        self.coordinator.set_orientation(OrientationSample::new(reading.orientation));
        self.coordinator
            .set_angular_velocity(AngularVelocitySample::new(reading.angular_velocity));
    }

    fn plan(&mut self, cycle: u64) -> Option<usize> {
        if self.coordinator.is_killed() {
            return None;
        }
        let orientation = match self.coordinator.orientation() {
            Ok(sample) => sample.orientation,
            Err(_) => {
                debug!("[SlowLoop] no orientation yet, planning skipped");
                return None;
            }
        };
        let input = PlannerInput {
            orientation,
            angular_velocity: self.coordinator.angular_velocity().ok().map(|s| s.velocity),
            offset: self.coordinator.offset(),
            ideal_direction: self.coordinator.ideal_direction(),
        };

        let commands = self.planner.plan(&input);
        if commands.is_empty() {
            return Some(0);
        }
        if let Err(e) = self.coordinator.set_controls(&commands) {
            error!("[SlowLoop] planner output rejected: {}", e);
            return Some(0);
        }
        let count = commands.len();
        self.telemetry
            .loops
            .planner_commands
            .fetch_add(count as u64, Ordering::Relaxed);
        self.telemetry.record(TelemetryEvent::PlannerCommands { cycle, count: count as u32 });
        Some(count)
    }

    /// Runs cycles on a tokio interval until `running` is cleared.
    pub async fn run(mut self, running: Arc<AtomicBool>) -> u64 {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("[SlowLoop] started, period {} ms", self.period.as_millis());

        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.cycle();
        }

        info!("[SlowLoop] stopped after {} cycles", self.cycle);
        self.cycle
    }

    /// Runs the loop on its own thread with a current-thread tokio runtime.
    pub fn spawn(self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<u64>> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        thread::Builder::new()
            .name("slow_loop".into())
            .spawn(move || rt.block_on(self.run(running)))
    }
}

// ============================================================================
// Channel-fed IMU
// ============================================================================

/// `ImuSource` backed by a bounded channel. Each read takes the newest
/// queued reading; an empty channel is a timeout.
pub struct ChannelImu {
    rx: Receiver<ImuReading>,
}

impl ChannelImu {
    pub fn new(rx: Receiver<ImuReading>) -> Self {
        Self { rx }
    }
}

impl ImuSource for ChannelImu {
    fn read(&self) -> Result<ImuReading, PeripheralError> {
        let mut newest = None;
        while let Ok(reading) = self.rx.try_recv() {
            newest = Some(reading);
        }
        newest.ok_or(PeripheralError::Timeout)
    }
}

/// Polls `imu` at `period` and forwards readings into `tx`. Readings are
/// dropped when the channel is full; read errors are counted in `telemetry`.
pub fn spawn_imu_reader<I>(
    imu: Arc<I>,
    tx: Sender<ImuReading>,
    period: Duration,
    running: Arc<AtomicBool>,
    telemetry: Telemetry,
) -> io::Result<JoinHandle<()>>
where
    I: ImuSource + 'static,
{
    thread::Builder::new().name("imu_reader".into()).spawn(move || {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now() + period;
        let mut dropped = 0u64;

        while running.load(Ordering::Acquire) {
            match imu.read() {
                Ok(reading) => match tx.try_send(reading) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Disconnected(_)) => break,
                },
                Err(e) => {
                    telemetry.loops.imu_faults.fetch_add(1, Ordering::Relaxed);
                    debug!("[ImuReader] read failed: {}", e);
                }
            }

            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
                next_deadline += period;
            } else {
                next_deadline = now + period;
            }
        }
        info!("[ImuReader] stopped, {} readings dropped on a full channel", dropped);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::peripherals::SimulatedImu;
    use crate::control::planner::{HoldPlanner, IdlePlanner};
    use crate::state::types::{AngularVelocity, MagnetId};

    fn coordinator() -> Arc<ControlCoordinator> {
        Arc::new(ControlCoordinator::with_defaults().unwrap())
    }

    #[test]
    fn cycle_stores_imu_and_forwards_plan() {
        let c = coordinator();
        let imu = Arc::new(SimulatedImu::new(AngularVelocity::new(0.0, 0.0, 1.0)));
        let planner = HoldPlanner::new(vec![(MagnetId(4), 1.25)]);
        let mut slow = SlowLoop::new(c.clone(), imu, planner, Telemetry::new(), Duration::from_millis(10));

        let report = slow.cycle();
        assert!(report.imu_ok);
        assert_eq!(report.planned, Some(1));
        assert_eq!(c.orientation_history(None).len(), 1);
        assert_eq!(c.angular_velocity().unwrap().velocity.z, 1.0);
        assert_eq!(c.latest_control(MagnetId(4)).unwrap().value, 1.25);

        assert_eq!(slow.cycle().planned, Some(0));
    }

    #[test]
    fn no_planning_without_orientation_or_when_killed() {
        let c = coordinator();
        let imu = Arc::new(SimulatedImu::default());
        imu.set_fault_rate(1.0);
        let telemetry = Telemetry::new();
        let mut slow = SlowLoop::new(c.clone(), imu.clone(), IdlePlanner, telemetry.clone(), Duration::from_millis(10));

        let report = slow.cycle();
        assert!(!report.imu_ok);
        assert_eq!(report.planned, None);
        assert_eq!(telemetry.loops.snapshot().imu_faults, 1);

        imu.set_fault_rate(0.0);
        c.kill();
        let report = slow.cycle();
        assert!(report.imu_ok);
        assert_eq!(report.planned, None);
    }

    #[test]
    fn channel_imu_returns_newest_reading() {
        let (tx, rx) = crossbeam::channel::bounded(4);
        let imu = ChannelImu::new(rx);
        assert_eq!(imu.read(), Err(PeripheralError::Timeout));

        for z in [1.0, 2.0, 3.0] {
            tx.send(ImuReading {
                orientation: crate::state::types::Orientation::IDENTITY,
                angular_velocity: AngularVelocity::new(0.0, 0.0, z),
            })
            .unwrap();
        }
        assert_eq!(imu.read().unwrap().angular_velocity.z, 3.0);
        assert_eq!(imu.read(), Err(PeripheralError::Timeout));
    }

    #[test]
    fn async_run_stops_on_flag() {
        let c = coordinator();
        let running = Arc::new(AtomicBool::new(true));
        let slow = SlowLoop::new(
            c.clone(),
            Arc::new(SimulatedImu::default()),
            IdlePlanner,
            Telemetry::new(),
            Duration::from_millis(2),
        );
        let handle = slow.spawn(running.clone()).unwrap();
        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::Relaxed);
        let cycles = handle.join().unwrap();
        assert!(cycles > 0);
        assert!(!c.orientation_history(None).is_empty());
    }
}
