//! scenarios.rs
//! Bench scenarios that exercise the coils through the public coordinator API
//! while a `ControlLoop` is ticked on the calling thread.
//!
//! Every hold duration is multiplied by `time_scale`, so tests can run a full
//! scenario in milliseconds. Each scenario switches the magnets it turned on
//! back to zero before moving on and ends with every magnet at zero.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use log::info;
use rand::Rng;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::control::{
    loop_driver::ControlLoop,
    peripherals::{AdcSampler, PwmDriver},
};
use crate::state::{
    coordinator::ControlCoordinator,
    error::CoreResult,
    types::{ControlCommand, MagnetId},
};
use crate::telemetry::{LoopStats, p99_us};

pub const FULL_DRIVE: f32 = 255.0;
const SWEEP_HOLD: Duration = Duration::from_secs(1);
const RANDOM_HOLD: Duration = Duration::from_millis(10);
const TIMING_WINDOW: Duration = Duration::from_millis(10);
const TIMING_MAX_MAGNETS: usize = 5;
/// Upper bound on any scaled hold.
const MAX_HOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Each magnet alone at full drive.
    MagnetSweep,
    /// Magnets 1+2, 3+4, … at full drive.
    PairedSweep,
    /// Each magnet alone at a random level.
    RandomSingle,
    /// Pairs at independent random levels.
    RandomPair,
    /// 1..=5 magnets at random levels, tick time measured per count.
    LoopTiming,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::MagnetSweep,
        Scenario::PairedSweep,
        Scenario::RandomSingle,
        Scenario::RandomPair,
        Scenario::LoopTiming,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::MagnetSweep => "magnet-sweep",
            Scenario::PairedSweep => "paired-sweep",
            Scenario::RandomSingle => "random-single",
            Scenario::RandomPair => "random-pair",
            Scenario::LoopTiming => "loop-timing",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.name() == s.trim())
            .ok_or_else(|| format!("unknown scenario {:?}", s))
    }
}

/// One hold period: which magnets were driven, at what level, for how many ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioStep {
    pub commands: Vec<(MagnetId, f32)>,
    pub ticks: u64,
}

/// Tick-time figures for one magnet count in the loop-timing scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingRow {
    pub magnets: usize,
    pub ticks: u64,
    pub mean_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub steps: Vec<ScenarioStep>,
    pub timing: Vec<TimingRow>,
}

impl ScenarioReport {
    pub fn total_ticks(&self) -> u64 {
        self.steps.iter().map(|s| s.ticks).sum()
    }
}

/// Runs `scenario` to completion, ticking `control` at its period.
pub fn run_scenario<A, P, R>(
    scenario: Scenario,
    coordinator: &ControlCoordinator,
    control: &mut ControlLoop<A, P>,
    time_scale: f64,
    rng: &mut R,
) -> CoreResult<ScenarioReport>
where
    A: AdcSampler + 'static,
    P: PwmDriver + 'static,
    R: Rng + ?Sized,
{
    info!("[Scenario] starting {} (time scale {})", scenario, time_scale);
    let ids = coordinator.magnet_ids();
    let mut report = ScenarioReport { scenario, steps: Vec::new(), timing: Vec::new() };

    match scenario {
        Scenario::MagnetSweep => {
            for &id in &ids {
                let step = vec![(id, FULL_DRIVE)];
                report.steps.push(hold(coordinator, control, step, scaled(SWEEP_HOLD, time_scale))?);
            }
        }
        Scenario::PairedSweep => {
            for pair in ids.chunks(2) {
                let step = pair.iter().map(|&id| (id, FULL_DRIVE)).collect();
                report.steps.push(hold(coordinator, control, step, scaled(SWEEP_HOLD, time_scale))?);
            }
        }
        Scenario::RandomSingle => {
            for &id in &ids {
                let step = vec![(id, random_level(rng))];
                report.steps.push(hold(coordinator, control, step, scaled(RANDOM_HOLD, time_scale))?);
            }
        }
        Scenario::RandomPair => {
            for pair in ids.chunks(2) {
                let step = pair.iter().map(|&id| (id, random_level(rng))).collect();
                report.steps.push(hold(coordinator, control, step, scaled(RANDOM_HOLD, time_scale))?);
            }
        }
        Scenario::LoopTiming => {
            let window = scaled(TIMING_WINDOW, time_scale);
            for count in 1..=TIMING_MAX_MAGNETS.min(ids.len()) {
                let step: Vec<(MagnetId, f32)> =
                    ids.iter().take(count).map(|&id| (id, random_level(rng))).collect();
                apply(coordinator, &step)?;
                let samples_us = run_for(control, window);
                release(coordinator, &step)?;

                let mut stats = LoopStats::new();
                for us in &samples_us {
                    stats.record(Duration::from_secs_f64(us / 1e6), false);
                }
                let summary = stats.summary();
                let row = TimingRow {
                    magnets: count,
                    ticks: summary.samples,
                    mean_us: summary.mean_us,
                    p99_us: p99_us(&samples_us),
                    max_us: summary.max_us,
                };
                info!(
                    "[Scenario] magnets: {} | ticks: {} | mean {:.1} µs | p99 {:.1} µs | max {:.1} µs",
                    row.magnets, row.ticks, row.mean_us, row.p99_us, row.max_us
                );
                report.timing.push(row);
                report.steps.push(ScenarioStep { commands: step, ticks: summary.samples });
            }
        }
    }

    coordinator.zero_control();
    control.tick();
    info!("[Scenario] {} finished after {} ticks", scenario, report.total_ticks());
    Ok(report)
}

fn hold<A, P>(
    coordinator: &ControlCoordinator,
    control: &mut ControlLoop<A, P>,
    commands: Vec<(MagnetId, f32)>,
    duration: Duration,
) -> CoreResult<ScenarioStep>
where
    A: AdcSampler + 'static,
    P: PwmDriver + 'static,
{
    apply(coordinator, &commands)?;
    let ticks = run_for(control, duration).len() as u64;
    release(coordinator, &commands)?;
    Ok(ScenarioStep { commands, ticks })
}

fn apply(coordinator: &ControlCoordinator, commands: &[(MagnetId, f32)]) -> CoreResult<()> {
    let batch: Vec<ControlCommand> =
        commands.iter().map(|&(id, v)| ControlCommand::new(id, v)).collect();
    coordinator.set_controls(&batch)
}

fn release(coordinator: &ControlCoordinator, commands: &[(MagnetId, f32)]) -> CoreResult<()> {
    let batch: Vec<ControlCommand> =
        commands.iter().map(|&(id, _)| ControlCommand::zero(id)).collect();
    coordinator.set_controls(&batch)
}

/// Ticks `control` at its period for `duration` (at least once). Returns the
/// elapsed time of each tick in microseconds.
fn run_for<A, P>(control: &mut ControlLoop<A, P>, duration: Duration) -> Vec<f64>
where
    A: AdcSampler + 'static,
    P: PwmDriver + 'static,
{
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let period = control.period();
    let start = Instant::now();
    let end = start.checked_add(duration.min(MAX_HOLD)).unwrap_or(start);
    let mut next_deadline = start;
    let mut samples = Vec::new();

    loop {
        let report = control.tick();
        samples.push(report.elapsed.as_secs_f64() * 1e6);
        next_deadline += period;

        let now = Instant::now();
        if now >= end {
            break;
        }
        if now < next_deadline {
            sleeper.sleep(next_deadline - now);
        } else {
            next_deadline = now;
        }
    }
    samples
}

fn random_level<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    f32::from(rng.random_range(0..=255u8))
}

/// `base * time_scale`, capped at [`MAX_HOLD`]. Negative or NaN factors give zero.
fn scaled(base: Duration, time_scale: f64) -> Duration {
    if time_scale.is_nan() || time_scale <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(base.as_secs_f64() * time_scale)
        .map_or(MAX_HOLD, |d| d.min(MAX_HOLD))
}
