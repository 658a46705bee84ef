//! # Magnet array bench controller
//!
//! Runs the control core against simulated coils and a simulated IMU.
//!
//! ## Modes
//! - **Run controller:** fast loop + slow loop for a fixed duration, one magnet held at a setpoint.
//! - **Kill drill:** same, with the kill latch thrown halfway through.
//! - **Scenario:** one bench scenario (sweep, paired sweep, random, loop timing).
//! - **All scenarios:** every scenario in order.
//!
//! ## Threads
//! - `fast_loop`: max priority, optionally pinned (`FAST_LOOP_CORE`).
//! - `imu_reader` → bounded channel → `slow_loop` (tokio interval).
//! - `telemetry_export`: CSV sink when `TELEMETRY_CSV` is set.

use std::{
    error::Error,
    io::{Write, stdin, stdout},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam::channel::bounded;
use log::{error, info};

use magnet_core::{
    config::RuntimeConfig,
    control::{
        ChannelImu, CoilModel, ControlLoop, HoldPlanner, SimulatedCoilBank, SimulatedImu, SlowLoop,
        spawn_fast_loop, spawn_imu_reader,
    },
    diagnostics::{Scenario, ScenarioReport, run_scenario},
    state::{ControlCoordinator, MagnetId},
    telemetry::Telemetry,
};

type AppResult<T> = Result<T, Box<dyn Error>>;

const DEFAULT_RUN_SECS: u64 = 5;
const IMU_CHANNEL_CAPACITY: usize = 64;
const SIM_NOISE_AMPS: f32 = 0.005;

fn main() {
    env_logger::init();
    info!("=== MAGNET CONTROLLER START ===");
    let cfg = RuntimeConfig::from_env();

    loop {
        let choice = prompt_menu();
        let outcome = match choice.as_str() {
            "1" | "" => {
                let secs = prompt_u64("Run duration in seconds", DEFAULT_RUN_SECS);
                let target = prompt_target();
                run_controller(&cfg, Duration::from_secs(secs), target, false)
            }
            "2" => {
                let secs = prompt_u64("Run duration in seconds", DEFAULT_RUN_SECS);
                let target = prompt_target();
                run_controller(&cfg, Duration::from_secs(secs), target, true)
            }
            "3" => match prompt_scenario() {
                Some(sc) => {
                    let scale = prompt_f64("Time scale", 1.0);
                    run_scenarios(&cfg, &[sc], scale)
                }
                None => continue,
            },
            "4" => {
                let scale = prompt_f64("Time scale", 1.0);
                run_scenarios(&cfg, &Scenario::ALL, scale)
            }
            "5" => {
                println!("Exiting. Goodbye!");
                info!("=== MAGNET CONTROLLER FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                continue;
            }
        };

        match outcome {
            Ok(()) => println!("\n Completed. Returning to menu...\n"),
            Err(e) => error!("run failed: {}", e),
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     MAGNET CONTROLLER                       │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Run controller                          │");
    println!("│  2) Kill drill (kill at half time)          │");
    println!("│  3) Run one scenario                        │");
    println!("│  4) Run all scenarios                       │");
    println!("│  5) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3/4/5] (default: 1): ");
    read_line()
}

fn read_line() -> String {
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_u64(label: &str, default: u64) -> u64 {
    print!("{} [default: {}]: ", label, default);
    read_line().parse().unwrap_or(default)
}

fn prompt_f64(label: &str, default: f64) -> f64 {
    print!("{} [default: {}]: ", label, default);
    read_line().parse().unwrap_or(default)
}

fn prompt_target() -> (MagnetId, f32) {
    print!("Magnet id to hold [default: 1]: ");
    let id = read_line().parse::<u8>().unwrap_or(1);
    print!("Target current in A [default: 1.0]: ");
    let amps = read_line().parse::<f32>().unwrap_or(1.0);
    (MagnetId(id), amps)
}

fn prompt_scenario() -> Option<Scenario> {
    for (i, sc) in Scenario::ALL.iter().enumerate() {
        println!("  {}) {}", i + 1, sc);
    }
    print!("Scenario [1-{}]: ", Scenario::ALL.len());
    let input = read_line();
    let picked = input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| Scenario::ALL.get(i).copied())
        .or_else(|| input.parse().ok());
    if picked.is_none() {
        println!("Unrecognized scenario '{}'.", input);
    }
    picked
}

fn build(cfg: &RuntimeConfig) -> AppResult<(Arc<ControlCoordinator>, Arc<SimulatedCoilBank>)> {
    let rows = cfg.magnet_rows()?;
    let coordinator = Arc::new(ControlCoordinator::from_config(&rows, cfg)?);
    let model = CoilModel { noise_amps: SIM_NOISE_AMPS, ..CoilModel::default() };
    let bank = Arc::new(SimulatedCoilBank::from_registry(coordinator.registry(), model));
    Ok((coordinator, bank))
}

fn start_telemetry(cfg: &RuntimeConfig) -> AppResult<Telemetry> {
    let telemetry = Telemetry::new();
    if let Some(path) = &cfg.telemetry_csv {
        telemetry.recorder.start_exporter(path.clone())?;
        info!("telemetry → {:?}", path);
    }
    Ok(telemetry)
}

/// Fast loop, IMU reader and slow loop running together for `duration`.
fn run_controller(
    cfg: &RuntimeConfig,
    duration: Duration,
    target: (MagnetId, f32),
    kill_midway: bool,
) -> AppResult<()> {
    let (coordinator, bank) = build(cfg)?;
    coordinator.entry(target.0)?;
    let telemetry = start_telemetry(cfg)?;
    let running = Arc::new(AtomicBool::new(true));

    let fast = spawn_fast_loop(
        coordinator.clone(),
        bank.clone(),
        bank.clone(),
        telemetry.clone(),
        cfg.io_budget,
        running.clone(),
        cfg.fast_loop_core,
    )?;

    let (tx_imu, rx_imu) = bounded(IMU_CHANNEL_CAPACITY);
    let reader = spawn_imu_reader(
        Arc::new(SimulatedImu::default()),
        tx_imu,
        cfg.slow_loop_period,
        running.clone(),
        telemetry.clone(),
    )?;
    let slow = SlowLoop::new(
        coordinator.clone(),
        Arc::new(ChannelImu::new(rx_imu)),
        HoldPlanner::new(vec![target]),
        telemetry.clone(),
        cfg.slow_loop_period,
    )
    .spawn(running.clone())?;

    if kill_midway {
        thread::sleep(duration / 2);
        println!("Throwing kill latch...");
        coordinator.kill();
        thread::sleep(duration - duration / 2);
    } else {
        thread::sleep(duration);
    }

    running.store(false, Ordering::Release);
    let timing = fast.join().map_err(|_| "fast loop panicked")?;
    let cycles = slow.join().map_err(|_| "slow loop panicked")?;
    reader.join().map_err(|_| "imu reader panicked")?;
    telemetry.recorder.stop_exporter();

    let counters = telemetry.loops.snapshot();
    println!("\n── Run summary ──────────────────────────────");
    println!(
        " fast loop : {} ticks, mean {:.1} µs, max {:.1} µs, overruns {}, missed releases {}",
        timing.samples, timing.mean_us, timing.max_us, timing.overruns, timing.missed_releases
    );
    println!(
        " slow loop : {} cycles, {} IMU faults, {} planner commands",
        cycles, counters.imu_faults, counters.planner_commands
    );
    println!(
        " faults    : {} total I/O faults, {} telemetry events dropped",
        telemetry.faults.total_all(),
        telemetry.recorder.dropped()
    );
    println!(" killed    : {}", coordinator.is_killed());
    if let Ok(sample) = coordinator.latest_current_value(target.0) {
        println!(
            " {} : last current {:.3} A (target {:.3} A), duty {:?}",
            target.0,
            sample.current,
            target.1,
            bank.duty(target.0)
        );
    }
    Ok(())
}

/// Runs `scenarios` in order on the calling thread.
fn run_scenarios(cfg: &RuntimeConfig, scenarios: &[Scenario], time_scale: f64) -> AppResult<()> {
    let (coordinator, bank) = build(cfg)?;
    let telemetry = start_telemetry(cfg)?;
    let mut control = ControlLoop::new(
        coordinator.clone(),
        bank.clone(),
        bank,
        telemetry.clone(),
        cfg.io_budget,
    );
    let mut rng = rand::rng();

    for &scenario in scenarios {
        let report = run_scenario(scenario, &coordinator, &mut control, time_scale, &mut rng)?;
        print_report(&report);
    }
    telemetry.recorder.stop_exporter();
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!("\n── {} ──", report.scenario);
    for step in &report.steps {
        let cmds: Vec<String> = step
            .commands
            .iter()
            .map(|(id, v)| format!("{}={:.0}", id, v))
            .collect();
        println!(" {:<40} {:>6} ticks", cmds.join(" "), step.ticks);
    }
    for row in &report.timing {
        println!(
            " magnets: {} | ticks: {} | mean {:.1} µs | p99 {:.1} µs | max {:.1} µs",
            row.magnets, row.ticks, row.mean_us, row.p99_us, row.max_us
        );
    }
}
