use criterion::{Criterion, criterion_group, criterion_main};
use std::{hint::black_box, sync::Arc, time::Duration};

use magnet_core::control::{CoilModel, ControlLoop, SimulatedCoilBank};
use magnet_core::state::{ControlCommand, ControlCoordinator, MagnetId};
use magnet_core::telemetry::Telemetry;

fn tick_bench(c: &mut Criterion) {
    let coordinator = match ControlCoordinator::with_defaults() {
        Ok(c) => Arc::new(c),
        Err(e) => panic!("default coordinator: {}", e),
    };
    let bank = Arc::new(SimulatedCoilBank::seeded(coordinator.registry(), CoilModel::default(), 42));
    let mut control = ControlLoop::new(
        coordinator.clone(),
        bank.clone(),
        bank,
        Telemetry::new(),
        Duration::from_millis(1),
    );

    c.bench_function("tick_all_idle", |b| b.iter(|| black_box(control.tick())));

    for id in 1..=5 {
        let _ = coordinator.set_control(ControlCommand::new(MagnetId(id), 1.0));
    }
    c.bench_function("tick_five_active", |b| b.iter(|| black_box(control.tick())));
}

criterion_group!(benches, tick_bench);
criterion_main!(benches);
