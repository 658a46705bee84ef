/*
Measures coordinator lock contention: one thread plays the fast loop
(record_and_update on every magnet) while N threads hammer set_control,
either on distinct magnets or all on the same one.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::{
    hint::black_box,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use magnet_core::state::{ControlCommand, ControlCoordinator, CurrentSample, MagnetId};

fn spawn_writers(
    coordinator: &Arc<ControlCoordinator>,
    writers: u8,
    same_magnet: bool,
    running: &Arc<AtomicBool>,
) -> Vec<thread::JoinHandle<()>> {
    (0..writers)
        .map(|w| {
            let c = coordinator.clone();
            let running = running.clone();
            let id = if same_magnet { MagnetId(1) } else { MagnetId(w % 20 + 1) };
            thread::spawn(move || {
                let mut v = 0.0f32;
                while running.load(Ordering::Relaxed) {
                    v = (v + 0.1) % 2.0;
                    let _ = c.set_control(ControlCommand::new(id, v + 0.1));
                }
            })
        })
        .collect()
}

fn contention_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("fast_loop_pass_under_writers");

    for &(writers, same) in &[(0u8, false), (4, false), (4, true), (8, false)] {
        let label = format!("{}w_{}", writers, if same { "same" } else { "distinct" });
        group.bench_with_input(BenchmarkId::from_parameter(label), &writers, |b, &writers| {
            let coordinator = match ControlCoordinator::with_defaults() {
                Ok(c) => Arc::new(c),
                Err(e) => panic!("default coordinator: {}", e),
            };
            let running = Arc::new(AtomicBool::new(true));
            let handles = spawn_writers(&coordinator, writers, same, &running);
            let ids = coordinator.magnet_ids();

            b.iter(|| {
                for &id in &ids {
                    let _ = black_box(coordinator.record_and_update(CurrentSample::new(id, 0.5)));
                }
            });

            running.store(false, Ordering::Relaxed);
            for h in handles {
                let _ = h.join();
            }
        });
    }
    group.finish();
}

criterion_group!(benches, contention_bench);
criterion_main!(benches);
