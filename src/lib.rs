//! Current control core for a 20-coil magnet array.
//!
//! - `state`: registry, per-magnet PI state, orientation store, coordinator.
//! - `control`: fast loop driver, slow loop, planner seam, peripherals.
//! - `telemetry`: event recorder, counters, loop statistics.
//! - `diagnostics`: bench scenarios.
//! - `config`: magnet table and runtime parameters.

pub mod config;
pub mod control;
pub mod diagnostics;
pub mod state;
pub mod telemetry;
