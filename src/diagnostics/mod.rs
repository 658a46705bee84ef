//! Bench diagnostics driven through the public coordinator API.

pub mod scenarios;

pub use scenarios::{Scenario, ScenarioReport, ScenarioStep, TimingRow, run_scenario};
