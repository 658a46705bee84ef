//! Control tasks and their hardware seams.
//!
//! - `loop_driver`: fixed-period fast loop (sample → PI → PWM) with the kill latch.
//! - `slow_loop`: IMU ingest and planner cadence on tokio.
//! - `planner`: outer control law seam.
//! - `peripherals`: ADC / PWM / IMU traits and simulated devices.

pub mod loop_driver;
pub mod peripherals;
pub mod planner;
pub mod slow_loop;

pub use loop_driver::{ControlLoop, TickReport, spawn_fast_loop};
pub use peripherals::{
    AdcSampler, CoilModel, FaultPlan, ImuReading, ImuSource, PeripheralError, PwmDriver,
    SimulatedCoilBank, SimulatedImu,
};
pub use planner::{CommandPlanner, HoldPlanner, IdlePlanner, PlannerInput};
pub use slow_loop::{ChannelImu, CycleReport, SlowLoop, spawn_imu_reader};
