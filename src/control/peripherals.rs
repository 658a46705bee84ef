//! peripherals.rs
//! Hardware seams used by the control tasks, plus simulated implementations.
//!
//! The fast loop only sees `AdcSampler` and `PwmDriver`; the slow loop only
//! sees `ImuSource`. Implementations must be callable from several threads.

use std::{
    collections::HashMap,
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;

use crate::state::{
    registry::Registry,
    types::{AdcAddress, AngularVelocity, MagnetId, Orientation, PwmAddress},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeripheralError {
    #[error("transient bus failure")]
    Transient,
    #[error("call exceeded its I/O budget")]
    Timeout,
    #[error("no device at the given address")]
    UnknownAddress,
}

/// Current-sense ADC.
pub trait AdcSampler: Send + Sync {
    /// Raw coil current at `address`.
    fn sample(&self, address: AdcAddress) -> Result<f32, PeripheralError>;
}

/// PWM driver chips. `duty` is already clamped by the caller.
pub trait PwmDriver: Send + Sync {
    fn drive(&self, address: PwmAddress, duty: u16) -> Result<(), PeripheralError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    pub orientation: Orientation,
    pub angular_velocity: AngularVelocity,
}

pub trait ImuSource: Send + Sync {
    fn read(&self) -> Result<ImuReading, PeripheralError>;
}

// ============================================================================
// Simulated coil bank
// ============================================================================

/// Electrical model of one simulated coil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoilModel {
    /// Steady-state current per duty count.
    pub amps_per_duty: f32,
    /// First-order time constant of the coil.
    pub tau: Duration,
    /// Peak uniform measurement noise.
    pub noise_amps: f32,
}

impl Default for CoilModel {
    fn default() -> Self {
        Self {
            amps_per_duty: 0.01,
            tau: Duration::from_millis(2),
            noise_amps: 0.0,
        }
    }
}

/// Injected misbehaviour. Rates are probabilities per call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaultPlan {
    pub adc_fault_rate: f64,
    pub pwm_fault_rate: f64,
    pub adc_latency: Duration,
    pub pwm_latency: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Coil {
    duty: u16,
    current: f32,
    updated: Instant,
    writes: u64,
}

impl Coil {
    fn new(now: Instant) -> Self {
        Self { duty: 0, current: 0.0, updated: now, writes: 0 }
    }

    /// Advances the first-order lag toward `duty * amps_per_duty`.
    fn settle(&mut self, model: &CoilModel, now: Instant) {
        let dt = now.saturating_duration_since(self.updated).as_secs_f32();
        let tau = model.tau.as_secs_f32();
        let target = f32::from(self.duty) * model.amps_per_duty;
        let alpha = if tau <= 0.0 { 1.0 } else { 1.0 - (-dt / tau).exp() };
        self.current += (target - self.current) * alpha;
        self.updated = now;
    }
}

/// ADC and PWM for every registered magnet, backed by a coil model.
pub struct SimulatedCoilBank {
    coils: Vec<Mutex<Coil>>,
    by_adc: HashMap<AdcAddress, usize>,
    by_pwm: HashMap<PwmAddress, usize>,
    ids: Vec<MagnetId>,
    model: CoilModel,
    faults: RwLock<FaultPlan>,
    rng: Mutex<StdRng>,
}

impl SimulatedCoilBank {
    pub fn from_registry(registry: &Registry, model: CoilModel) -> Self {
        let now = Instant::now();
        let entries = registry.entries();
        Self {
            coils: entries.iter().map(|_| Mutex::new(Coil::new(now))).collect(),
            by_adc: entries.iter().enumerate().map(|(i, e)| (e.adc, i)).collect(),
            by_pwm: entries.iter().enumerate().map(|(i, e)| (e.pwm, i)).collect(),
            ids: entries.iter().map(|e| e.id).collect(),
            model,
            faults: RwLock::new(FaultPlan::default()),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Same bank with a fixed RNG seed.
    pub fn seeded(registry: &Registry, model: CoilModel, seed: u64) -> Self {
        let bank = Self::from_registry(registry, model);
        *bank.rng.lock() = StdRng::seed_from_u64(seed);
        bank
    }

    pub fn set_fault_plan(&self, plan: FaultPlan) {
        *self.faults.write() = plan;
    }

    pub fn fault_plan(&self) -> FaultPlan {
        *self.faults.read()
    }

    /// Last duty written to `id`, if the magnet exists.
    pub fn duty(&self, id: MagnetId) -> Option<u16> {
        self.slot(id).map(|c| c.lock().duty)
    }

    /// Number of successful PWM writes to `id`.
    pub fn writes(&self, id: MagnetId) -> u64 {
        self.slot(id).map_or(0, |c| c.lock().writes)
    }

    /// Model current of `id` right now, without noise.
    pub fn current(&self, id: MagnetId) -> Option<f32> {
        self.slot(id).map(|c| {
            let mut coil = c.lock();
            coil.settle(&self.model, Instant::now());
            coil.current
        })
    }

    fn slot(&self, id: MagnetId) -> Option<&Mutex<Coil>> {
        let idx = self.ids.iter().position(|m| *m == id)?;
        self.coils.get(idx)
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.lock().random_bool(rate.min(1.0))
    }

    fn noise(&self) -> f32 {
        let n = self.model.noise_amps;
        if n <= 0.0 { 0.0 } else { self.rng.lock().random_range(-n..=n) }
    }
}

impl AdcSampler for SimulatedCoilBank {
    fn sample(&self, address: AdcAddress) -> Result<f32, PeripheralError> {
        let plan = self.fault_plan();
        if !plan.adc_latency.is_zero() {
            thread::sleep(plan.adc_latency);
        }
        if self.roll(plan.adc_fault_rate) {
            return Err(PeripheralError::Transient);
        }
        let idx = *self.by_adc.get(&address).ok_or(PeripheralError::UnknownAddress)?;
        let coil = self.coils.get(idx).ok_or(PeripheralError::UnknownAddress)?;
        let current = {
            let mut c = coil.lock();
            c.settle(&self.model, Instant::now());
            c.current
        };
        Ok(current + self.noise())
    }
}

impl PwmDriver for SimulatedCoilBank {
    fn drive(&self, address: PwmAddress, duty: u16) -> Result<(), PeripheralError> {
        let plan = self.fault_plan();
        if !plan.pwm_latency.is_zero() {
            thread::sleep(plan.pwm_latency);
        }
        if self.roll(plan.pwm_fault_rate) {
            return Err(PeripheralError::Transient);
        }
        let idx = *self.by_pwm.get(&address).ok_or(PeripheralError::UnknownAddress)?;
        let coil = self.coils.get(idx).ok_or(PeripheralError::UnknownAddress)?;
        let mut c = coil.lock();
        c.settle(&self.model, Instant::now());
        c.duty = duty;
        c.writes += 1;
        Ok(())
    }
}

// ============================================================================
// Simulated IMU
// ============================================================================

/// Body spinning at a constant rate about one axis.
pub struct SimulatedImu {
    start: Instant,
    rate: AngularVelocity,
    fault_rate: RwLock<f64>,
}

impl SimulatedImu {
    pub fn new(rate: AngularVelocity) -> Self {
        Self { start: Instant::now(), rate, fault_rate: RwLock::new(0.0) }
    }

    pub fn set_fault_rate(&self, rate: f64) {
        *self.fault_rate.write() = rate.clamp(0.0, 1.0);
    }
}

impl Default for SimulatedImu {
    fn default() -> Self {
        Self::new(AngularVelocity::new(0.0, 0.0, 0.5))
    }
}

impl ImuSource for SimulatedImu {
    fn read(&self) -> Result<ImuReading, PeripheralError> {
        let rate = *self.fault_rate.read();
        if rate > 0.0 && rand::rng().random_bool(rate) {
            return Err(PeripheralError::Transient);
        }

        let t = self.start.elapsed().as_secs_f32();
        let (wx, wy, wz) = (self.rate.x, self.rate.y, self.rate.z);
        let w = (wx * wx + wy * wy + wz * wz).sqrt();
        let orientation = if w <= f32::EPSILON {
            Orientation::IDENTITY
        } else {
            let half = 0.5 * w * t;
            let s = half.sin() / w;
            Orientation::new(half.cos(), wx * s, wy * s, wz * s)
        };
        Ok(ImuReading { orientation, angular_velocity: self.rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_magnet_table;

    fn bank() -> SimulatedCoilBank {
        let registry = Registry::from_config(&default_magnet_table()).unwrap();
        SimulatedCoilBank::seeded(&registry, CoilModel::default(), 7)
    }

    #[test]
    fn current_follows_duty() {
        let bank = bank();
        let pwm = PwmAddress::new(0x40, 0);
        let adc = AdcAddress::new(0, 0);
        assert_eq!(bank.sample(adc).unwrap(), 0.0);

        bank.drive(pwm, 200).unwrap();
        thread::sleep(Duration::from_millis(20));
        let i = bank.sample(adc).unwrap();
        assert!((i - 2.0).abs() < 0.05, "settled current {}", i);
        assert_eq!(bank.duty(MagnetId(1)), Some(200));
        assert_eq!(bank.writes(MagnetId(1)), 1);
    }

    #[test]
    fn unknown_address_is_rejected() {
        let bank = bank();
        assert_eq!(bank.sample(AdcAddress::new(9, 9)), Err(PeripheralError::UnknownAddress));
        assert_eq!(bank.drive(PwmAddress::new(0x7f, 0), 1), Err(PeripheralError::UnknownAddress));
    }

    #[test]
    fn certain_fault_always_fails() {
        let bank = bank();
        bank.set_fault_plan(FaultPlan { adc_fault_rate: 1.0, pwm_fault_rate: 1.0, ..FaultPlan::default() });
        assert_eq!(bank.sample(AdcAddress::new(0, 0)), Err(PeripheralError::Transient));
        assert_eq!(bank.drive(PwmAddress::new(0x40, 0), 5), Err(PeripheralError::Transient));
        assert_eq!(bank.duty(MagnetId(1)), Some(0));
    }

    #[test]
    fn imu_quaternion_stays_normalised() {
        let imu = SimulatedImu::new(AngularVelocity::new(0.0, 0.0, 3.0));
        thread::sleep(Duration::from_millis(5));
        let q = imu.read().unwrap().orientation;
        let n = (q.w * q.w + q.x * q.x + q.y * q.y + q.z * q.z).sqrt();
        assert!((n - 1.0).abs() < 1e-4);
        assert_eq!(q.x, 0.0);
    }
}
