//! types.rs
//! Plain data carried between the coordinator, the fast loop and the slow loop.
//!
//! Every record is `Copy` so readers always leave a lock holding an owned value.

use std::{fmt, time::Instant};

/// Number of magnets the device carries. The registry must describe exactly this many.
pub const MAGNET_COUNT: usize = 20;

/// Magnet identifier, valid range `1..=MAGNET_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MagnetId(pub u8);

impl MagnetId {
    /// Zero-based slot used to index per-magnet tables.
    #[inline]
    pub fn index(self) -> usize {
        usize::from(self.0).wrapping_sub(1)
    }

    #[inline]
    pub fn is_in_range(self) -> bool {
        (1..=MAGNET_COUNT).contains(&usize::from(self.0))
    }
}

impl fmt::Display for MagnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "magnet#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Attitude quaternion as delivered by the IMU (w, x, y, z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Orientation {
    pub const IDENTITY: Orientation = Orientation::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Body rates in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngularVelocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AngularVelocity {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Current-sense ADC: chip select / device index plus input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdcAddress {
    pub device: u8,
    pub channel: u8,
}

impl AdcAddress {
    pub const fn new(device: u8, channel: u8) -> Self {
        Self { device, channel }
    }
}

/// PWM driver: I2C address of the driver chip plus output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PwmAddress {
    pub device: u8,
    pub channel: u8,
}

impl PwmAddress {
    pub const fn new(device: u8, channel: u8) -> Self {
        Self { device, channel }
    }
}

/// One measured coil current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentSample {
    pub magnet: MagnetId,
    pub current: f32,
    pub timestamp: Instant,
}

impl CurrentSample {
    pub fn new(magnet: MagnetId, current: f32) -> Self {
        Self::at(magnet, current, Instant::now())
    }

    pub fn at(magnet: MagnetId, current: f32, timestamp: Instant) -> Self {
        Self { magnet, current, timestamp }
    }
}

/// Requested coil drive for one magnet. A value of zero is the safe state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCommand {
    pub magnet: MagnetId,
    pub value: f32,
    pub timestamp: Instant,
}

impl ControlCommand {
    pub fn new(magnet: MagnetId, value: f32) -> Self {
        Self::at(magnet, value, Instant::now())
    }

    pub fn at(magnet: MagnetId, value: f32, timestamp: Instant) -> Self {
        Self { magnet, value, timestamp }
    }

    pub fn zero(magnet: MagnetId) -> Self {
        Self::new(magnet, 0.0)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSample {
    pub orientation: Orientation,
    pub timestamp: Instant,
}

impl OrientationSample {
    pub fn new(orientation: Orientation) -> Self {
        Self { orientation, timestamp: Instant::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngularVelocitySample {
    pub velocity: AngularVelocity,
    pub timestamp: Instant,
}

impl AngularVelocitySample {
    pub fn new(velocity: AngularVelocity) -> Self {
        Self { velocity, timestamp: Instant::now() }
    }
}

/// Values with a timestamp can live in a [`History`](crate::state::history::History).
pub trait Timestamped {
    fn timestamp(&self) -> Instant;
    fn set_timestamp(&mut self, ts: Instant);
}

macro_rules! impl_timestamped {
    ($($t:ty),*) => {
        $(
            impl Timestamped for $t {
                #[inline]
                fn timestamp(&self) -> Instant {
                    self.timestamp
                }

                #[inline]
                fn set_timestamp(&mut self, ts: Instant) {
                    self.timestamp = ts;
                }
            }
        )*
    };
}

impl_timestamped!(CurrentSample, ControlCommand, OrientationSample, AngularVelocitySample);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_id_range_and_index() {
        assert!(!MagnetId(0).is_in_range());
        assert!(MagnetId(1).is_in_range());
        assert!(MagnetId(20).is_in_range());
        assert!(!MagnetId(21).is_in_range());
        assert_eq!(MagnetId(1).index(), 0);
        assert_eq!(MagnetId(20).index(), 19);
    }

    #[test]
    fn zero_command_is_zero() {
        assert!(ControlCommand::zero(MagnetId(3)).is_zero());
        assert!(!ControlCommand::new(MagnetId(3), 0.5).is_zero());
    }
}
