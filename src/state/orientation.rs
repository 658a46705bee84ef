//! orientation.rs
//! IMU-side shared state: orientation and angular-velocity histories, the
//! calibration offset, the ideal direction and the kill latch.
//!
//! Each field has its own guard so the slow loop appending IMU samples never
//! contends with the fast loop reading the kill latch.

use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use parking_lot::{Mutex, RwLock};

use crate::state::{
    error::{CoreError, CoreResult},
    history::History,
    types::{AngularVelocity, AngularVelocitySample, Orientation, OrientationSample, Vector3},
};

pub struct OrientationStore {
    orientation: Mutex<History<OrientationSample>>,
    angular_velocity: Mutex<History<AngularVelocitySample>>,
    offset: RwLock<Orientation>,
    ideal_direction: RwLock<Vector3>,
    killed: AtomicBool,
}

impl OrientationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            orientation: Mutex::new(History::with_capacity(capacity)),
            angular_velocity: Mutex::new(History::with_capacity(capacity)),
            offset: RwLock::new(Orientation::IDENTITY),
            ideal_direction: RwLock::new(Vector3::new(0.0, 0.0, 1.0)),
            killed: AtomicBool::new(false),
        }
    }

    pub fn set_orientation(&self, sample: OrientationSample) {
        self.orientation.lock().push(sample);
    }

    pub fn orientation(&self) -> CoreResult<OrientationSample> {
        self.orientation
            .lock()
            .latest()
            .ok_or(CoreError::EmptyHistory("orientation"))
    }

    pub fn orientation_history(&self, last_n: Option<usize>) -> Vec<OrientationSample> {
        self.orientation.lock().window(last_n)
    }

    pub fn reset_orientation(&self) {
        self.orientation.lock().clear();
    }

    pub fn set_angular_velocity(&self, sample: AngularVelocitySample) {
        self.angular_velocity.lock().push(sample);
    }

    pub fn angular_velocity(&self) -> CoreResult<AngularVelocitySample> {
        self.angular_velocity
            .lock()
            .latest()
            .ok_or(CoreError::EmptyHistory("angular velocity"))
    }

    pub fn angular_velocity_history(&self, last_n: Option<usize>) -> Vec<AngularVelocitySample> {
        self.angular_velocity.lock().window(last_n)
    }

    pub fn reset_angular_velocity(&self) {
        self.angular_velocity.lock().clear();
    }

    pub fn offset(&self) -> Orientation {
        *self.offset.read()
    }

    pub fn set_offset(&self, value: Orientation) {
        *self.offset.write() = value;
    }

    pub fn ideal_direction(&self) -> Vector3 {
        *self.ideal_direction.read()
    }

    pub fn set_ideal_direction(&self, value: Vector3) {
        *self.ideal_direction.write() = value;
    }

    /// Latches the safe state. Returns `true` only for the call that set it.
    pub fn kill(&self) -> bool {
        let first = !self.killed.swap(true, Ordering::SeqCst);
        if first {
            warn!("[OrientationStore] kill latch set");
        }
        first
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}
