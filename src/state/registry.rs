//! registry.rs
//! Immutable magnet table built once at startup.
//!
//! Construction validates the whole table before anything is returned, so a
//! `Registry` value is always complete: exactly `MAGNET_COUNT` entries, ids
//! unique and in range, finite gains, non-zero loop periods that are whole
//! multiples of the fastest one.

use std::time::Duration;

use log::debug;

use crate::config::MagnetConfig;
use crate::state::{
    error::ConfigError,
    types::{AdcAddress, MAGNET_COUNT, MagnetId, PwmAddress, Vector3},
};

/// PI gains used by the current controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiGains {
    pub kp: f32,
    pub ki: f32,
}

impl PiGains {
    pub const DEFAULT_KP: f32 = 50.0;
    pub const DEFAULT_KI: f32 = 15_000.0;

    pub const fn new(kp: f32, ki: f32) -> Self {
        Self { kp, ki }
    }
}

impl Default for PiGains {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KP, Self::DEFAULT_KI)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryEntry {
    pub id: MagnetId,
    pub position: Vector3,
    pub adc: AdcAddress,
    pub pwm: PwmAddress,
    pub gains: PiGains,
    /// Control period; also the `dt` of the integral term.
    pub period: Duration,
}

impl RegistryEntry {
    /// Loop period in seconds as used by the PI update.
    #[inline]
    pub fn dt(&self) -> f32 {
        self.period.as_secs_f32()
    }
}

/// Read-only id → entry table. Slot `i` holds magnet `i + 1`.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    /// Validates `rows` and builds the table. Fails on the first malformed row.
    pub fn from_config(rows: &[MagnetConfig]) -> Result<Self, ConfigError> {
        if rows.len() != MAGNET_COUNT {
            return Err(ConfigError::WrongCount {
                expected: MAGNET_COUNT,
                found: rows.len(),
            });
        }

        let mut slots: Vec<Option<RegistryEntry>> = vec![None; MAGNET_COUNT];

        for row in rows {
            if row.id < 1 || row.id > MAGNET_COUNT as i64 {
                return Err(ConfigError::IdOutOfRange(row.id));
            }
            let id = MagnetId(row.id as u8);

            let gains_ok = row.kp.is_finite() && row.ki.is_finite() && row.kp >= 0.0 && row.ki >= 0.0;
            if !gains_ok {
                return Err(ConfigError::InvalidGains {
                    id: id.0,
                    kp: row.kp,
                    ki: row.ki,
                });
            }
            if row.dt_us == 0 {
                return Err(ConfigError::InvalidPeriod { id: id.0, dt_us: row.dt_us });
            }

            let slot = &mut slots[id.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateId(id.0));
            }
            *slot = Some(RegistryEntry {
                id,
                position: Vector3::new(row.x, row.y, row.z),
                adc: AdcAddress::new(row.adc_device, row.adc_channel),
                pwm: PwmAddress::new(row.pwm_device, row.pwm_channel),
                gains: PiGains::new(row.kp, row.ki),
                period: Duration::from_micros(row.dt_us),
            });
        }

        // Count matched and no duplicates, so every slot is filled.
        let entries: Vec<RegistryEntry> = slots.into_iter().flatten().collect();

        // A slower magnet is stepped every N fast ticks, so its dt must be exact.
        if let Some(base) = entries.iter().map(|e| e.period).min() {
            let base_us = base.as_micros() as u64;
            for e in &entries {
                let dt_us = e.period.as_micros() as u64;
                if dt_us % base_us != 0 {
                    return Err(ConfigError::UnalignedPeriod { id: e.id.0, dt_us, base_us });
                }
            }
        }
        debug!("[Registry] built with {} magnets", entries.len());
        Ok(Self { entries })
    }

    pub fn get(&self, id: MagnetId) -> Option<&RegistryEntry> {
        if !id.is_in_range() {
            return None;
        }
        self.entries.get(id.index())
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn ids(&self) -> impl Iterator<Item = MagnetId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fast-loop ticks between two updates of `entry`.
    pub fn stride(&self, entry: &RegistryEntry) -> u64 {
        let base = self.fastest_period().as_micros().max(1);
        (entry.period.as_micros() / base).max(1) as u64
    }

    /// Shortest control period in the table; the fast loop ticks at this rate.
    pub fn fastest_period(&self) -> Duration {
        self.entries
            .iter()
            .map(|e| e.period)
            .min()
            .unwrap_or(Duration::from_micros(crate::config::DEFAULT_FAST_LOOP_US))
    }
}
