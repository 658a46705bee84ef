//! config.rs
//! Static magnet table and runtime parameters.
//!
//! The magnet table is either the built-in layout (20 coils on the vertices of a
//! regular dodecahedron) or a CSV file with the columns
//! `id,x,y,z,adc_device,adc_channel,pwm_device,pwm_channel,kp,ki,dt_us`.
//! Runtime parameters default to the values below and can be overridden from
//! the environment.

use std::{env, fs::File, io::Read, path::{Path, PathBuf}, time::Duration};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::state::{
    error::ConfigError,
    registry::PiGains,
    types::MAGNET_COUNT,
};

pub const DEFAULT_FAST_LOOP_US: u64 = 300;
pub const DEFAULT_SLOW_LOOP_MS: u64 = 10;
pub const DEFAULT_IO_BUDGET_US: u64 = 100;

pub const ACTIVE_HISTORY_CAPACITY: usize = 4_096;
pub const ARCHIVE_HISTORY_CAPACITY: usize = 16_384;
pub const COMMAND_HISTORY_CAPACITY: usize = 1_024;
pub const ORIENTATION_HISTORY_CAPACITY: usize = 4_096;

/// Duty range accepted by the PWM driver chips.
pub const PWM_DUTY_MIN: u16 = 0;
pub const PWM_DUTY_MAX: u16 = 255;

const ADC_CHANNELS_PER_DEVICE: usize = 8;
const PWM_CHANNELS_PER_DEVICE: usize = 16;
const PWM_BASE_I2C_ADDRESS: u8 = 0x40;

/// One row of the magnet table. `id` is signed so bad input surfaces as
/// an out-of-range error instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnetConfig {
    pub id: i64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub adc_device: u8,
    pub adc_channel: u8,
    pub pwm_device: u8,
    pub pwm_channel: u8,
    pub kp: f32,
    pub ki: f32,
    pub dt_us: u64,
}

/// Built-in layout: coil `i` sits on dodecahedron vertex `i`, unit radius.
pub fn default_magnet_table() -> Vec<MagnetConfig> {
    let phi = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let inv = 1.0 / phi;
    let scale = 1.0 / 3.0_f32.sqrt();

    let mut vertices: Vec<(f32, f32, f32)> = Vec::with_capacity(MAGNET_COUNT);
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                vertices.push((sx, sy, sz));
            }
        }
    }
    for a in [-1.0, 1.0] {
        for b in [-1.0, 1.0] {
            vertices.push((0.0, a * inv, b * phi));
            vertices.push((a * inv, b * phi, 0.0));
            vertices.push((a * phi, 0.0, b * inv));
        }
    }

    let gains = PiGains::default();
    vertices
        .into_iter()
        .enumerate()
        .map(|(i, (x, y, z))| MagnetConfig {
            id: i as i64 + 1,
            x: x * scale,
            y: y * scale,
            z: z * scale,
            adc_device: (i / ADC_CHANNELS_PER_DEVICE) as u8,
            adc_channel: (i % ADC_CHANNELS_PER_DEVICE) as u8,
            pwm_device: PWM_BASE_I2C_ADDRESS + (i / PWM_CHANNELS_PER_DEVICE) as u8,
            pwm_channel: (i % PWM_CHANNELS_PER_DEVICE) as u8,
            kp: gains.kp,
            ki: gains.ki,
            dt_us: DEFAULT_FAST_LOOP_US,
        })
        .collect()
}

/// Parses a magnet table from any CSV source (header row required).
pub fn read_magnet_table<R: Read>(reader: R) -> Result<Vec<MagnetConfig>, ConfigError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::with_capacity(MAGNET_COUNT);
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn load_magnet_table(path: &Path) -> Result<Vec<MagnetConfig>, ConfigError> {
    let file = File::open(path)?;
    let rows = read_magnet_table(file)?;
    info!("[Config] loaded {} magnet rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Writes `rows` as CSV with a header, in the format `read_magnet_table` accepts.
pub fn write_magnet_table<W: std::io::Write>(writer: W, rows: &[MagnetConfig]) -> Result<(), ConfigError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Tunables for the control tasks and state capacities.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub magnet_table: Option<PathBuf>,
    pub slow_loop_period: Duration,
    /// ADC/PWM calls slower than this count as transient faults.
    pub io_budget: Duration,
    pub duty_min: u16,
    pub duty_max: u16,
    pub active_history: usize,
    pub archive_history: usize,
    pub command_history: usize,
    pub orientation_history: usize,
    pub telemetry_csv: Option<PathBuf>,
    pub fast_loop_core: Option<usize>,
    /// Overrides every table period when set.
    pub fast_loop_override: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            magnet_table: None,
            slow_loop_period: Duration::from_millis(DEFAULT_SLOW_LOOP_MS),
            io_budget: Duration::from_micros(DEFAULT_IO_BUDGET_US),
            duty_min: PWM_DUTY_MIN,
            duty_max: PWM_DUTY_MAX,
            active_history: ACTIVE_HISTORY_CAPACITY,
            archive_history: ARCHIVE_HISTORY_CAPACITY,
            command_history: COMMAND_HISTORY_CAPACITY,
            orientation_history: ORIENTATION_HISTORY_CAPACITY,
            telemetry_csv: None,
            fast_loop_core: None,
            fast_loop_override: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with `MAGNET_TABLE`, `FAST_LOOP_US`, `SLOW_LOOP_MS`,
    /// `TELEMETRY_CSV` and `FAST_LOOP_CORE` applied when present.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = env::var("MAGNET_TABLE") {
            cfg.magnet_table = Some(PathBuf::from(path));
        }
        if let Some(us) = parse_env::<u64>("FAST_LOOP_US") {
            if us > 0 {
                cfg.fast_loop_override = Some(Duration::from_micros(us));
            }
        }
        if let Some(ms) = parse_env::<u64>("SLOW_LOOP_MS") {
            if ms > 0 {
                cfg.slow_loop_period = Duration::from_millis(ms);
            }
        }
        if let Ok(path) = env::var("TELEMETRY_CSV") {
            cfg.telemetry_csv = Some(PathBuf::from(path));
        }
        cfg.fast_loop_core = parse_env::<usize>("FAST_LOOP_CORE");
        cfg
    }

    /// Magnet rows from `magnet_table`, or the built-in layout when unset.
    pub fn magnet_rows(&self) -> Result<Vec<MagnetConfig>, ConfigError> {
        let mut rows = match &self.magnet_table {
            Some(path) => load_magnet_table(path)?,
            None => default_magnet_table(),
        };
        if let Some(period) = self.fast_loop_override {
            let us = period.as_micros() as u64;
            for row in rows.iter_mut() {
                row.dt_us = us;
            }
        }
        Ok(rows)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[Config] ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_layout() {
        let rows = default_magnet_table();
        assert_eq!(rows.len(), MAGNET_COUNT);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.id, i as i64 + 1);
            let r = (row.x * row.x + row.y * row.y + row.z * row.z).sqrt();
            assert!((r - 1.0).abs() < 1e-4, "vertex {} radius {}", row.id, r);
        }
        assert_eq!(rows[0].pwm_device, 0x40);
        assert_eq!(rows[16].pwm_device, 0x41);
        assert_eq!(rows[16].pwm_channel, 0);
        assert_eq!(rows[9].adc_device, 1);
        assert_eq!(rows[9].adc_channel, 1);
    }

    #[test]
    fn csv_table_round_trips() {
        let rows = default_magnet_table();
        let mut buf = Vec::new();
        write_magnet_table(&mut buf, &rows).unwrap();
        let parsed = read_magnet_table(buf.as_slice()).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn csv_with_garbage_is_a_parse_error() {
        let text = "id,x,y,z,adc_device,adc_channel,pwm_device,pwm_channel,kp,ki,dt_us\n1,a,0,0,0,0,64,0,50,15000,300\n";
        assert!(matches!(read_magnet_table(text.as_bytes()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn period_override_applies_to_every_row() {
        let cfg = RuntimeConfig {
            fast_loop_override: Some(Duration::from_micros(500)),
            ..RuntimeConfig::default()
        };
        let rows = cfg.magnet_rows().unwrap();
        assert!(rows.iter().all(|r| r.dt_us == 500));
    }
}
