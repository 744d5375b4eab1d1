//! Instrument configuration types.
//!
//! This module contains the configuration loaded from `miap.toml`:
//! - `InstrumentConfig` - Top-level configuration
//! - `DeviceConfig` - Identity and storage root
//! - `MotionConfig` / `SamplerConfig` / `CalibrationConfig`
//! - `LoggingConfig` / `StorageConfig` / `ThermalConfig`
//!
//! Every section and field is optional; omitted values fall back to the
//! defaults in [`crate::hal::consts`].
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "miap-core"
//!
//! [device]
//! device_id = "dev1"
//! storage_root = "/sdcard"
//!
//! [motion]
//! default_speed_us = 1500
//!
//! [logging]
//! rotation_period_s = 3600
//! ```

use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    DEFAULT_SETTINGS_FILE, DEFAULT_STORAGE_ROOT, DEFAULT_TO_UPLOAD_DIR, DEFAULT_UPLOADED_DIR,
};
use crate::hal::consts::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default function for device_id
fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}

/// Default function for storage_root
fn default_storage_root() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_ROOT)
}

/// Top-level instrument configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Common service settings.
    pub shared: SharedConfig,
    /// Identity and storage location.
    pub device: DeviceConfig,
    /// Stepper motion.
    pub motion: MotionConfig,
    /// Periodic acquisition.
    pub sampler: SamplerConfig,
    /// Zero calibration.
    pub calibration: CalibrationConfig,
    /// Logging sessions.
    pub logging: LoggingConfig,
    /// Durable storage.
    pub storage: StorageConfig,
    /// Heater / fan control.
    pub thermal: ThermalConfig,
}

impl InstrumentConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.device.device_id.trim().is_empty() {
            return Err(invalid("device.device_id cannot be empty"));
        }

        let m = &self.motion;
        if m.min_speed_us == 0 || m.min_speed_us > m.max_speed_us {
            return Err(invalid(format!(
                "motion speed bounds invalid: min={} max={}",
                m.min_speed_us, m.max_speed_us
            )));
        }
        if m.default_speed_us < m.min_speed_us || m.default_speed_us > m.max_speed_us {
            return Err(invalid(format!(
                "motion.default_speed_us {} outside [{}, {}]",
                m.default_speed_us, m.min_speed_us, m.max_speed_us
            )));
        }
        if m.max_move_steps == 0 || m.homing_step_budget == 0 {
            return Err(invalid("motion step limits must be positive"));
        }

        let c = &self.calibration;
        if c.warmup_samples >= c.samples {
            return Err(invalid(format!(
                "calibration.warmup_samples ({}) must be below samples ({})",
                c.warmup_samples, c.samples
            )));
        }

        let l = &self.logging;
        if !(l.default_duration_s.is_finite() && l.default_duration_s > 0.0) {
            return Err(invalid("logging.default_duration_s must be positive"));
        }
        if !(l.max_duration_s.is_finite() && l.max_duration_s >= l.default_duration_s) {
            return Err(invalid(format!(
                "logging.max_duration_s ({}) must be finite and at least default_duration_s ({})",
                l.max_duration_s, l.default_duration_s
            )));
        }
        if l.sample_period_ms == 0 || l.cycle_steps == 0 {
            return Err(invalid("logging sample period and cycle steps must be positive"));
        }

        let s = &self.storage;
        if s.purge_max_percent > 100 {
            return Err(invalid("storage.purge_max_percent must be within 0..=100"));
        }
        if s.to_upload_dir == s.uploaded_dir {
            return Err(invalid("storage upload directories must differ"));
        }

        if self.thermal.period_ms == 0 || self.thermal.integral_limit <= 0.0 {
            return Err(invalid("thermal period and integral limit must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

/// Device identity and storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Identifier used as the log file prefix.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Mount point of the durable medium.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            storage_root: default_storage_root(),
        }
    }
}

/// Stepper motion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Pacing interval used until a move request sets another one [µs].
    pub default_speed_us: u32,
    /// Lower clamp for requested pacing [µs].
    pub min_speed_us: u32,
    /// Upper clamp for requested pacing [µs].
    pub max_speed_us: u32,
    /// Upper clamp for steps per move request.
    pub max_move_steps: u32,
    /// Step pulse width [µs].
    pub pulse_width_us: u32,
    /// Maximum pulses per homing run.
    pub homing_step_budget: u32,
    /// Stepping loop sleep after a pulse or while moving [ms].
    pub active_sleep_ms: u64,
    /// Stepping loop sleep while idle [ms].
    pub idle_sleep_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            default_speed_us: DEFAULT_SPEED_US,
            min_speed_us: MIN_SPEED_US,
            max_speed_us: MAX_SPEED_US,
            max_move_steps: MAX_MOVE_STEPS,
            pulse_width_us: PULSE_WIDTH_US,
            homing_step_budget: HOMING_STEP_BUDGET,
            active_sleep_ms: STEP_ACTIVE_SLEEP_MS,
            idle_sleep_ms: STEP_IDLE_SLEEP_MS,
        }
    }
}

impl MotionConfig {
    /// Clamp a requested pacing interval into the accepted range.
    pub fn clamp_speed(&self, speed_us: u32) -> u32 {
        speed_us.clamp(self.min_speed_us, self.max_speed_us)
    }

    /// Step pulse width as a `Duration`.
    pub fn pulse_width(&self) -> Duration {
        Duration::from_micros(self.pulse_width_us as u64)
    }
}

/// Periodic acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Analog channel period [ms].
    pub analog_period_ms: u64,
    /// Temperature bus period [ms].
    pub temperature_period_ms: u64,
    /// Power monitor period [ms].
    pub power_period_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            analog_period_ms: ANALOG_PERIOD_MS,
            temperature_period_ms: TEMPERATURE_PERIOD_MS,
            power_period_ms: POWER_PERIOD_MS,
        }
    }
}

/// Zero calibration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Raw reads per calibration.
    pub samples: u32,
    /// Leading reads discarded.
    pub warmup_samples: u32,
    /// Cadence of reads [ms].
    pub sample_interval_ms: u64,
    /// Relay settle delay before the first read [ms].
    pub settle_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            samples: CALIBRATION_SAMPLES,
            warmup_samples: CALIBRATION_WARMUP,
            sample_interval_ms: CALIBRATION_INTERVAL_MS,
            settle_ms: CALIBRATION_SETTLE_MS,
        }
    }
}

/// Logging session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Averaging window used when a request gives none [s].
    pub default_duration_s: f32,
    /// Longer requested windows are clamped to this [s].
    pub max_duration_s: f32,
    /// Steps between zero and calibration positions.
    pub cycle_steps: u32,
    /// Pause after every move [ms].
    pub settle_ms: u64,
    /// Snapshot cadence inside an averaging window [ms].
    pub sample_period_ms: u64,
    /// File age that triggers rotation [s].
    pub rotation_period_s: u64,
    /// Delay before retrying an empty averaging window [ms].
    pub no_sample_retry_ms: u64,
    /// Delay before retrying a write that found storage busy [ms].
    pub storage_retry_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_duration_s: LOG_DEFAULT_DURATION_S,
            max_duration_s: LOG_MAX_DURATION_S,
            cycle_steps: LOG_CYCLE_STEPS,
            settle_ms: LOG_SETTLE_MS,
            sample_period_ms: LOG_SAMPLE_PERIOD_MS,
            rotation_period_s: LOG_ROTATION_PERIOD_S,
            no_sample_retry_ms: LOG_NO_SAMPLE_RETRY_MS,
            storage_retry_ms: LOG_STORAGE_RETRY_MS,
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bounded wait of the storage arbiter [ms].
    pub lock_timeout_ms: u64,
    /// Upload queue directory, relative to the storage root.
    pub to_upload_dir: String,
    /// Uploaded files directory, relative to the storage root.
    pub uploaded_dir: String,
    /// Runtime settings file name in the storage root.
    pub settings_file: String,
    /// Usage percentage above which uploaded files are purged.
    pub purge_max_percent: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: STORAGE_LOCK_TIMEOUT_MS,
            to_upload_dir: DEFAULT_TO_UPLOAD_DIR.to_string(),
            uploaded_dir: DEFAULT_UPLOADED_DIR.to_string(),
            settings_file: DEFAULT_SETTINGS_FILE.to_string(),
            purge_max_percent: PURGE_MAX_PERCENT,
        }
    }
}

/// Thermal control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// PID loop period [ms].
    pub period_ms: u64,
    /// Integral accumulator clamp.
    pub integral_limit: f32,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            period_ms: THERMAL_PERIOD_MS,
            integral_limit: PID_INTEGRAL_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = InstrumentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.device_id, "dev1");
        assert_eq!(config.motion.default_speed_us, 1500);
        assert_eq!(config.logging.rotation_period_s, 3600);
        assert_eq!(config.storage.lock_timeout_ms, 2000);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[device]
device_id = "bench7"

[motion]
min_speed_us = 500
default_speed_us = 800
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = InstrumentConfig::load(file.path()).unwrap();
        assert_eq!(config.device.device_id, "bench7");
        assert_eq!(config.device.storage_root, PathBuf::from("/sdcard"));
        assert_eq!(config.motion.min_speed_us, 500);
        assert_eq!(config.motion.max_speed_us, 2000);
        assert_eq!(config.calibration.samples, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_speed_bounds() {
        let mut config = InstrumentConfig::default();
        config.motion.min_speed_us = 3000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_warmup_covering_all_samples() {
        let mut config = InstrumentConfig::default();
        config.calibration.samples = 10;
        config.calibration.warmup_samples = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_device_id() {
        let mut config = InstrumentConfig::default();
        config.device.device_id = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_speed() {
        let motion = MotionConfig::default();
        assert_eq!(motion.clamp_speed(10), 1000);
        assert_eq!(motion.clamp_speed(1500), 1500);
        assert_eq!(motion.clamp_speed(90_000), 2000);
    }
}
