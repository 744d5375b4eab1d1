//! Runtime settings persisted on the storage medium.
//!
//! Operator choices that must survive a restart are kept in a TOML file in
//! the storage root (`config.toml` by default):
//!
//! ```toml
//! [motion]
//! speed_us = 1500
//!
//! [logging]
//! active = true
//! postfix = "bench"
//! use_motion_cycle = true
//! duration_s = 1.0
//!
//! [thermal]
//! pid_enabled = false
//!
//! [thermal.pid]
//! kp = 1.0
//! ki = 0.0
//! kd = 0.0
//! setpoint_c = 25.0
//! sensor_index = 0
//!
//! [storage]
//! exposed = false
//! ```
//!
//! The file is read and written only while a [`StorageGuard`] is held.

use crate::state::{PidSettings, SharedState};
use crate::storage::StorageGuard;
use miap_common::config::{ConfigError, ConfigLoader, ConfigSaver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Persisted stepper settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Step pacing interval [µs].
    pub speed_us: u32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            speed_us: miap_common::hal::consts::DEFAULT_SPEED_US,
        }
    }
}

/// Last logging request and whether it was running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingIntent {
    /// A session was running when the settings were saved.
    pub active: bool,
    /// File name postfix of the session.
    pub postfix: String,
    /// Motor-assisted cycle.
    pub use_motion_cycle: bool,
    /// Averaging window [s].
    pub duration_s: f32,
}

impl Default for LoggingIntent {
    fn default() -> Self {
        Self {
            active: false,
            postfix: String::new(),
            use_motion_cycle: false,
            duration_s: miap_common::hal::consts::LOG_DEFAULT_DURATION_S,
        }
    }
}

/// Persisted thermal settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalSettings {
    /// PID loop drives the heater.
    pub pid_enabled: bool,
    /// PID tuning.
    pub pid: PidSettings,
}

/// Persisted storage settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Medium was exposed to a host.
    pub exposed: bool,
}

/// Everything restored at boot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Stepper.
    pub motion: MotionSettings,
    /// Logging intent.
    pub logging: LoggingIntent,
    /// Heater PID.
    pub thermal: ThermalSettings,
    /// Exposure flag.
    pub storage: StorageSettings,
}

impl RuntimeSettings {
    /// Settings reflecting `snap`, with the logging request from `intent`.
    ///
    /// `intent.active` is replaced by the live logging flag.
    pub fn capture(snap: &SharedState, intent: &LoggingIntent) -> Self {
        Self {
            motion: MotionSettings {
                speed_us: snap.motion.speed_interval_us,
            },
            logging: LoggingIntent {
                active: snap.logging.active,
                ..intent.clone()
            },
            thermal: ThermalSettings {
                pid_enabled: snap.thermal.pid_enabled,
                pid: snap.thermal.pid,
            },
            storage: StorageSettings {
                exposed: snap.storage.exposed,
            },
        }
    }

    /// Load from `file_name` in the storage root.
    ///
    /// Returns `None` when the file does not exist.
    ///
    /// # Errors
    /// `ParseError` if the file exists but is not valid settings TOML.
    pub fn load_from(guard: &StorageGuard<'_>, file_name: &str) -> Result<Option<Self>, ConfigError> {
        match Self::load(&guard.path(file_name)) {
            Ok(settings) => {
                debug!("Runtime settings loaded from {}", file_name);
                Ok(Some(settings))
            }
            Err(ConfigError::FileNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write to `file_name` in the storage root.
    pub fn save_to(&self, guard: &StorageGuard<'_>, file_name: &str) -> Result<(), ConfigError> {
        self.save(&guard.path(file_name))?;
        info!(
            "Runtime settings saved (speed={}us logging={} pid={} exposed={})",
            self.motion.speed_us, self.logging.active, self.thermal.pid_enabled, self.storage.exposed
        );
        Ok(())
    }
}
