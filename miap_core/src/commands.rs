//! Command surface.
//!
//! Every entry point is a method on [`Instrument`] returning
//! `Result<Ack, ActionError>`. [`Ack`] carries the status token handed to
//! transport adapters; the error's `Display` text is the human-readable
//! reason.
//!
//! Runtime settings are saved after logging start / stop, moves, and PID
//! changes. A failed save is logged and never fails the command.

use crate::core::Instrument;
use crate::error::{ActionError, ActionResult, StorageError};
use crate::orchestrator::SessionConfig;
use crate::settings::RuntimeSettings;
use crate::state::{PidSettings, SharedState};
use crate::storage::files::{self, DeleteReport, FileEntry, Protected};
use crate::storage::maintenance;
use miap_common::consts::MAX_TEMP_SENSORS;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Status token of a successful command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ack {
    /// Enable line asserted.
    StepperEnabled,
    /// Enable line released.
    StepperDisabled,
    /// Move accepted.
    MovementStarted,
    /// Move stopped.
    StepperStopped,
    /// Position declared zero.
    PositionZeroed,
    /// Homing task started.
    HomingStarted,
    /// Calibration task started.
    CalibrationStarted,
    /// Logging session started.
    LoggingStarted,
    /// Logging session stopped.
    LoggingStopped,
    /// Heater duty applied.
    HeaterSet,
    /// Fan duty applied.
    FanSet,
    /// PID tuning applied.
    PidApplied,
    /// PID loop enabled.
    PidEnabled,
    /// PID loop disabled.
    PidDisabled,
    /// Medium handed to the external host.
    StorageExposed,
    /// Medium returned to the core.
    StorageReleased,
    /// File moved to the uploaded directory.
    FileMarkedUploaded,
    /// Runtime settings written.
    SettingsSaved,
}

impl Ack {
    /// Wire token.
    pub fn token(self) -> &'static str {
        match self {
            Ack::StepperEnabled => "stepper_enabled",
            Ack::StepperDisabled => "stepper_disabled",
            Ack::MovementStarted => "movement_started",
            Ack::StepperStopped => "stepper_stopped",
            Ack::PositionZeroed => "position_zeroed",
            Ack::HomingStarted => "homing_started",
            Ack::CalibrationStarted => "calibration_started",
            Ack::LoggingStarted => "logging_started",
            Ack::LoggingStopped => "logging_stopped",
            Ack::HeaterSet => "heater_set",
            Ack::FanSet => "fan_set",
            Ack::PidApplied => "pid_applied",
            Ack::PidEnabled => "pid_enabled",
            Ack::PidDisabled => "pid_disabled",
            Ack::StorageExposed => "storage_exposed",
            Ack::StorageReleased => "storage_released",
            Ack::FileMarkedUploaded => "file_marked_uploaded",
            Ack::SettingsSaved => "settings_saved",
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

fn finite(name: &str, value: f32) -> ActionResult<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ActionError::InvalidRequest(format!("{name} must be a finite number")))
    }
}

impl Instrument {
    // ─── Motion ─────────────────────────────────────────────────────

    /// Assert the stepper enable line.
    pub fn enable_motion(&self) -> ActionResult<Ack> {
        self.motion.enable()?;
        Ok(Ack::StepperEnabled)
    }

    /// Release the stepper enable line.
    pub fn disable_motion(&self) -> ActionResult<Ack> {
        self.motion.disable()?;
        Ok(Ack::StepperDisabled)
    }

    /// Start a relative move. `speed_us == 0` keeps the current pacing.
    pub fn move_motion(&self, steps: u32, forward: bool, speed_us: u32) -> ActionResult<Ack> {
        let target = self.motion.move_steps(steps, forward, speed_us)?;
        debug!("Move accepted, target {}", target);
        self.persist_settings();
        Ok(Ack::MovementStarted)
    }

    /// Stop the current move.
    pub fn stop_motion(&self) -> ActionResult<Ack> {
        self.motion.stop()?;
        Ok(Ack::StepperStopped)
    }

    /// Declare the current position zero.
    pub fn zero_motion(&self) -> ActionResult<Ack> {
        self.motion.zero()?;
        Ok(Ack::PositionZeroed)
    }

    /// Start homing toward the limit sensor.
    pub fn find_zero(&self) -> ActionResult<Ack> {
        self.motion.find_zero(self.cancel.clone())?;
        Ok(Ack::HomingStarted)
    }

    // ─── Acquisition ────────────────────────────────────────────────

    /// Start a zero calibration.
    pub fn start_calibration(&self) -> ActionResult<Ack> {
        self.sampler.start_calibration()?;
        Ok(Ack::CalibrationStarted)
    }

    /// Current shared state.
    pub fn state_snapshot(&self) -> SharedState {
        self.store.snapshot()
    }

    // ─── Logging ────────────────────────────────────────────────────

    /// Start a logging session.
    ///
    /// `name` becomes the sanitized file postfix; a non-positive duration
    /// falls back to the configured default and an overlong one is clamped
    /// to `logging.max_duration_s`.
    pub fn start_logging(&self, name: &str, use_motion_cycle: bool, duration_s: f32) -> ActionResult<Ack> {
        let session = SessionConfig::new(
            name,
            use_motion_cycle,
            duration_s,
            &self.config.logging,
        );
        self.orchestrator.start_session(session.clone())?;
        {
            let mut intent = self.logging_intent.lock();
            intent.active = true;
            intent.postfix = session.postfix;
            intent.use_motion_cycle = session.use_motion_cycle;
            intent.duration_s = session.averaging_duration_s;
        }
        self.persist_settings();
        Ok(Ack::LoggingStarted)
    }

    /// Stop the logging session, if any.
    pub fn stop_logging(&self) -> ActionResult<Ack> {
        self.orchestrator.stop_session();
        self.logging_intent.lock().active = false;
        self.persist_settings();
        Ok(Ack::LoggingStopped)
    }

    // ─── Thermal ────────────────────────────────────────────────────

    /// Set the heater duty (clamped to 0–100 %).
    pub fn set_heater(&self, percent: f32) -> ActionResult<Ack> {
        self.thermal.set_heater(finite("heater power", percent)?);
        Ok(Ack::HeaterSet)
    }

    /// Set the fan duty (clamped to 0–100 %).
    pub fn set_fan(&self, percent: f32) -> ActionResult<Ack> {
        self.thermal.set_fan(finite("fan power", percent)?);
        Ok(Ack::FanSet)
    }

    /// Replace the PID tuning.
    pub fn apply_pid(&self, settings: PidSettings) -> ActionResult<Ack> {
        finite("kp", settings.kp)?;
        finite("ki", settings.ki)?;
        finite("kd", settings.kd)?;
        finite("setpoint", settings.setpoint_c)?;
        if settings.sensor_index >= MAX_TEMP_SENSORS {
            return Err(ActionError::InvalidRequest(format!(
                "sensor index {} out of range",
                settings.sensor_index
            )));
        }
        self.thermal.apply_pid(settings);
        self.persist_settings();
        Ok(Ack::PidApplied)
    }

    /// Let the PID loop drive the heater.
    pub fn enable_pid(&self) -> ActionResult<Ack> {
        self.thermal.set_pid_enabled(true);
        self.persist_settings();
        Ok(Ack::PidEnabled)
    }

    /// Stop the PID loop.
    pub fn disable_pid(&self) -> ActionResult<Ack> {
        self.thermal.set_pid_enabled(false);
        self.persist_settings();
        Ok(Ack::PidDisabled)
    }

    // ─── Storage ────────────────────────────────────────────────────

    /// Hand the medium to an external host, or take it back.
    ///
    /// Exposure is refused while logging. The flag is persisted before the
    /// medium is handed over and after it is taken back.
    pub fn set_storage_exposure(&self, exposed: bool) -> ActionResult<Ack> {
        if exposed {
            if self.store.snapshot().logging.active {
                return Err(StorageError::LoggingActive.into());
            }
            self.save_captured(|s| s.storage.exposed = true)?;
            let claimed = self
                .store
                .update_retry(10, |s| {
                    if s.logging.active {
                        return false;
                    }
                    s.storage.exposed = true;
                    true
                })
                .ok_or(ActionError::StateBusy)?;
            if !claimed {
                return Err(StorageError::LoggingActive.into());
            }
            info!("Storage exposed to host");
            Ok(Ack::StorageExposed)
        } else {
            self.store
                .update_retry(10, |s| s.storage.exposed = false)
                .ok_or(ActionError::StateBusy)?;
            info!("Storage released by host");
            self.persist_settings();
            Ok(Ack::StorageReleased)
        }
    }

    /// List a directory of the storage root.
    pub fn list_files(&self, dir: &str) -> ActionResult<Vec<FileEntry>> {
        self.ensure_not_exposed()?;
        let guard = self.storage.acquire()?;
        Ok(files::list_dir(&guard, dir)?)
    }

    /// Read a whole file.
    pub fn read_file(&self, path: &str) -> ActionResult<Vec<u8>> {
        self.ensure_not_exposed()?;
        let guard = self.storage.acquire()?;
        Ok(files::read_file(&guard, path)?)
    }

    /// Delete files. The settings file and the active log are skipped.
    pub fn delete_files(&self, paths: &[String]) -> ActionResult<DeleteReport> {
        self.ensure_not_exposed()?;
        let active = self.store.snapshot().logging.filename;
        let guard = self.storage.acquire()?;
        let protected = Protected {
            settings_file: &self.config.storage.settings_file,
            active_log: (!active.is_empty()).then_some(active.as_str()),
        };
        Ok(files::delete_files(&guard, paths, protected))
    }

    /// Move a queued file into the uploaded directory.
    pub fn mark_uploaded(&self, name: &str) -> ActionResult<Ack> {
        self.ensure_not_exposed()?;
        let guard = self.storage.acquire()?;
        let storage = &self.config.storage;
        files::mark_uploaded(&guard, &storage.to_upload_dir, &storage.uploaded_dir, name)?;
        Ok(Ack::FileMarkedUploaded)
    }

    /// Delete the oldest uploaded files until usage is within bounds.
    ///
    /// Returns the number of files removed.
    pub fn purge_uploaded(&self) -> ActionResult<usize> {
        self.ensure_not_exposed()?;
        let guard = self.storage.acquire()?;
        let storage = &self.config.storage;
        Ok(maintenance::purge_uploaded(
            &guard,
            &storage.uploaded_dir,
            storage.purge_max_percent,
            self.usage_probe.as_ref(),
        )?)
    }

    /// Write the runtime settings now.
    pub fn save_settings(&self) -> ActionResult<Ack> {
        self.ensure_not_exposed()?;
        self.save_captured(|_| {})?;
        Ok(Ack::SettingsSaved)
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn ensure_not_exposed(&self) -> ActionResult<()> {
        if self.store.snapshot().storage.exposed {
            return Err(StorageError::Exposed.into());
        }
        Ok(())
    }

    /// Save settings captured from the current state, adjusted by `adjust`.
    fn save_captured(&self, adjust: impl FnOnce(&mut SharedState)) -> ActionResult<()> {
        let mut snap = self.store.snapshot();
        adjust(&mut snap);
        let settings = RuntimeSettings::capture(&snap, &self.logging_intent.lock());
        let guard = self.storage.acquire()?;
        settings.save_to(&guard, &self.config.storage.settings_file)?;
        Ok(())
    }

    fn persist_settings(&self) {
        if self.store.snapshot().storage.exposed {
            debug!("Settings not saved: storage exposed");
            return;
        }
        if let Err(e) = self.save_captured(|_| {}) {
            warn!("Failed to save runtime settings: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_tokens_match_serde_names() {
        for ack in [
            Ack::StepperEnabled,
            Ack::MovementStarted,
            Ack::HomingStarted,
            Ack::LoggingStopped,
            Ack::FileMarkedUploaded,
            Ack::SettingsSaved,
        ] {
            let json = serde_json::to_value(ack).unwrap();
            assert_eq!(json, ack.token());
            assert_eq!(ack.to_string(), ack.token());
        }
    }

    #[test]
    fn test_finite_rejects_nan() {
        assert_eq!(finite("x", 1.5).unwrap(), 1.5);
        assert!(matches!(
            finite("x", f32::INFINITY),
            Err(ActionError::InvalidRequest(_))
        ));
    }
}
