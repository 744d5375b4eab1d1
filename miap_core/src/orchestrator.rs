//! Logging orchestrator.
//!
//! At most one session task runs at a time. Each iteration of the session
//! loop:
//!
//! ```text
//!  active && file open? ──no──► teardown
//!        │
//!  file older than rotation period? ──► queue to to_upload/, reopen
//!        │
//!  motor-assisted:                         direct:
//!    home once (enable, home, disable)       average ──► write record
//!    at zero:   average ──► move back
//!    at offset: average ──► write record ──► move forward
//! ```
//!
//! A record that finds storage busy is kept and retried until it lands or
//! the session ends. An averaging window without samples is retried. Every
//! exit path runs the same teardown: queue (or close) the file, disable
//! motion, clear the logging state.

pub mod record;

pub use record::{Averages, Record, WindowAccumulator};

use crate::cancel::CancelToken;
use crate::error::{SessionError, StorageError};
use crate::faults::{self, FaultCode, Severity};
use crate::motion::{HomingOutcome, MotionController};
use crate::state::{LoggingState, StateStore};
use crate::storage::StorageArbiter;
use crate::storage::logfile::{LogFile, sanitize_postfix};
use chrono::Utc;
use miap_common::hal::config::{LoggingConfig, StorageConfig};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Attempts made to land a logging state change.
const FLAG_ATTEMPTS: u32 = 20;

/// Parameters of one logging session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Sanitized file name postfix, possibly empty.
    pub postfix: String,
    /// Alternate zero and calibration positions with the stepper.
    pub use_motion_cycle: bool,
    /// Averaging window [s].
    pub averaging_duration_s: f32,
}

impl SessionConfig {
    /// Session parameters from a raw request.
    ///
    /// The postfix is sanitized. A non-positive or NaN duration is replaced
    /// by `default_duration_s`; anything longer than `max_duration_s`
    /// (infinity included) is clamped to it.
    pub fn new(postfix: &str, use_motion_cycle: bool, duration_s: f32, config: &LoggingConfig) -> Self {
        let averaging_duration_s = if duration_s.is_nan() || duration_s <= 0.0 {
            config.default_duration_s
        } else if duration_s > config.max_duration_s {
            warn!(
                "Averaging window {}s clamped to {}s",
                duration_s, config.max_duration_s
            );
            config.max_duration_s
        } else {
            duration_s
        };
        Self {
            postfix: sanitize_postfix(postfix),
            use_motion_cycle,
            averaging_duration_s,
        }
    }

    fn window(&self) -> Duration {
        Duration::try_from_secs_f32(self.averaging_duration_s).unwrap_or(Duration::ZERO)
    }
}

/// Owner of the logging session task and its open file.
pub struct Orchestrator {
    store: Arc<StateStore>,
    storage: Arc<StorageArbiter>,
    motion: Arc<MotionController>,
    cancel: CancelToken,
    device_id: String,
    config: LoggingConfig,
    to_upload_dir: String,
    file: Mutex<Option<LogFile>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator writing `device_id` logs through `storage`.
    pub fn new(
        store: Arc<StateStore>,
        storage: Arc<StorageArbiter>,
        motion: Arc<MotionController>,
        device_id: impl Into<String>,
        config: LoggingConfig,
        storage_config: &StorageConfig,
    ) -> Self {
        Self {
            cancel: CancelToken::new(Arc::clone(&store)),
            store,
            storage,
            motion,
            device_id: device_id.into(),
            config,
            to_upload_dir: storage_config.to_upload_dir.clone(),
            file: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Logging configuration.
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// `true` while a session is marked active.
    pub fn is_active(&self) -> bool {
        self.store.snapshot().logging.active
    }

    // ─── Start / stop ───────────────────────────────────────────────

    /// Open a log file and start the session task.
    ///
    /// Returns the name of the opened file.
    ///
    /// # Errors
    /// - `StorageExposed` while the medium is exposed to a host
    /// - `AlreadyActive` if a session is running
    /// - `Open` if the file cannot be created
    pub fn start_session(self: &Arc<Self>, session: SessionConfig) -> Result<String, SessionError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(SessionError::AlreadyActive);
        }
        if let Some(finished) = task.take() {
            if finished.join().is_err() {
                warn!("Previous logging task panicked");
            }
        }

        self.claim(&session)?;
        self.cancel.reset();

        let file = match self.open_file(&session.postfix) {
            Ok(file) => file,
            Err(e) => {
                self.clear_logging_state();
                return Err(SessionError::Open(e));
            }
        };
        let name = file.name().to_string();
        self.publish_file(&file);
        *self.file.lock() = Some(file);

        let this = Arc::clone(self);
        let worker = session.clone();
        let spawned = thread::Builder::new()
            .name("logging".into())
            .spawn(move || this.run_session(&worker));
        match spawned {
            Ok(handle) => {
                *task = Some(handle);
                info!(
                    "Logging started: {} (motion cycle: {}, window {:.2}s)",
                    name, session.use_motion_cycle, session.averaging_duration_s
                );
                Ok(name)
            }
            Err(e) => {
                self.teardown();
                Err(SessionError::Spawn(e.to_string()))
            }
        }
    }

    /// Stop the session and wait for its teardown.
    ///
    /// Without a session task the teardown runs on the caller. The task slot
    /// stays locked until the abort flag is cleared again, so a concurrent
    /// start waits for the whole stop.
    pub fn stop_session(&self) {
        let mut task = self.task.lock();
        let landed = self.store.update_retry(FLAG_ATTEMPTS, |s| {
            s.logging.active = false;
            s.motion.moving = false;
        });
        if landed.is_none() {
            warn!("Logging stop could not be recorded under contention");
        }
        self.cancel.cancel();

        match task.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("Logging task panicked, tearing down");
                    self.teardown();
                }
            }
            None => self.teardown(),
        }
        self.cancel.reset();
        info!("Logging stopped");
    }

    fn claim(&self, session: &SessionConfig) -> Result<(), SessionError> {
        self.store
            .update_retry(FLAG_ATTEMPTS, |s| {
                if s.storage.exposed {
                    return Err(SessionError::StorageExposed);
                }
                if s.logging.active {
                    return Err(SessionError::AlreadyActive);
                }
                s.logging = LoggingState {
                    active: true,
                    filename: String::new(),
                    use_motion_cycle: session.use_motion_cycle,
                    averaging_duration_s: session.averaging_duration_s,
                    homed_once: false,
                    file_start_ms: 0,
                };
                Ok(())
            })
            .ok_or(SessionError::Open(StorageError::Busy))?
    }

    fn open_file(&self, postfix: &str) -> Result<LogFile, StorageError> {
        let guard = self.storage.acquire()?;
        if !guard.root().is_dir() {
            let msg = format!("storage root {} is not mounted", guard.root().display());
            faults::raise(&self.store, FaultCode::StorageMount, Severity::Critical, &msg);
            return Err(StorageError::NotFound(guard.root().display().to_string()));
        }
        faults::clear(&self.store, FaultCode::StorageMount);
        LogFile::create(&guard, &self.device_id, postfix, Utc::now()).inspect_err(|e| {
            faults::raise(&self.store, FaultCode::LogFile, Severity::Error, &e.to_string());
        })
    }

    fn publish_file(&self, file: &LogFile) {
        let name = file.name().to_string();
        let opened = file.opened_ms();
        self.store.update_retry(FLAG_ATTEMPTS, |s| {
            s.logging.filename = name.clone();
            s.logging.file_start_ms = opened;
        });
    }

    // ─── Session loop ───────────────────────────────────────────────

    fn run_session(&self, session: &SessionConfig) {
        debug!("Logging task running");
        // Zero-pass averages waiting for their calibration pass.
        let mut pending_base: Option<Averages> = None;

        loop {
            if !self.is_active() || self.file.lock().is_none() {
                break;
            }
            if self.rotate_if_due(&session.postfix).is_break() {
                break;
            }
            let flow = if session.use_motion_cycle {
                self.motion_cycle(session, &mut pending_base)
            } else {
                self.direct_cycle(session)
            };
            if flow.is_break() {
                break;
            }
        }
        self.teardown();
    }

    fn direct_cycle(&self, session: &SessionConfig) -> ControlFlow<()> {
        let Some(avg) = self.average(session.window()) else {
            return self.retry_empty_window();
        };
        let calibrated = avg.channels_f32();
        self.write_record(&Record::new(avg, None))?;
        self.store.update(|s| s.acquisition.calibrated = calibrated);
        ControlFlow::Continue(())
    }

    fn motion_cycle(
        &self,
        session: &SessionConfig,
        pending_base: &mut Option<Averages>,
    ) -> ControlFlow<()> {
        if !self.store.snapshot().logging.homed_once {
            self.home_once()?;
        }

        let Some(base) = pending_base.take() else {
            // At zero.
            let Some(base) = self.average(session.window()) else {
                return self.retry_empty_window();
            };
            *pending_base = Some(base);
            return self.cycle_move(false);
        };

        // At offset.
        let Some(cal) = self.average(session.window()) else {
            *pending_base = Some(base);
            return self.retry_empty_window();
        };
        self.write_record(&Record::new(base, Some(cal.channels)))?;
        let calibrated = cal.channels_f32();
        self.store.update(|s| s.acquisition.calibrated = calibrated);
        self.cycle_move(true)
    }

    fn home_once(&self) -> ControlFlow<()> {
        let settle = Duration::from_millis(self.config.settle_ms);
        if let Err(e) = self.motion.enable() {
            warn!("Logging homing: enable failed: {}", e);
            return ControlFlow::Break(());
        }
        let outcome = self.motion.home_blocking(&self.cancel);
        if let Err(e) = self.motion.disable() {
            warn!("Logging homing: disable failed: {}", e);
        }
        self.store
            .update_retry(FLAG_ATTEMPTS, |s| s.logging.homed_once = true);

        match outcome {
            Ok(HomingOutcome::Aborted) => {
                warn!("Logging aborted during homing");
                ControlFlow::Break(())
            }
            Ok(outcome) => {
                debug!("Logging homing finished: {:?}", outcome);
                if self.cancel.sleep(settle) {
                    ControlFlow::Continue(())
                } else {
                    warn!("Logging aborted during homing settle");
                    ControlFlow::Break(())
                }
            }
            Err(e) => {
                warn!("Logging homing refused: {}", e);
                ControlFlow::Break(())
            }
        }
    }

    fn cycle_move(&self, forward: bool) -> ControlFlow<()> {
        let settle = Duration::from_millis(self.config.settle_ms);
        match self
            .motion
            .move_blocking(self.config.cycle_steps, forward, settle, &self.cancel)
        {
            Ok(true) => ControlFlow::Continue(()),
            Ok(false) => {
                warn!("Logging aborted during stepper move");
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!("Logging move refused: {}", e);
                ControlFlow::Break(())
            }
        }
    }

    fn retry_empty_window(&self) -> ControlFlow<()> {
        warn!("Logging: no samples collected, retrying");
        self.cancel
            .sleep(Duration::from_millis(self.config.no_sample_retry_ms));
        ControlFlow::Continue(())
    }

    /// Average state snapshots over `window`.
    ///
    /// `None` if no snapshot was taken, including when the session ends
    /// before the first one.
    fn average(&self, window: Duration) -> Option<Averages> {
        let temp_count = self.store.snapshot().temperature_count();
        let mut acc = WindowAccumulator::new(temp_count);
        let interval = Duration::from_millis(self.config.sample_period_ms);
        let start = Instant::now();

        while start.elapsed() < window {
            let snap = self.store.snapshot();
            if !snap.logging.active || snap.motion.abort {
                break;
            }
            acc.add(&snap);
            if !self.cancel.sleep(interval) {
                break;
            }
        }
        debug!("Averaging window: {} samples", acc.samples());
        acc.finish()
    }

    // ─── Storage ────────────────────────────────────────────────────

    /// Write `record`, retrying while storage is busy.
    ///
    /// Breaks if the session ended first or the write failed.
    fn write_record(&self, record: &Record) -> ControlFlow<()> {
        let line = record.to_line();
        let retry = Duration::from_millis(self.config.storage_retry_ms);
        loop {
            if !self.is_active() {
                warn!("Logging ended with a record pending");
                return ControlFlow::Break(());
            }
            let guard = match self.storage.acquire() {
                Ok(guard) => guard,
                Err(StorageError::Busy) => {
                    faults::raise(
                        &self.store,
                        FaultCode::StorageBusy,
                        Severity::Warning,
                        "storage unavailable, retrying logging write",
                    );
                    self.cancel.sleep(retry);
                    continue;
                }
                Err(e) => {
                    faults::raise(&self.store, FaultCode::LogFile, Severity::Error, &e.to_string());
                    return ControlFlow::Break(());
                }
            };
            faults::clear(&self.store, FaultCode::StorageBusy);

            let mut slot = self.file.lock();
            let Some(file) = slot.as_mut() else {
                return ControlFlow::Break(());
            };
            return match file.append(&guard, &line) {
                Ok(()) => {
                    faults::clear(&self.store, FaultCode::LogFile);
                    info!("Logging: wrote row ts={} iso={}", record.stamp.epoch_ms, record.stamp.iso);
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    faults::raise(&self.store, FaultCode::LogFile, Severity::Error, &e.to_string());
                    ControlFlow::Break(())
                }
            };
        }
    }

    /// Queue the current file and open a fresh one once it is old enough.
    fn rotate_if_due(&self, postfix: &str) -> ControlFlow<()> {
        let period_ms = self.config.rotation_period_s.saturating_mul(1000);
        let due = self
            .file
            .lock()
            .as_ref()
            .is_some_and(|f| f.age_ms() >= period_ms);
        if !due {
            return ControlFlow::Continue(());
        }

        let guard = match self.storage.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                debug!("Rotation postponed: {}", e);
                return ControlFlow::Continue(());
            }
        };
        info!("Rotating log file after {}s", self.config.rotation_period_s);

        let mut slot = self.file.lock();
        if let Some(old) = slot.take() {
            if let Err(e) = old.queue_for_upload(&guard, &self.to_upload_dir) {
                warn!("Queueing rotated log failed: {}", e);
            }
        }
        match LogFile::create(&guard, &self.device_id, postfix, Utc::now()) {
            Ok(file) => {
                self.publish_file(&file);
                *slot = Some(file);
                ControlFlow::Continue(())
            }
            Err(e) => {
                faults::raise(&self.store, FaultCode::LogFile, Severity::Error, &e.to_string());
                ControlFlow::Break(())
            }
        }
    }

    // ─── Teardown ───────────────────────────────────────────────────

    fn teardown(&self) {
        let file = self.file.lock().take();
        if let Some(file) = file {
            match self.storage.acquire() {
                Ok(guard) => {
                    if let Err(e) = file.queue_for_upload(&guard, &self.to_upload_dir) {
                        warn!("Queueing log for upload failed: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Closing log in place: {}", e);
                    file.close();
                }
            }
        }
        if let Err(e) = self.motion.disable() {
            warn!("Disabling motion on logging teardown failed: {}", e);
        }
        self.clear_logging_state();
        debug!("Logging teardown complete");
    }

    fn clear_logging_state(&self) {
        let landed = self
            .store
            .update_retry(FLAG_ATTEMPTS, |s| s.logging = LoggingState::default());
        if landed.is_none() {
            warn!("Logging state could not be cleared under contention");
        }
    }
}
