//! Error types of the control core.
//!
//! Component errors describe why a request was refused or a task failed.
//! [`ActionError`] is what the command surface returns; its `Display` text is
//! the human-readable reason handed to transport adapters.

use miap_common::config::ConfigError;
use thiserror::Error;

/// Motion controller refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MotionError {
    /// Enable line is not asserted.
    #[error("motion not enabled")]
    NotEnabled,

    /// A homing run already owns the stepper.
    #[error("homing already running")]
    HomingActive,

    /// A logging move owns the stepper.
    #[error("stepper in use by the logging session")]
    SessionMove,

    /// The state store stayed contended.
    #[error("state busy, retry")]
    StateBusy,

    /// The homing task could not be spawned.
    #[error("failed to spawn homing task: {0}")]
    Spawn(String),
}

/// Acquisition sampler refusals and failures.
#[derive(Debug, Clone, Error)]
pub enum SamplerError {
    /// Calibration re-entry.
    #[error("calibration already running")]
    AlreadyRunning,

    /// The state store stayed contended.
    #[error("state busy, retry")]
    StateBusy,

    /// The calibration task could not be spawned.
    #[error("failed to spawn calibration task: {0}")]
    Spawn(String),
}

/// Durable storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The arbiter was not acquired within its bound.
    #[error("storage busy")]
    Busy,

    /// The medium is exposed to an external host.
    #[error("storage exposed to host")]
    Exposed,

    /// Rejected relative path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A logging session is writing to the medium.
    #[error("storage in use by an active logging session")]
    LoggingActive,

    /// Filesystem error.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Logging session refusals and failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already running.
    #[error("logging already active")]
    AlreadyActive,

    /// Logging cannot start while the medium is exposed.
    #[error("cannot start logging while storage is exposed")]
    StorageExposed,

    /// Opening or rotating the log file failed.
    #[error("failed to open log file: {0}")]
    Open(#[source] StorageError),

    /// The session task could not be spawned.
    #[error("failed to spawn logging task: {0}")]
    Spawn(String),
}

/// Reasons returned by the command surface.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Motion refusal.
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Sampler refusal.
    #[error(transparent)]
    Sampler(#[from] SamplerError),

    /// Logging refusal.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Settings persistence failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The state store stayed contended.
    #[error("state busy, retry")]
    StateBusy,

    /// Request parameters rejected.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Background task could not be spawned.
    #[error("failed to spawn task: {0}")]
    Spawn(String),
}

/// Result alias for command surface entry points.
pub type ActionResult<T> = Result<T, ActionError>;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
