//! Default timings and limits for the instrument.
//!
//! These values seed [`InstrumentConfig`](crate::hal::config::InstrumentConfig)
//! when a section or field is omitted from the TOML file.

/// Canonical service name (used for logging).
pub const SERVICE_NAME: &str = "miap-core";

/// Default device identifier, used as the log file name prefix.
pub const DEFAULT_DEVICE_ID: &str = "dev1";

// ─── Motion ─────────────────────────────────────────────────────────

/// Default step pacing interval in microseconds.
pub const DEFAULT_SPEED_US: u32 = 1500;

/// Fastest accepted step pacing interval in microseconds.
pub const MIN_SPEED_US: u32 = 1000;

/// Slowest accepted step pacing interval in microseconds.
pub const MAX_SPEED_US: u32 = 2000;

/// Upper bound on steps per move request.
pub const MAX_MOVE_STEPS: u32 = 10_000;

/// Step pulse assertion width in microseconds.
pub const PULSE_WIDTH_US: u32 = 4;

/// Maximum pulses issued by one homing run.
pub const HOMING_STEP_BUDGET: u32 = 20_000;

/// Stepping loop yield after a pulse or while moving.
pub const STEP_ACTIVE_SLEEP_MS: u64 = 1;

/// Stepping loop sleep while idle.
pub const STEP_IDLE_SLEEP_MS: u64 = 5;

// ─── Sampling ───────────────────────────────────────────────────────

/// Analog acquisition period.
pub const ANALOG_PERIOD_MS: u64 = 200;

/// Temperature bus period.
pub const TEMPERATURE_PERIOD_MS: u64 = 2000;

/// Power monitor period.
pub const POWER_PERIOD_MS: u64 = 1000;

/// Raw reads taken by a zero calibration.
pub const CALIBRATION_SAMPLES: u32 = 100;

/// Leading calibration reads discarded as warm-up.
pub const CALIBRATION_WARMUP: u32 = 10;

/// Cadence of calibration reads.
pub const CALIBRATION_INTERVAL_MS: u64 = 200;

/// Relay settling delay before calibration reads start.
pub const CALIBRATION_SETTLE_MS: u64 = 1000;

// ─── Logging ────────────────────────────────────────────────────────

/// Averaging window used when a start request gives none (seconds).
pub const LOG_DEFAULT_DURATION_S: f32 = 1.0;

/// Longest averaging window a start request may ask for (seconds).
pub const LOG_MAX_DURATION_S: f32 = 3600.0;

/// Steps between the zero and calibration positions of a motor-assisted cycle.
pub const LOG_CYCLE_STEPS: u32 = 200;

/// Pause after every motor move of a logging session.
pub const LOG_SETTLE_MS: u64 = 1000;

/// Snapshot cadence inside an averaging window.
pub const LOG_SAMPLE_PERIOD_MS: u64 = 200;

/// Age after which a log file is handed off for upload (seconds).
pub const LOG_ROTATION_PERIOD_S: u64 = 3600;

/// Delay before retrying an averaging window that yielded nothing.
pub const LOG_NO_SAMPLE_RETRY_MS: u64 = 500;

/// Delay before retrying a write that found storage busy.
pub const LOG_STORAGE_RETRY_MS: u64 = 200;

// ─── Storage ────────────────────────────────────────────────────────

/// Bounded wait of the storage arbiter.
pub const STORAGE_LOCK_TIMEOUT_MS: u64 = 2000;

/// Filesystem usage above which uploaded files are purged (percent).
pub const PURGE_MAX_PERCENT: u8 = 80;

// ─── Thermal ────────────────────────────────────────────────────────

/// PID loop period.
pub const THERMAL_PERIOD_MS: u64 = 1000;

/// Integral accumulator clamp of the heater PID.
pub const PID_INTEGRAL_LIMIT: f32 = 200.0;
