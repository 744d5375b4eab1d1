//! Prelude module for common re-exports.
//!
//! ```rust
//! use miap_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, ConfigSaver, LogLevel, SharedConfig};
pub use crate::hal::config::InstrumentConfig;

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{ANALOG_CHANNELS, MAX_TEMP_SENSORS};

// ─── Hardware ───────────────────────────────────────────────────────
pub use crate::hal::driver::{
    AnalogReader, HalError, LimitSensor, PowerMonitor, PwmOutput, Relay, StepperDriver,
    TemperatureBus,
};
pub use crate::hal::types::{AnalogFrame, PowerReading, Temperatures};
