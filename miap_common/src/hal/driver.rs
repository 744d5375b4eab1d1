//! Hardware collaborator traits and error types.
//!
//! This module defines:
//! - `HalError` enum - Error type for collaborator operations
//! - One trait per collaborator the core consumes
//!
//! # Threading
//!
//! Sensor traits take `&self` and are shared as `Arc<dyn Trait>` between the
//! sampler, the calibration task and the homing task. Implementations use
//! interior mutability where they need state. [`StepperDriver`] takes
//! `&mut self` and is owned by the motion controller behind a mutex.

use crate::hal::types::{PowerReading, Temperatures};
use std::time::Duration;
use thiserror::Error;

/// Error types for hardware collaborator operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Bus or converter communication failed
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Channel index outside the converter range
    #[error("Invalid channel: {0}")]
    InvalidChannel(usize),

    /// Bus enumeration found no sensors
    #[error("No sensors present on bus")]
    NoSensors,
}

/// Multi-channel analog converter.
pub trait AnalogReader: Send + Sync {
    /// Read one channel and return its calibrated value.
    ///
    /// # Errors
    /// `HalError::InvalidChannel` for an unknown channel,
    /// `HalError::CommunicationError` for a failed conversion.
    fn read(&self, channel: usize) -> Result<f32, HalError>;
}

/// Single-wire temperature bus.
pub trait TemperatureBus: Send + Sync {
    /// Read every enumerated sensor. The returned length is the sensor count.
    fn read_all(&self) -> Result<Temperatures, HalError>;
}

/// Bus voltage / current / power monitor.
pub trait PowerMonitor: Send + Sync {
    /// Take one reading.
    fn read(&self) -> Result<PowerReading, HalError>;
}

/// Limit (hall) sensor marking the mechanical zero.
pub trait LimitSensor: Send + Sync {
    /// `true` while the sensor is asserted.
    fn is_triggered(&self) -> bool;
}

/// Step / direction / enable stepper driver.
///
/// # Timing Contracts
///
/// | Operation | Max Duration |
/// |-----------|--------------|
/// | `set_enabled()` | a few µs |
/// | `set_direction()` | a few µs |
/// | `pulse()` | `width` + a few µs |
pub trait StepperDriver: Send {
    /// Drive the enable line.
    fn set_enabled(&mut self, enabled: bool);

    /// Drive the direction line (`true` = forward, away from the sensor).
    fn set_direction(&mut self, forward: bool);

    /// Assert the step line for `width`, then release it.
    fn pulse(&mut self, width: Duration);
}

/// Settling relay used during zero calibration.
pub trait Relay: Send + Sync {
    /// Energise (`true`) or release (`false`) the relay.
    fn set(&self, on: bool);
}

/// PWM output driving the heater or the fan.
pub trait PwmOutput: Send + Sync {
    /// Set the duty cycle in percent. Callers clamp to `0.0..=100.0`.
    fn set_duty(&self, percent: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_error_display() {
        let err = HalError::CommunicationError("spi timeout".to_string());
        assert!(err.to_string().contains("spi timeout"));

        let err = HalError::InvalidChannel(7);
        assert!(err.to_string().contains('7'));
    }
}
