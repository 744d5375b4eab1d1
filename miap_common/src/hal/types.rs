//! Reading types exchanged between hardware collaborators and the core.

use crate::consts::{ANALOG_CHANNELS, MAX_TEMP_SENSORS};
use serde::{Deserialize, Serialize};

/// One value per analog front-end channel.
pub type AnalogFrame = [f32; ANALOG_CHANNELS];

/// Temperatures reported by the bus, in °C. Length is the sensor count.
pub type Temperatures = heapless::Vec<f32, MAX_TEMP_SENSORS>;

/// Bus power monitor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// Bus voltage [V].
    pub bus_voltage_v: f32,
    /// Bus current [mA].
    pub current_ma: f32,
    /// Bus power [mW].
    pub power_mw: f32,
}
