//! Simulation backend.
//!
//! A software rig standing in for the instrument hardware. All simulated
//! collaborators share one [`Mechanics`] model, so the limit sensor and the
//! analog channels react to the actuator position the stepper produces.
//!
//! ```text
//!   SimStepper ──pulse──► Mechanics.position ◄── SimLimitSensor
//!                                │
//!                                ▼
//!                           SimAnalog (base + gain · position)
//!
//!   SimPwm (heater) ──duty──► SimTemperatureBus (ambient + k · duty)
//! ```

mod sensors;
mod stepper;

pub use sensors::{SimAnalog, SimPowerMonitor, SimPwm, SimRelay, SimTemperatureBus};
pub use stepper::{SimLimitSensor, SimStepper};

use crate::drivers::Hardware;
use miap_common::hal::types::AnalogFrame;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Physical actuator model shared by the simulated collaborators.
#[derive(Debug)]
pub struct Mechanics {
    position: AtomicI64,
    pulses: AtomicU64,
    enabled: AtomicBool,
    forward: AtomicBool,
    /// Sensor asserts at or below this position. `None` = never asserts.
    sensor_at: Option<i64>,
}

impl Mechanics {
    /// Model starting at `position` with the sensor at `sensor_at`.
    pub fn new(position: i64, sensor_at: Option<i64>) -> Self {
        Self {
            position: AtomicI64::new(position),
            pulses: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
            forward: AtomicBool::new(true),
            sensor_at,
        }
    }

    /// Physical position [steps].
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Total pulses received, including those issued while disabled.
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::SeqCst)
    }

    /// Enable line state.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn sensor_asserted(&self) -> bool {
        self.sensor_at.is_some_and(|at| self.position() <= at)
    }

    fn step(&self) {
        self.pulses.fetch_add(1, Ordering::SeqCst);
        if self.is_enabled() {
            let delta = if self.forward.load(Ordering::SeqCst) { 1 } else { -1 };
            self.position.fetch_add(delta, Ordering::SeqCst);
        }
    }
}

/// Builder and handle for a complete simulated instrument.
///
/// Keeps `Arc`s to every collaborator so tests can inspect and steer them
/// after the [`Hardware`] bundle has been handed to the core.
pub struct SimulatedRig {
    /// Actuator model.
    pub mechanics: Arc<Mechanics>,
    /// Analog front end.
    pub analog: Arc<SimAnalog>,
    /// Temperature bus.
    pub temperature: Arc<SimTemperatureBus>,
    /// Power monitor.
    pub power: Arc<SimPowerMonitor>,
    /// Settling relay.
    pub relay: Arc<SimRelay>,
    /// Heater output.
    pub heater: Arc<SimPwm>,
    /// Fan output.
    pub fan: Arc<SimPwm>,
}

impl SimulatedRig {
    /// Rig with the sensor `sensor_distance` steps behind the start position.
    ///
    /// `None` builds a rig whose sensor never asserts.
    pub fn new(sensor_distance: Option<u32>) -> Self {
        let sensor_at = sensor_distance.map(|d| -(d as i64));
        let mechanics = Arc::new(Mechanics::new(0, sensor_at));
        let heater = Arc::new(SimPwm::default());
        Self {
            analog: Arc::new(SimAnalog::new(Arc::clone(&mechanics))),
            temperature: Arc::new(SimTemperatureBus::new(
                &[22.0, 22.5],
                Some(Arc::clone(&heater)),
            )),
            power: Arc::new(SimPowerMonitor::default()),
            relay: Arc::new(SimRelay::default()),
            fan: Arc::new(SimPwm::default()),
            heater,
            mechanics,
        }
    }

    /// Set the analog model: reading = `base + gain · position` per channel.
    pub fn with_analog(self, base: AnalogFrame, gain: AnalogFrame) -> Self {
        self.analog.set_model(base, gain);
        self
    }

    /// Collaborator bundle for the core.
    pub fn hardware(&self) -> Hardware {
        Hardware {
            stepper: Box::new(SimStepper::new(Arc::clone(&self.mechanics))),
            limit: Arc::new(SimLimitSensor::new(Arc::clone(&self.mechanics))),
            analog: self.analog.clone(),
            temperature: self.temperature.clone(),
            power: self.power.clone(),
            relay: self.relay.clone(),
            heater: self.heater.clone(),
            fan: self.fan.clone(),
        }
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new(Some(500))
    }
}
