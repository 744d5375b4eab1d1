//! Hardware backends.
//!
//! The core consumes hardware only through the collaborator traits of
//! `miap_common::hal::driver`. A [`Hardware`] bundle groups one
//! implementation of each and is handed to
//! [`Instrument::new`](crate::core::Instrument::new).
//!
//! - [`simulation`] - Software rig for development and testing
//!
//! # Adding New Backends
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the collaborator traits from `miap_common::hal::driver`
//! 3. Provide a constructor returning a [`Hardware`] bundle

pub mod simulation;

use miap_common::hal::driver::{
    AnalogReader, LimitSensor, PowerMonitor, PwmOutput, Relay, StepperDriver, TemperatureBus,
};
use std::sync::Arc;

/// One implementation of every hardware collaborator.
pub struct Hardware {
    /// Stepper step / direction / enable lines.
    pub stepper: Box<dyn StepperDriver>,
    /// Limit sensor at mechanical zero.
    pub limit: Arc<dyn LimitSensor>,
    /// Analog front end.
    pub analog: Arc<dyn AnalogReader>,
    /// Temperature bus.
    pub temperature: Arc<dyn TemperatureBus>,
    /// Bus power monitor.
    pub power: Arc<dyn PowerMonitor>,
    /// Calibration settling relay.
    pub relay: Arc<dyn Relay>,
    /// Heater PWM.
    pub heater: Arc<dyn PwmOutput>,
    /// Fan PWM.
    pub fan: Arc<dyn PwmOutput>,
}
