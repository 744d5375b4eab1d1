//! Simulated stepper driver and limit sensor.

use super::Mechanics;
use miap_common::hal::driver::{LimitSensor, StepperDriver};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::trace;

/// Stepper driver moving the simulated actuator one unit per pulse.
pub struct SimStepper {
    mechanics: Arc<Mechanics>,
}

impl SimStepper {
    /// Driver bound to `mechanics`.
    pub fn new(mechanics: Arc<Mechanics>) -> Self {
        Self { mechanics }
    }
}

impl StepperDriver for SimStepper {
    fn set_enabled(&mut self, enabled: bool) {
        trace!("sim stepper enable={}", enabled);
        self.mechanics.enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_direction(&mut self, forward: bool) {
        self.mechanics.forward.store(forward, Ordering::SeqCst);
    }

    fn pulse(&mut self, _width: Duration) {
        // The assertion width has no physical meaning in simulation.
        self.mechanics.step();
    }
}

/// Limit sensor asserting at or below the configured position.
pub struct SimLimitSensor {
    mechanics: Arc<Mechanics>,
}

impl SimLimitSensor {
    /// Sensor bound to `mechanics`.
    pub fn new(mechanics: Arc<Mechanics>) -> Self {
        Self { mechanics }
    }
}

impl LimitSensor for SimLimitSensor {
    fn is_triggered(&self) -> bool {
        self.mechanics.sensor_asserted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulses_move_only_when_enabled() {
        let mechanics = Arc::new(Mechanics::new(0, None));
        let mut stepper = SimStepper::new(Arc::clone(&mechanics));

        stepper.pulse(Duration::from_micros(4));
        assert_eq!(mechanics.position(), 0);
        assert_eq!(mechanics.pulses(), 1);

        stepper.set_enabled(true);
        stepper.set_direction(false);
        stepper.pulse(Duration::from_micros(4));
        stepper.pulse(Duration::from_micros(4));
        assert_eq!(mechanics.position(), -2);
        assert_eq!(mechanics.pulses(), 3);
    }

    #[test]
    fn test_sensor_asserts_at_position() {
        let mechanics = Arc::new(Mechanics::new(0, Some(-2)));
        let mut stepper = SimStepper::new(Arc::clone(&mechanics));
        let sensor = SimLimitSensor::new(Arc::clone(&mechanics));
        stepper.set_enabled(true);
        stepper.set_direction(false);

        stepper.pulse(Duration::ZERO);
        assert!(!sensor.is_triggered());
        stepper.pulse(Duration::ZERO);
        assert!(sensor.is_triggered());
    }

    #[test]
    fn test_sensor_without_position_never_asserts() {
        let mechanics = Arc::new(Mechanics::new(-1_000_000, None));
        assert!(!SimLimitSensor::new(mechanics).is_triggered());
    }
}
