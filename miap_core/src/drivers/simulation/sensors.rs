//! Simulated sensors and outputs.
//!
//! Each simulator supports fault injection so tests can exercise the
//! read-failure paths of the sampler.

use super::Mechanics;
use miap_common::prelude::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Temperature rise per percent of heater duty [°C / %].
const HEATER_GAIN_C_PER_PERCENT: f32 = 0.2;

// ─── Analog ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AnalogModel {
    base: AnalogFrame,
    gain: AnalogFrame,
    scripts: [VecDeque<f32>; ANALOG_CHANNELS],
}

/// Analog front end reading `base + gain · position` per channel.
///
/// Scripted values, when queued, are served first.
pub struct SimAnalog {
    mechanics: Arc<Mechanics>,
    model: Mutex<AnalogModel>,
    failures_left: AtomicU32,
    reads: AtomicU64,
}

impl SimAnalog {
    /// Front end bound to `mechanics`, reading zero on every channel.
    pub fn new(mechanics: Arc<Mechanics>) -> Self {
        Self {
            mechanics,
            model: Mutex::new(AnalogModel::default()),
            failures_left: AtomicU32::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// Replace the position model.
    pub fn set_model(&self, base: AnalogFrame, gain: AnalogFrame) {
        let mut model = self.model.lock();
        model.base = base;
        model.gain = gain;
    }

    /// Queue values served by subsequent reads of `channel`.
    pub fn push_script(&self, channel: usize, values: impl IntoIterator<Item = f32>) {
        if let Some(queue) = self.model.lock().scripts.get_mut(channel) {
            queue.extend(values);
        }
    }

    /// Fail the next `count` reads.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Successful reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl AnalogReader for SimAnalog {
    fn read(&self, channel: usize) -> Result<f32, HalError> {
        if channel >= ANALOG_CHANNELS {
            return Err(HalError::InvalidChannel(channel));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HalError::CommunicationError(
                "simulated conversion failure".to_string(),
            ));
        }

        let mut model = self.model.lock();
        let value = match model.scripts[channel].pop_front() {
            Some(v) => v,
            None => {
                model.base[channel] + model.gain[channel] * self.mechanics.position() as f32
            }
        };
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }
}

// ─── Temperature ────────────────────────────────────────────────────

/// Temperature bus whose sensors warm with the heater duty.
pub struct SimTemperatureBus {
    ambient: Mutex<Temperatures>,
    heater: Option<Arc<SimPwm>>,
    failing: AtomicBool,
}

impl SimTemperatureBus {
    /// Bus with one sensor per `ambient` entry (extra entries are ignored).
    pub fn new(ambient: &[f32], heater: Option<Arc<SimPwm>>) -> Self {
        let ambient = ambient.iter().copied().take(Temperatures::new().capacity());
        Self {
            ambient: Mutex::new(ambient.collect()),
            heater,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every read fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of simulated sensors.
    pub fn count(&self) -> usize {
        self.ambient.lock().len()
    }
}

impl TemperatureBus for SimTemperatureBus {
    fn read_all(&self) -> Result<Temperatures, HalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HalError::CommunicationError(
                "simulated bus reset timeout".to_string(),
            ));
        }
        let ambient = self.ambient.lock();
        if ambient.is_empty() {
            return Err(HalError::NoSensors);
        }
        let rise = self
            .heater
            .as_ref()
            .map_or(0.0, |h| h.duty() * HEATER_GAIN_C_PER_PERCENT);
        Ok(ambient.iter().map(|t| t + rise).collect())
    }
}

// ─── Power ──────────────────────────────────────────────────────────

/// Power monitor returning a settable reading.
pub struct SimPowerMonitor {
    reading: Mutex<PowerReading>,
    failing: AtomicBool,
}

impl SimPowerMonitor {
    /// Replace the reading.
    pub fn set_reading(&self, reading: PowerReading) {
        *self.reading.lock() = reading;
    }

    /// Make every read fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for SimPowerMonitor {
    fn default() -> Self {
        Self {
            reading: Mutex::new(PowerReading {
                bus_voltage_v: 12.0,
                current_ma: 150.0,
                power_mw: 1800.0,
            }),
            failing: AtomicBool::new(false),
        }
    }
}

impl PowerMonitor for SimPowerMonitor {
    fn read(&self) -> Result<PowerReading, HalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HalError::CommunicationError(
                "simulated i2c nack".to_string(),
            ));
        }
        Ok(*self.reading.lock())
    }
}

// ─── Outputs ────────────────────────────────────────────────────────

/// Relay recording its state and switch count.
#[derive(Default)]
pub struct SimRelay {
    on: AtomicBool,
    switches: AtomicU32,
}

impl SimRelay {
    /// Current state.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// Number of state changes seen.
    pub fn switches(&self) -> u32 {
        self.switches.load(Ordering::SeqCst)
    }
}

impl Relay for SimRelay {
    fn set(&self, on: bool) {
        if self.on.swap(on, Ordering::SeqCst) != on {
            self.switches.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// PWM output recording its duty.
#[derive(Default)]
pub struct SimPwm {
    duty_bits: AtomicU32,
}

impl SimPwm {
    /// Current duty [%].
    pub fn duty(&self) -> f32 {
        f32::from_bits(self.duty_bits.load(Ordering::SeqCst))
    }
}

impl PwmOutput for SimPwm {
    fn set_duty(&self, percent: f32) {
        self.duty_bits.store(percent.to_bits(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_follows_position_model() {
        let mechanics = Arc::new(Mechanics::new(-200, None));
        let analog = SimAnalog::new(mechanics);
        analog.set_model([1.0, 2.0, 3.0], [0.01, 0.0, -0.005]);

        assert!((analog.read(0).unwrap() - (-1.0)).abs() < 1e-6);
        assert_eq!(analog.read(1).unwrap(), 2.0);
        assert!((analog.read(2).unwrap() - 4.0).abs() < 1e-6);
        assert!(matches!(analog.read(3), Err(HalError::InvalidChannel(3))));
    }

    #[test]
    fn test_analog_scripts_then_failures() {
        let analog = SimAnalog::new(Arc::new(Mechanics::new(0, None)));
        analog.push_script(0, [7.0, 8.0]);
        analog.fail_next(1);

        assert!(analog.read(0).is_err());
        assert_eq!(analog.read(0).unwrap(), 7.0);
        assert_eq!(analog.read(0).unwrap(), 8.0);
        assert_eq!(analog.read(0).unwrap(), 0.0);
        assert_eq!(analog.reads(), 3);
    }

    #[test]
    fn test_temperature_rises_with_heater() {
        let heater = Arc::new(SimPwm::default());
        let bus = SimTemperatureBus::new(&[20.0], Some(Arc::clone(&heater)));
        assert_eq!(bus.read_all().unwrap().as_slice(), &[20.0]);

        heater.set_duty(50.0);
        assert_eq!(bus.read_all().unwrap().as_slice(), &[30.0]);

        bus.set_failing(true);
        assert!(bus.read_all().is_err());
    }

    #[test]
    fn test_empty_bus_reports_no_sensors() {
        let bus = SimTemperatureBus::new(&[], None);
        assert!(matches!(bus.read_all(), Err(HalError::NoSensors)));
    }

    #[test]
    fn test_relay_counts_switches() {
        let relay = SimRelay::default();
        relay.set(true);
        relay.set(true);
        relay.set(false);
        assert!(!relay.is_on());
        assert_eq!(relay.switches(), 2);
    }
}
