//! Acquisition sampler.
//!
//! One background loop polls three collaborators on independent periods and
//! publishes the results into the state store:
//!
//! | Source | Default period | Fault on failure |
//! |--------|----------------|------------------|
//! | Analog channels | 200 ms | `AdcRead` |
//! | Temperature bus | 2000 ms | `TempSensor` |
//! | Power monitor | 1000 ms | `PowerRead` |
//!
//! A failed read skips the cycle and leaves the previous values in place.
//! Analog cycles are skipped while a zero calibration owns the converter.
//! Zero calibration itself lives in [`calibration`].

pub mod calibration;

use crate::clock;
use crate::faults::{self, FaultCode, Severity};
use crate::state::StateStore;
use miap_common::consts::ANALOG_CHANNELS;
use miap_common::hal::config::{CalibrationConfig, SamplerConfig};
use miap_common::hal::driver::{AnalogReader, HalError, PowerMonitor, Relay, TemperatureBus};
use miap_common::hal::types::AnalogFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Longest sleep of the sampler loop, so shutdown is noticed promptly.
const MAX_IDLE: Duration = Duration::from_millis(20);

/// Collaborators read by the sampler.
pub struct SamplerInputs {
    /// Analog front end.
    pub analog: Arc<dyn AnalogReader>,
    /// Temperature bus.
    pub temperature: Arc<dyn TemperatureBus>,
    /// Power monitor.
    pub power: Arc<dyn PowerMonitor>,
    /// Settling relay used by calibration.
    pub relay: Arc<dyn Relay>,
}

/// Periodic acquisition and zero calibration.
pub struct Sampler {
    store: Arc<StateStore>,
    inputs: SamplerInputs,
    config: SamplerConfig,
    calibration: CalibrationConfig,
    calibration_task: Mutex<Option<JoinHandle<Option<AnalogFrame>>>>,
}

impl Sampler {
    /// Sampler publishing into `store`.
    pub fn new(
        store: Arc<StateStore>,
        inputs: SamplerInputs,
        config: SamplerConfig,
        calibration: CalibrationConfig,
    ) -> Self {
        Self {
            store,
            inputs,
            config,
            calibration,
            calibration_task: Mutex::new(None),
        }
    }

    /// Read all analog channels once, without offset correction.
    pub fn read_frame(&self) -> Result<AnalogFrame, HalError> {
        let mut frame = [0.0; ANALOG_CHANNELS];
        for (channel, value) in frame.iter_mut().enumerate() {
            *value = self.inputs.analog.read(channel)?;
        }
        Ok(frame)
    }

    // ─── Cycles ─────────────────────────────────────────────────────

    /// One analog cycle. Returns `true` if new readings were published.
    pub fn sample_analog(&self) -> bool {
        if self.store.snapshot().calibration.in_progress {
            trace!("Analog cycle skipped during calibration");
            return false;
        }
        let raw = match self.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                faults::raise(&self.store, FaultCode::AdcRead, Severity::Warning, &e.to_string());
                return false;
            }
        };

        let now = clock::monotonic_ms();
        let published = self
            .store
            .update(|s| {
                let acq = &mut s.acquisition;
                for ((out, raw), offset) in acq.channels.iter_mut().zip(raw).zip(acq.offsets) {
                    *out = raw - offset;
                }
                acq.last_update_ms = now;
            })
            .is_acquired();
        faults::clear(&self.store, FaultCode::AdcRead);
        trace!("ADC: {:.6} {:.6} {:.6}", raw[0], raw[1], raw[2]);
        published
    }

    /// One temperature bus cycle.
    pub fn sample_temperatures(&self) -> bool {
        match self.inputs.temperature.read_all() {
            Ok(temps) => {
                debug!("Temperatures ({}): {:?}", temps.len(), temps.as_slice());
                let published = self
                    .store
                    .update(|s| s.acquisition.temperatures = temps)
                    .is_acquired();
                faults::clear(&self.store, FaultCode::TempSensor);
                published
            }
            Err(e) => {
                faults::raise(&self.store, FaultCode::TempSensor, Severity::Warning, &e.to_string());
                false
            }
        }
    }

    /// One power monitor cycle.
    pub fn sample_power(&self) -> bool {
        match self.inputs.power.read() {
            Ok(reading) => {
                let published = self
                    .store
                    .update(|s| s.acquisition.power = reading)
                    .is_acquired();
                faults::clear(&self.store, FaultCode::PowerRead);
                published
            }
            Err(e) => {
                faults::raise(&self.store, FaultCode::PowerRead, Severity::Warning, &e.to_string());
                false
            }
        }
    }

    // ─── Loop ───────────────────────────────────────────────────────

    /// Spawn the sampling loop. It runs until `running` is cleared.
    pub fn spawn_loop(self: &Arc<Self>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("sampler".into())
            .spawn(move || this.run_loop(&running))
    }

    fn run_loop(&self, running: &AtomicBool) {
        info!(
            "Sampler started (analog={}ms temp={}ms power={}ms)",
            self.config.analog_period_ms, self.config.temperature_period_ms, self.config.power_period_ms
        );
        let mut schedule = [
            Periodic::new(self.config.analog_period_ms),
            Periodic::new(self.config.temperature_period_ms),
            Periodic::new(self.config.power_period_ms),
        ];

        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if schedule[0].due(now) {
                self.sample_analog();
            }
            if schedule[1].due(now) {
                self.sample_temperatures();
            }
            if schedule[2].due(now) {
                self.sample_power();
            }
            let next = schedule.iter().map(|p| p.next).min().unwrap_or(now);
            thread::sleep(next.saturating_duration_since(Instant::now()).min(MAX_IDLE));
        }
        info!("Sampler stopped");
    }
}

/// Fixed-period schedule entry. Fires immediately, then every `period`.
struct Periodic {
    period: Duration,
    next: Instant,
}

impl Periodic {
    fn new(period_ms: u64) -> Self {
        Self {
            period: Duration::from_millis(period_ms.max(1)),
            next: Instant::now(),
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next < now {
            // Fell behind; do not burst to catch up.
            self.next = now + self.period;
        }
        true
    }
}
