//! Heater / fan outputs and the heater PID loop.
//!
//! The loop runs once per `period_ms` with a fixed `dt` of one second:
//!
//! ```text
//! error    = setpoint - T[sensor_index]
//! integral = clamp(integral + error·dt, ±integral_limit)
//! output   = clamp(kp·error + ki·integral + kd·(error - prev)/dt, 0, 100)
//! ```
//!
//! While the loop is disabled its state is reset. A missing sensor or a
//! non-finite reading skips the cycle and leaves the heater untouched.

use crate::state::{PidSettings, StateStore};
use miap_common::hal::config::ThermalConfig;
use miap_common::hal::driver::PwmOutput;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace};

/// PID time step [s].
const PID_DT_S: f32 = 1.0;

/// Attempts made to land an output change.
const OUTPUT_ATTEMPTS: u32 = 10;

/// Clamp a duty request into `0..=100` %.
pub fn clamp_percent(percent: f32) -> f32 {
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

// ─── PID ────────────────────────────────────────────────────────────

/// Internal state of the heater PID.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    /// Integral accumulator [°C·s].
    integral: f32,
    /// Previous error [°C].
    prev_error: f32,
}

impl PidState {
    /// Reset all internal state to zero.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Integral accumulator.
    pub fn integral(&self) -> f32 {
        self.integral
    }
}

/// Compute one PID cycle for measured temperature `temp_c`.
///
/// Returns the heater duty in percent, already clamped to `0..=100`.
pub fn pid_compute(
    state: &mut PidState,
    gains: &PidSettings,
    temp_c: f32,
    dt: f32,
    integral_limit: f32,
) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    let error = gains.setpoint_c - temp_c;

    state.integral = (state.integral + error * dt).clamp(-integral_limit, integral_limit);
    let derivative = (error - state.prev_error) / dt;
    state.prev_error = error;

    let output = gains.kp * error + gains.ki * state.integral + gains.kd * derivative;
    clamp_percent(output)
}

// ─── Controller ─────────────────────────────────────────────────────

/// Heater and fan outputs.
pub struct ThermalController {
    store: Arc<StateStore>,
    heater: Arc<dyn PwmOutput>,
    fan: Arc<dyn PwmOutput>,
    config: ThermalConfig,
    pid: Mutex<PidState>,
}

impl ThermalController {
    /// Controller driving `heater` and `fan`.
    pub fn new(
        store: Arc<StateStore>,
        heater: Arc<dyn PwmOutput>,
        fan: Arc<dyn PwmOutput>,
        config: ThermalConfig,
    ) -> Self {
        Self {
            store,
            heater,
            fan,
            config,
            pid: Mutex::new(PidState::default()),
        }
    }

    /// Set the heater duty. Returns the applied (clamped) value.
    pub fn set_heater(&self, percent: f32) -> f32 {
        let duty = clamp_percent(percent);
        self.heater.set_duty(duty);
        self.store
            .update_retry(OUTPUT_ATTEMPTS, |s| s.thermal.heater_power = duty);
        debug!("Heater set to {:.1}%", duty);
        duty
    }

    /// Set the fan duty. Returns the applied (clamped) value.
    pub fn set_fan(&self, percent: f32) -> f32 {
        let duty = clamp_percent(percent);
        self.fan.set_duty(duty);
        self.store
            .update_retry(OUTPUT_ATTEMPTS, |s| s.thermal.fan_power = duty);
        debug!("Fan set to {:.1}%", duty);
        duty
    }

    /// Replace the PID tuning. The controller state is reset.
    pub fn apply_pid(&self, settings: PidSettings) -> bool {
        self.pid.lock().reset();
        let landed = self
            .store
            .update_retry(OUTPUT_ATTEMPTS, |s| s.thermal.pid = settings)
            .is_some();
        info!(
            "PID applied: kp={} ki={} kd={} setpoint={}C sensor={}",
            settings.kp, settings.ki, settings.kd, settings.setpoint_c, settings.sensor_index
        );
        landed
    }

    /// Enable or disable the PID loop.
    pub fn set_pid_enabled(&self, enabled: bool) -> bool {
        let landed = self
            .store
            .update_retry(OUTPUT_ATTEMPTS, |s| s.thermal.pid_enabled = enabled)
            .is_some();
        info!("PID {}", if enabled { "enabled" } else { "disabled" });
        landed
    }

    /// Run one PID cycle. Returns the output applied to the heater, if any.
    pub fn cycle(&self) -> Option<f32> {
        let snap = self.store.snapshot();
        let mut pid = self.pid.lock();
        if !snap.thermal.pid_enabled {
            pid.reset();
            return None;
        }

        let gains = snap.thermal.pid;
        let Some(&temp) = snap.acquisition.temperatures.get(gains.sensor_index) else {
            trace!("PID sensor {} not present", gains.sensor_index);
            return None;
        };
        if !temp.is_finite() {
            return None;
        }

        let output = pid_compute(&mut pid, &gains, temp, PID_DT_S, self.config.integral_limit);
        self.heater.set_duty(output);
        self.store.update(|s| {
            s.thermal.pid_output = output;
            s.thermal.heater_power = output;
        });
        trace!("PID T={:.2}C out={:.1}%", temp, output);
        Some(output)
    }

    /// Spawn the PID loop. It runs until `running` is cleared.
    pub fn spawn_loop(self: &Arc<Self>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        thread::Builder::new().name("thermal".into()).spawn(move || {
            info!("Thermal loop started ({}ms)", this.config.period_ms);
            let period = Duration::from_millis(this.config.period_ms);
            let slice = Duration::from_millis(10).min(period);
            while running.load(Ordering::SeqCst) {
                this.cycle();
                let mut slept = Duration::ZERO;
                while slept < period && running.load(Ordering::SeqCst) {
                    thread::sleep(slice);
                    slept += slice;
                }
            }
            info!("Thermal loop stopped");
        })
    }
}
