//! FindZero homing.
//!
//! Drives the stepper backward toward the limit sensor one pulse at a time.
//! The run ends on the first of: sensor asserted, step budget spent, abort
//! requested, motion disabled. Whatever the reason, the exit path zeroes
//! position and target, clears `moving` / `homing` / `abort` and records the
//! outcome. Homing never touches the enable line.

use super::{COMMAND_ATTEMPTS, MotionController};
use crate::cancel::CancelToken;
use crate::clock;
use crate::error::MotionError;
use crate::faults::{self, FaultCode, Severity};
use crate::state::{Acquire, HomeStatus};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Why a homing run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingOutcome {
    /// Limit sensor asserted.
    Sensor,
    /// Step budget spent without seeing the sensor.
    BudgetExhausted,
    /// Abort requested.
    Aborted,
    /// Motion disabled mid-run.
    Disabled,
}

impl HomingOutcome {
    /// Status recorded in the motion state.
    pub fn home_status(self) -> HomeStatus {
        match self {
            HomingOutcome::Sensor => HomeStatus::Sensor,
            HomingOutcome::BudgetExhausted => HomeStatus::BudgetExhausted,
            HomingOutcome::Aborted => HomeStatus::Aborted,
            HomingOutcome::Disabled => HomeStatus::Disabled,
        }
    }
}

impl MotionController {
    /// Start homing on a background task.
    ///
    /// # Errors
    /// `NotEnabled` if the enable line is released, `HomingActive` if a run
    /// is already in progress.
    pub fn find_zero(self: &Arc<Self>, cancel: CancelToken) -> Result<(), MotionError> {
        self.begin_homing()?;

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("find_zero".into())
            .spawn(move || this.run_homing(&cancel));
        match spawned {
            Ok(handle) => {
                *self.homing_task.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.store
                    .update_retry(COMMAND_ATTEMPTS, |s| s.motion.homing = false);
                Err(MotionError::Spawn(e.to_string()))
            }
        }
    }

    /// Home on the calling thread and return how the run ended.
    pub fn home_blocking(&self, cancel: &CancelToken) -> Result<HomingOutcome, MotionError> {
        self.begin_homing()?;
        Ok(self.run_homing(cancel))
    }

    /// Wait for a background homing run started by [`find_zero`](Self::find_zero).
    ///
    /// Returns `None` if no run was started since the last wait.
    pub fn wait_homing(&self) -> Option<HomingOutcome> {
        let handle = self.homing_task.lock().take()?;
        handle.join().ok()
    }

    fn begin_homing(&self) -> Result<(), MotionError> {
        self.store
            .update_retry(COMMAND_ATTEMPTS, |s| {
                let m = &mut s.motion;
                if !m.enabled {
                    return Err(MotionError::NotEnabled);
                }
                if m.homing {
                    return Err(MotionError::HomingActive);
                }
                if m.session_move {
                    return Err(MotionError::SessionMove);
                }
                m.homing = true;
                m.abort = false;
                m.moving = false;
                m.direction_forward = false;
                Ok(())
            })
            .ok_or(MotionError::StateBusy)??;
        info!(
            "Homing started (budget {} steps)",
            self.config.homing_step_budget
        );
        Ok(())
    }

    fn run_homing(&self, cancel: &CancelToken) -> HomingOutcome {
        let budget = self.config.homing_step_budget;
        let width = self.config.pulse_width();
        let mut pulses: u32 = 0;

        let outcome = loop {
            if self.limit.is_triggered() {
                break HomingOutcome::Sensor;
            }
            if pulses >= budget {
                break HomingOutcome::BudgetExhausted;
            }
            let m = self.store.snapshot().motion;
            if m.abort || cancel.is_cancelled() {
                break HomingOutcome::Aborted;
            }
            if !m.enabled {
                break HomingOutcome::Disabled;
            }
            let interval = Duration::from_micros(m.speed_interval_us.max(1) as u64);

            let now = clock::monotonic_us();
            let committed = self.store.update(|s| {
                let m = &mut s.motion;
                if !m.enabled {
                    return false;
                }
                m.position -= 1;
                m.target = m.position;
                m.last_step_us = now;
                true
            });
            match committed {
                Acquire::Acquired(true) => {
                    let mut driver = self.driver.lock();
                    driver.set_direction(false);
                    driver.pulse(width);
                    pulses += 1;
                }
                Acquire::Acquired(false) => break HomingOutcome::Disabled,
                Acquire::Stale(_) | Acquire::Failed => {}
            }
            thread::sleep(interval);
        };

        self.finish_homing(outcome, pulses);
        outcome
    }

    fn finish_homing(&self, outcome: HomingOutcome, pulses: u32) {
        let landed = self.store.update_retry(COMMAND_ATTEMPTS * 10, |s| {
            let m = &mut s.motion;
            m.position = 0;
            m.target = 0;
            m.moving = false;
            m.homing = false;
            m.abort = false;
            m.homed = outcome == HomingOutcome::Sensor;
            m.home_status = outcome.home_status();
        });
        if landed.is_none() {
            warn!("Homing exit could not be recorded under contention");
        }

        match outcome {
            HomingOutcome::Sensor => {
                faults::clear(&self.store, FaultCode::Homing);
                info!("Homing complete: sensor after {} steps", pulses);
            }
            HomingOutcome::BudgetExhausted => faults::raise(
                &self.store,
                FaultCode::Homing,
                Severity::Warning,
                &format!("limit sensor not found within {} steps", pulses),
            ),
            HomingOutcome::Aborted | HomingOutcome::Disabled => {
                info!("Homing ended early ({:?}) after {} steps", outcome, pulses);
            }
        }
    }
}
