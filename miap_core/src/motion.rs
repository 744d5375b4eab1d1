//! Motion controller.
//!
//! Owns the stepper driver and is the only writer of the motion position.
//!
//! ```text
//!   Disabled ──enable──► Idle ──move──► Moving ──arrived / stop──► Idle
//!                          │                                        ▲
//!                          └──find_zero──► Homing ──exit────────────┘
//!   any ──disable──► Disabled
//! ```
//!
//! # Stepping
//!
//! A background loop calls [`MotionController::poll`] continuously. Each
//! step is committed to the state store first (position ±1, step stamp,
//! arrival check) and only then pulsed, so the recorded position never runs
//! ahead of a step that was refused under contention.
//!
//! Homing lives in [`homing`] and drives the stepper itself; the stepping
//! loop stands aside while `homing` is set.

pub mod homing;

pub use homing::HomingOutcome;

use crate::cancel::CancelToken;
use crate::clock;
use crate::error::MotionError;
use crate::state::{Acquire, HomeStatus, MotionState, StateStore};
use miap_common::hal::config::MotionConfig;
use miap_common::hal::driver::{LimitSensor, StepperDriver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts made to land a motion command.
const COMMAND_ATTEMPTS: u32 = 10;

/// Result of one stepping loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do: disabled, not moving, or homing.
    Idle,
    /// Moving, but the pacing interval has not elapsed (or the state was busy).
    Waiting,
    /// One step was taken.
    Stepped,
    /// One step was taken and the target reached.
    Arrived,
}

/// Stepper state machine over the shared state.
pub struct MotionController {
    store: Arc<StateStore>,
    driver: Mutex<Box<dyn StepperDriver>>,
    limit: Arc<dyn LimitSensor>,
    config: MotionConfig,
    homing_task: Mutex<Option<JoinHandle<HomingOutcome>>>,
}

impl MotionController {
    /// Controller driving `driver`, homing against `limit`.
    pub fn new(
        store: Arc<StateStore>,
        driver: Box<dyn StepperDriver>,
        limit: Arc<dyn LimitSensor>,
        config: MotionConfig,
    ) -> Self {
        Self {
            store,
            driver: Mutex::new(driver),
            limit,
            config,
            homing_task: Mutex::new(None),
        }
    }

    /// Motion configuration.
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Assert the enable line.
    pub fn enable(&self) -> Result<(), MotionError> {
        self.driver.lock().set_enabled(true);
        self.store
            .update_retry(COMMAND_ATTEMPTS, |s| s.motion.enabled = true)
            .ok_or(MotionError::StateBusy)?;
        info!("Stepper enabled");
        Ok(())
    }

    /// Release the enable line and drop any move in progress.
    ///
    /// A running homing task notices and exits with
    /// [`HomeStatus::Disabled`].
    pub fn disable(&self) -> Result<(), MotionError> {
        self.store
            .update_retry(COMMAND_ATTEMPTS, |s| {
                s.motion.enabled = false;
                s.motion.moving = false;
            })
            .ok_or(MotionError::StateBusy)?;
        self.driver.lock().set_enabled(false);
        info!("Stepper disabled");
        Ok(())
    }

    /// Start a relative move of `steps` steps.
    ///
    /// `steps` is clamped to `1..=max_move_steps`. A `speed_us` of 0 keeps
    /// the current pacing, anything else is clamped into the configured
    /// range. A move issued while moving replaces the previous target.
    ///
    /// Returns the new target.
    ///
    /// # Errors
    /// `NotEnabled` if the enable line is released, `HomingActive` while a
    /// homing run owns the stepper, `SessionMove` while a logging move does.
    pub fn move_steps(&self, steps: u32, forward: bool, speed_us: u32) -> Result<i64, MotionError> {
        self.start_move(steps, forward, speed_us, false)
    }

    /// Start a move, optionally claiming the stepper for a logging move.
    fn start_move(
        &self,
        steps: u32,
        forward: bool,
        speed_us: u32,
        claim: bool,
    ) -> Result<i64, MotionError> {
        let steps = steps.clamp(1, self.config.max_move_steps.max(1)) as i64;
        let speed = (speed_us != 0).then(|| self.config.clamp_speed(speed_us));
        let now = clock::monotonic_us();

        let target = self
            .store
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
                if let Some(speed) = speed {
                    m.speed_interval_us = speed;
                }
                m.session_move = claim;
                m.direction_forward = forward;
                m.target = if forward { m.position + steps } else { m.position - steps };
                m.moving = true;
                m.last_step_us = now;
                Ok(m.target)
            })
            .ok_or(MotionError::StateBusy)??;

        debug!(
            "Move {} steps {} -> target {}",
            steps,
            if forward { "forward" } else { "backward" },
            target
        );
        Ok(target)
    }

    /// Stop the current move. The position stays where it is.
    ///
    /// # Errors
    /// `SessionMove` while a logging move owns the stepper.
    pub fn stop(&self) -> Result<(), MotionError> {
        self.store
            .update_retry(COMMAND_ATTEMPTS, |s| {
                if s.motion.session_move {
                    return Err(MotionError::SessionMove);
                }
                s.motion.moving = false;
                Ok(())
            })
            .ok_or(MotionError::StateBusy)?
    }

    /// Declare the current position as zero without moving.
    ///
    /// # Errors
    /// `SessionMove` while a logging move owns the stepper.
    pub fn zero(&self) -> Result<(), MotionError> {
        self.store
            .update_retry(COMMAND_ATTEMPTS, |s| {
                if s.motion.session_move {
                    return Err(MotionError::SessionMove);
                }
                s.motion.position = 0;
                s.motion.target = 0;
                s.motion.homed = true;
                s.motion.home_status = HomeStatus::ManualZero;
                Ok(())
            })
            .ok_or(MotionError::StateBusy)??;
        info!("Position zeroed");
        Ok(())
    }

    // ─── Stepping loop ──────────────────────────────────────────────

    /// Run one stepping cycle at monotonic time `now_us`.
    pub fn poll(&self, now_us: u64) -> StepOutcome {
        let m = self.store.snapshot().motion;
        if m.homing || !(m.enabled && m.moving) {
            return StepOutcome::Idle;
        }
        if now_us.saturating_sub(m.last_step_us) < m.speed_interval_us as u64 {
            return StepOutcome::Waiting;
        }

        let committed = self.store.update(|s| {
            let m = &mut s.motion;
            if m.homing || !(m.enabled && m.moving) {
                return None;
            }
            if reached(m) {
                m.moving = false;
                return Some((m.direction_forward, false));
            }
            m.position += if m.direction_forward { 1 } else { -1 };
            m.last_step_us = now_us;
            if reached(m) {
                m.moving = false;
            }
            Some((m.direction_forward, true))
        });

        match committed {
            Acquire::Acquired(Some((forward, pulse))) => {
                if pulse {
                    let mut driver = self.driver.lock();
                    driver.set_direction(forward);
                    driver.pulse(self.config.pulse_width());
                }
                let arrived = !self.store.snapshot().motion.moving;
                if arrived {
                    debug!("Move arrived");
                    StepOutcome::Arrived
                } else {
                    StepOutcome::Stepped
                }
            }
            Acquire::Acquired(None) => StepOutcome::Idle,
            Acquire::Stale(_) | Acquire::Failed => StepOutcome::Waiting,
        }
    }

    /// Spawn the stepping loop. It runs until `running` is cleared.
    pub fn spawn_stepping_loop(
        self: &Arc<Self>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("stepper".into())
            .spawn(move || {
                info!("Stepping loop started");
                let active = Duration::from_millis(this.config.active_sleep_ms);
                let idle = Duration::from_millis(this.config.idle_sleep_ms);
                while running.load(Ordering::SeqCst) {
                    let pause = match this.poll(clock::monotonic_us()) {
                        StepOutcome::Idle => idle,
                        _ => active,
                    };
                    thread::sleep(pause);
                }
                info!("Stepping loop stopped");
            })
    }

    // ─── Blocking helpers ───────────────────────────────────────────

    /// Move and wait for arrival: enable, move, wait, disable, settle.
    ///
    /// The stepper is owned by this move until it ends: external move, stop
    /// and zero are refused meanwhile. A move that ends short of its target
    /// (disable, cancel) counts as interrupted.
    ///
    /// Returns `Ok(false)` if the move was interrupted or `cancel` fired
    /// during the settle.
    pub fn move_blocking(
        &self,
        steps: u32,
        forward: bool,
        settle: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, MotionError> {
        self.enable()?;
        let arrived = self
            .start_move(steps, forward, 0, true)
            .map(|_| self.wait_arrival(cancel));
        if arrived.is_ok() {
            self.release_session_move();
        }
        self.disable()?;
        if !arrived? {
            return Ok(false);
        }
        Ok(cancel.sleep(settle))
    }

    /// Wait until the current move ends. `true` only if it ended on target.
    fn wait_arrival(&self, cancel: &CancelToken) -> bool {
        let pause = Duration::from_millis(self.config.active_sleep_ms.max(1));
        loop {
            let m = self.store.snapshot().motion;
            if m.abort || cancel.is_cancelled() {
                return false;
            }
            if !m.moving {
                if m.position != m.target {
                    warn!(
                        "Move ended at {} short of target {}",
                        m.position, m.target
                    );
                    return false;
                }
                return true;
            }
            thread::sleep(pause);
        }
    }

    fn release_session_move(&self) {
        let landed = self.store.update_retry(COMMAND_ATTEMPTS, |s| {
            s.motion.session_move = false;
            s.motion.moving = false;
        });
        if landed.is_none() {
            warn!("Stepper ownership could not be released under contention");
        }
    }
}

/// Direction-aware arrival check.
fn reached(m: &MotionState) -> bool {
    if m.direction_forward {
        m.position >= m.target
    } else {
        m.position <= m.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{Mechanics, SimLimitSensor, SimStepper};

    #[test]
    fn test_move_rejected_when_disabled() {
        let (motion, _) = controller();
        assert_eq!(motion.move_steps(10, true, 0), Err(MotionError::NotEnabled));
    }

    #[test]
    fn test_move_clamps_steps_and_speed() {
        let (motion, _) = controller();
        motion.enable().unwrap();

        assert_eq!(motion.move_steps(0, true, 5), Ok(1));
        let m = motion.store.snapshot().motion;
        assert_eq!(m.speed_interval_us, motion.config.min_speed_us);

        let max = motion.config.max_move_steps as i64;
        assert_eq!(motion.move_steps(u32::MAX, false, 0), Ok(-max));
        let m = motion.store.snapshot().motion;
        assert_eq!(m.speed_interval_us, motion.config.min_speed_us);
        assert!(!m.direction_forward);
    }

    #[test]
    fn test_poll_steps_once_per_interval() {
        let (motion, mechanics) = controller();
        motion.enable().unwrap();
        motion.move_steps(2, true, 1000).unwrap();
        let start = motion.store.snapshot().motion.last_step_us;

        assert_eq!(motion.poll(start + 10), StepOutcome::Waiting);
        assert_eq!(motion.poll(start + 1000), StepOutcome::Stepped);
        assert_eq!(motion.poll(start + 1500), StepOutcome::Waiting);
        assert_eq!(motion.poll(start + 2000), StepOutcome::Arrived);
        assert_eq!(motion.poll(start + 9000), StepOutcome::Idle);

        let m = motion.store.snapshot().motion;
        assert_eq!(m.position, 2);
        assert!(!m.moving);
        assert_eq!(mechanics.position(), 2);
    }

    #[test]
    fn test_disable_clears_moving() {
        let (motion, mechanics) = controller();
        motion.enable().unwrap();
        motion.move_steps(100, false, 0).unwrap();
        motion.disable().unwrap();

        let m = motion.store.snapshot().motion;
        assert!(!m.enabled && !m.moving);
        assert!(!mechanics.is_enabled());
        assert_eq!(motion.poll(u64::MAX), StepOutcome::Idle);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (motion, _) = controller();
        motion.enable().unwrap();
        motion.move_steps(100, true, 0).unwrap();
        motion.stop().unwrap();
        let first = motion.store.snapshot().motion;
        motion.stop().unwrap();
        let second = motion.store.snapshot().motion;

        assert!(!first.moving);
        assert_eq!(first.position, second.position);
        assert_eq!(first.target, second.target);
        assert!(second.enabled);
    }

    #[test]
    fn test_zero_sets_reference() {
        let (motion, _) = controller();
        motion.enable().unwrap();
        motion.move_steps(3, true, 1000).unwrap();
        for t in 1..=3 {
            motion.poll(u64::MAX / 4 + t * 10_000);
        }
        motion.zero().unwrap();

        let m = motion.store.snapshot().motion;
        assert_eq!((m.position, m.target), (0, 0));
        assert!(m.homed);
        assert_eq!(m.home_status, HomeStatus::ManualZero);
    }

    #[test]
    fn test_session_move_owns_stepper() {
        let (motion, mechanics) = controller();
        let motion = Arc::new(motion);
        let mover = spawn_session_move(&motion, 5);

        assert_eq!(motion.stop(), Err(MotionError::SessionMove));
        assert_eq!(motion.zero(), Err(MotionError::SessionMove));
        assert_eq!(motion.move_steps(10, true, 0), Err(MotionError::SessionMove));
        assert_eq!(motion.store.snapshot().motion.target, -5);

        for t in 1..=5 {
            motion.poll(u64::MAX / 4 + t * 10_000);
        }
        assert_eq!(mover.join().unwrap(), Ok(true));

        let m = motion.store.snapshot().motion;
        assert_eq!(m.position, -5);
        assert!(!m.session_move && !m.enabled);
        assert_eq!(mechanics.position(), -5);

        motion.enable().unwrap();
        assert!(motion.stop().is_ok());
    }

    #[test]
    fn test_session_move_cut_short_is_interrupted() {
        let (motion, _) = controller();
        let motion = Arc::new(motion);
        let mover = spawn_session_move(&motion, 5);

        motion.poll(u64::MAX / 4 + 10_000);
        motion.poll(u64::MAX / 4 + 20_000);
        motion.disable().unwrap();
        assert_eq!(mover.join().unwrap(), Ok(false));

        let m = motion.store.snapshot().motion;
        assert_eq!((m.position, m.target), (-2, -5));
        assert!(!m.session_move && !m.moving);
    }

    // ─── Helpers ────────────────────────────────────────────────────

    /// Run a backward `move_blocking` on its own thread and wait until it
    /// owns the stepper.
    fn spawn_session_move(
        motion: &Arc<MotionController>,
        steps: u32,
    ) -> JoinHandle<Result<bool, MotionError>> {
        let cancel = CancelToken::new(Arc::clone(&motion.store));
        let worker = Arc::clone(motion);
        let handle =
            thread::spawn(move || worker.move_blocking(steps, false, Duration::ZERO, &cancel));
        for _ in 0..500 {
            if motion.store.snapshot().motion.session_move {
                return handle;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("session move never started");
    }

    fn controller() -> (MotionController, Arc<Mechanics>) {
        let mechanics = Arc::new(Mechanics::new(0, None));
        let config = MotionConfig {
            max_move_steps: 50,
            ..MotionConfig::default()
        };
        let motion = MotionController::new(
            Arc::new(StateStore::default()),
            Box::new(SimStepper::new(Arc::clone(&mechanics))),
            Arc::new(SimLimitSensor::new(Arc::clone(&mechanics))),
            config,
        );
        (motion, mechanics)
    }
}
