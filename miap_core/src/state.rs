//! Shared state record and its timeout-bounded store.
//!
//! Every task communicates through one [`SharedState`] record held by a
//! [`StateStore`]. The store never blocks a caller indefinitely:
//!
//! | Operation | Bound | On timeout |
//! |-----------|-------|------------|
//! | [`StateStore::try_snapshot`] | 1 ms | last published copy ([`Acquire::Stale`]) |
//! | [`StateStore::update`] | 50 ms | mutation skipped ([`Acquire::Failed`]) |
//!
//! A mutation is applied and published while the live lock is held, so a
//! reader never observes a partially-applied update and published copies
//! appear in commit order.

use crate::faults::FaultTable;
use miap_common::hal::config::InstrumentConfig;
use miap_common::hal::types::{AnalogFrame, PowerReading, Temperatures};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Lock bound for snapshot reads.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(1);

/// Lock bound for mutations.
pub const UPDATE_TIMEOUT: Duration = Duration::from_millis(50);

// ─── State record ───────────────────────────────────────────────────

/// Latest acquisition results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquisitionState {
    /// Offset-corrected channel readings. Written by the sampler only.
    pub channels: AnalogFrame,
    /// Per-channel zero offsets. Written by calibration only.
    pub offsets: AnalogFrame,
    /// Averages of the latest calibration pass. Written by the logging session only.
    pub calibrated: AnalogFrame,
    /// Temperatures in °C; length is the sensor count.
    pub temperatures: Temperatures,
    /// Latest power monitor reading.
    pub power: PowerReading,
    /// Monotonic time of the last analog update [ms].
    pub last_update_ms: u64,
}

/// How the current position reference was established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeStatus {
    /// No reference since start.
    #[default]
    Never,
    /// Declared by a zero request.
    ManualZero,
    /// Limit sensor asserted during homing.
    Sensor,
    /// Homing ran out of step budget.
    BudgetExhausted,
    /// Homing was cancelled.
    Aborted,
    /// Motion was disabled during homing.
    Disabled,
}

/// Stepper state.
///
/// Invariant: `moving ⇒ enabled`.
#[derive(Debug, Clone, Serialize)]
pub struct MotionState {
    /// Driver enable line asserted.
    pub enabled: bool,
    /// A move toward `target` is in progress.
    pub moving: bool,
    /// A homing run owns the stepper.
    pub homing: bool,
    /// A logging move owns the stepper; external move, stop and zero are
    /// refused.
    pub session_move: bool,
    /// Direction of the current or last move.
    pub direction_forward: bool,
    /// Step pacing interval [µs].
    pub speed_interval_us: u32,
    /// Absolute position [steps].
    pub position: i64,
    /// Move target [steps].
    pub target: i64,
    /// One-shot cancellation request.
    pub abort: bool,
    /// Monotonic time of the last step [µs].
    pub last_step_us: u64,
    /// A reference has been established.
    pub homed: bool,
    /// How the reference was established.
    pub home_status: HomeStatus,
}

impl Default for MotionState {
    fn default() -> Self {
        Self {
            enabled: false,
            moving: false,
            homing: false,
            session_move: false,
            direction_forward: true,
            speed_interval_us: miap_common::hal::consts::DEFAULT_SPEED_US,
            position: 0,
            target: 0,
            abort: false,
            last_step_us: 0,
            homed: false,
            home_status: HomeStatus::Never,
        }
    }
}

/// Logging session state, owned by the session task while active.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoggingState {
    /// A session is running (or has been requested to).
    pub active: bool,
    /// Name of the open log file, empty when none.
    pub filename: String,
    /// Motor-assisted cycle.
    pub use_motion_cycle: bool,
    /// Averaging window [s].
    pub averaging_duration_s: f32,
    /// The session has homed once.
    pub homed_once: bool,
    /// Monotonic time the current file was opened [ms].
    pub file_start_ms: u64,
}

/// Zero calibration state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CalibrationState {
    /// Guards against re-entry.
    pub in_progress: bool,
}

/// Heater PID tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct PidSettings {
    /// Proportional gain.
    pub kp: f32,
    /// Integral gain.
    pub ki: f32,
    /// Derivative gain.
    pub kd: f32,
    /// Target temperature [°C].
    pub setpoint_c: f32,
    /// Index of the controlling temperature sensor.
    pub sensor_index: usize,
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            setpoint_c: 25.0,
            sensor_index: 0,
        }
    }
}

/// Heater / fan outputs and PID state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ThermalState {
    /// Heater duty [%].
    pub heater_power: f32,
    /// Fan duty [%].
    pub fan_power: f32,
    /// PID loop drives the heater.
    pub pid_enabled: bool,
    /// PID tuning.
    pub pid: PidSettings,
    /// Last PID output [%].
    pub pid_output: f32,
}

/// Durable medium state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StorageState {
    /// Medium is exposed to an external host; the core must not touch it.
    pub exposed: bool,
}

/// The single source of truth shared by every task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedState {
    /// Acquisition results.
    pub acquisition: AcquisitionState,
    /// Stepper.
    pub motion: MotionState,
    /// Logging session.
    pub logging: LoggingState,
    /// Zero calibration.
    pub calibration: CalibrationState,
    /// Heater and fan.
    pub thermal: ThermalState,
    /// Durable medium.
    pub storage: StorageState,
    /// Raised faults.
    pub faults: FaultTable,
}

impl SharedState {
    /// Initial state for `config`.
    pub fn new(config: &InstrumentConfig) -> Self {
        let mut state = Self::default();
        state.motion.speed_interval_us = config.motion.default_speed_us;
        state
    }

    /// Number of temperature sensors in the last bus reading.
    pub fn temperature_count(&self) -> usize {
        self.acquisition.temperatures.len()
    }
}

// ─── Lock outcome ───────────────────────────────────────────────────

/// Outcome of a timeout-bounded state access.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquire<T> {
    /// The lock was taken within its bound.
    Acquired(T),
    /// The lock was contended; the value is the last published copy.
    Stale(T),
    /// The lock was contended and nothing was done.
    Failed,
}

impl<T> Acquire<T> {
    /// `true` for [`Acquire::Acquired`].
    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquire::Acquired(_))
    }

    /// The value for `Acquired` or `Stale`, `None` for `Failed`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Acquire::Acquired(v) | Acquire::Stale(v) => Some(v),
            Acquire::Failed => None,
        }
    }
}

// ─── Store ──────────────────────────────────────────────────────────

/// Timeout-bounded owner of the [`SharedState`].
pub struct StateStore {
    live: Mutex<SharedState>,
    published: Mutex<Arc<SharedState>>,
    snapshot_timeout: Duration,
    update_timeout: Duration,
}

impl StateStore {
    /// Create a store holding `initial` with the standard bounds.
    pub fn new(initial: SharedState) -> Self {
        Self::with_timeouts(initial, SNAPSHOT_TIMEOUT, UPDATE_TIMEOUT)
    }

    /// Create a store with explicit lock bounds.
    pub fn with_timeouts(
        initial: SharedState,
        snapshot_timeout: Duration,
        update_timeout: Duration,
    ) -> Self {
        Self {
            published: Mutex::new(Arc::new(initial.clone())),
            live: Mutex::new(initial),
            snapshot_timeout,
            update_timeout,
        }
    }

    /// Point-in-time copy, falling back to the last published copy under contention.
    pub fn snapshot(&self) -> SharedState {
        match self.try_snapshot() {
            Acquire::Acquired(s) | Acquire::Stale(s) => s,
            Acquire::Failed => self.last_published(),
        }
    }

    /// Point-in-time copy, reporting whether it is fresh or stale.
    pub fn try_snapshot(&self) -> Acquire<SharedState> {
        match self.live.try_lock_for(self.snapshot_timeout) {
            Some(guard) => Acquire::Acquired(guard.clone()),
            None => {
                trace!("State snapshot contended, serving published copy");
                Acquire::Stale(self.last_published())
            }
        }
    }

    /// Apply `f` under lock. Skipped (returns `Failed`) if the lock stays
    /// contended for the update bound.
    pub fn update<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> Acquire<R> {
        let Some(mut guard) = self.live.try_lock_for(self.update_timeout) else {
            trace!("State update skipped under contention");
            return Acquire::Failed;
        };
        let result = f(&mut guard);
        *self.published.lock() = Arc::new(guard.clone());
        Acquire::Acquired(result)
    }

    /// Apply `f`, retrying up to `attempts` times until the mutation lands.
    ///
    /// Returns `None` if every attempt found the lock contended.
    pub fn update_retry<R>(
        &self,
        attempts: u32,
        mut f: impl FnMut(&mut SharedState) -> R,
    ) -> Option<R> {
        for _ in 0..attempts.max(1) {
            if let Acquire::Acquired(r) = self.update(&mut f) {
                return Some(r);
            }
        }
        None
    }

    fn last_published(&self) -> SharedState {
        self.published.lock().as_ref().clone()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(SharedState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_update_is_visible_to_snapshot() {
        let store = StateStore::default();
        let applied = store.update(|s| {
            s.motion.position = 42;
            s.motion.target = 42;
            7
        });
        assert_eq!(applied, Acquire::Acquired(7));

        let snap = store.snapshot();
        assert_eq!(snap.motion.position, 42);
        assert_eq!(snap.motion.target, 42);
    }

    #[test]
    fn test_snapshot_falls_back_to_published_copy_when_contended() {
        let store = Arc::new(StateStore::default());
        store.update(|s| s.motion.position = 5);

        let barrier = Arc::new(Barrier::new(2));
        let holder = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut guard = store.live.lock();
                // Uncommitted write: must not be visible to the stale read.
                guard.motion.position = 99;
                barrier.wait();
                thread::sleep(Duration::from_millis(30));
                guard.motion.position = 5;
            })
        };

        barrier.wait();
        match store.try_snapshot() {
            Acquire::Stale(s) => assert_eq!(s.motion.position, 5),
            other => panic!("expected stale snapshot, got {other:?}"),
        }
        holder.join().unwrap();
        assert!(store.try_snapshot().is_acquired());
    }

    #[test]
    fn test_update_skipped_when_contended() {
        let store = Arc::new(StateStore::with_timeouts(
            SharedState::default(),
            Duration::from_millis(1),
            Duration::from_millis(5),
        ));

        let barrier = Arc::new(Barrier::new(2));
        let holder = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _guard = store.live.lock();
                barrier.wait();
                thread::sleep(Duration::from_millis(40));
            })
        };

        barrier.wait();
        let outcome = store.update(|s| s.motion.position = 1);
        assert_eq!(outcome, Acquire::Failed);
        holder.join().unwrap();

        assert_eq!(store.snapshot().motion.position, 0);
        assert_eq!(store.update_retry(3, |s| s.motion.position = 1), Some(()));
        assert_eq!(store.snapshot().motion.position, 1);
    }

    #[test]
    fn test_new_uses_configured_default_speed() {
        let mut config = InstrumentConfig::default();
        config.motion.default_speed_us = 1800;
        let state = SharedState::new(&config);
        assert_eq!(state.motion.speed_interval_us, 1800);
        assert_eq!(state.motion.home_status, HomeStatus::Never);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let store = StateStore::default();
        store.update(|s| {
            s.acquisition.temperatures.push(21.5).unwrap();
            s.motion.home_status = HomeStatus::ManualZero;
        });

        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["motion"]["home_status"], "manual_zero");
        assert_eq!(json["acquisition"]["temperatures"][0], 21.5);
    }
}
