//! Cooperative cancellation bound to the shared `abort` flag.
//!
//! Blocking motion work (homing, logging moves, settle delays) checks a
//! [`CancelToken`] at every physical step and every sleep slice. Nothing is
//! ever cancelled preemptively.

use crate::state::StateStore;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on one sleep slice of [`CancelToken::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Attempts made to land a cancel / reset mutation.
const FLAG_ATTEMPTS: u32 = 20;

/// Handle to the motion abort flag.
#[derive(Clone)]
pub struct CancelToken {
    store: Arc<StateStore>,
}

impl CancelToken {
    /// Token over the `abort` flag of `store`.
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        let landed = self.store.update_retry(FLAG_ATTEMPTS, |s| s.motion.abort = true);
        if landed.is_none() {
            debug!("Abort request could not be recorded under contention");
        }
    }

    /// Clear a pending request. Called at the start of a motion cycle.
    pub fn reset(&self) {
        self.store
            .update_retry(FLAG_ATTEMPTS, |s| s.motion.abort = false);
    }

    /// `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.store.snapshot().motion.abort
    }

    /// Sleep for `duration` in short slices, waking early on cancellation.
    ///
    /// Returns `false` if cancelled before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_and_reset() {
        let store = Arc::new(StateStore::default());
        let token = CancelToken::new(Arc::clone(&store));
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
        assert!(store.snapshot().motion.abort);

        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let store = Arc::new(StateStore::default());
        let token = CancelToken::new(store);

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };

        let started = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn test_sleep_completes_when_not_cancelled() {
        let token = CancelToken::new(Arc::new(StateStore::default()));
        assert!(token.sleep(Duration::from_millis(15)));
    }
}
