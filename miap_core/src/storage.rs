//! Storage arbiter and durable-medium operations.
//!
//! Every touch of the storage root goes through a [`StorageGuard`] obtained
//! from the [`StorageArbiter`]. Acquisition waits at most the configured
//! bound (2 s by default) and fails with [`StorageError::Busy`], which is
//! always recoverable.
//!
//! # Module Structure
//!
//! - [`logfile`] - Measurement log files, postfix sanitisation, upload queue
//! - [`files`] - Path sanitisation, browse / read / delete / mark uploaded
//! - [`maintenance`] - Usage probe and purge of uploaded files
//!
//! Operations that need the lock take `&StorageGuard` as proof that it is
//! held. A guard is never kept across a sampling window.

pub mod files;
pub mod logfile;
pub mod maintenance;

use crate::error::{StorageError, StorageResult};
use miap_common::hal::config::StorageConfig;
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Timeout-bounded owner of the storage root.
pub struct StorageArbiter {
    root: PathBuf,
    lock: Mutex<()>,
    timeout: Duration,
}

impl StorageArbiter {
    /// Arbiter over `root` with the lock bound from `config`.
    pub fn new(root: impl Into<PathBuf>, config: &StorageConfig) -> Self {
        Self::with_timeout(root, Duration::from_millis(config.lock_timeout_ms))
    }

    /// Arbiter over `root` with an explicit lock bound.
    pub fn with_timeout(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
            timeout,
        }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the medium within the configured bound.
    ///
    /// # Errors
    /// `StorageError::Busy` if another holder kept it for the whole bound.
    pub fn acquire(&self) -> StorageResult<StorageGuard<'_>> {
        self.acquire_for(self.timeout)
    }

    /// Acquire the medium within `timeout`.
    pub fn acquire_for(&self, timeout: Duration) -> StorageResult<StorageGuard<'_>> {
        match self.lock.try_lock_for(timeout) {
            Some(lock) => {
                trace!("Storage acquired");
                Ok(StorageGuard {
                    _lock: lock,
                    root: &self.root,
                })
            }
            None => {
                debug!("Storage busy after {:?}", timeout);
                Err(StorageError::Busy)
            }
        }
    }
}

/// Scoped exclusive access to the storage root. Released on drop.
pub struct StorageGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    root: &'a Path,
}

impl StorageGuard<'_> {
    /// Storage root.
    pub fn root(&self) -> &Path {
        self.root
    }

    /// `rel` resolved against the storage root.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_guard_resolves_paths_under_root() {
        let arbiter = StorageArbiter::with_timeout("/sdcard", Duration::from_millis(10));
        let guard = arbiter.acquire().unwrap();
        assert_eq!(guard.root(), Path::new("/sdcard"));
        assert_eq!(guard.path("to_upload/a.csv"), PathBuf::from("/sdcard/to_upload/a.csv"));
    }

    #[test]
    fn test_second_holder_times_out_busy() {
        let arbiter = Arc::new(StorageArbiter::with_timeout(
            "/tmp",
            Duration::from_millis(20),
        ));
        let barrier = Arc::new(Barrier::new(2));
        let holder = {
            let arbiter = Arc::clone(&arbiter);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _guard = arbiter.acquire().unwrap();
                barrier.wait();
                thread::sleep(Duration::from_millis(100));
            })
        };

        barrier.wait();
        let started = Instant::now();
        assert!(matches!(arbiter.acquire(), Err(StorageError::Busy)));
        assert!(started.elapsed() < Duration::from_millis(90));
        holder.join().unwrap();

        assert!(arbiter.acquire().is_ok());
    }
}
