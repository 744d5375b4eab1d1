//! Storage maintenance: usage probing and purge of uploaded files.

use crate::error::StorageResult;
use crate::storage::StorageGuard;
use nix::sys::statvfs::statvfs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Filesystem usage source.
pub trait UsageProbe: Send + Sync {
    /// Used share of the filesystem holding `path` [%].
    fn usage_percent(&self, path: &Path) -> io::Result<u8>;
}

/// [`UsageProbe`] backed by `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl UsageProbe for StatvfsProbe {
    fn usage_percent(&self, path: &Path) -> io::Result<u8> {
        let stats = statvfs(path).map_err(io::Error::from)?;
        let frsize = stats.fragment_size() as u64;
        let total = stats.blocks() as u64 * frsize;
        if total == 0 {
            return Err(io::Error::other("filesystem reports zero size"));
        }
        let avail = stats.blocks_available() as u64 * frsize;
        let used = total.saturating_sub(avail);
        Ok((used * 100 / total) as u8)
    }
}

/// Delete the oldest regular files of `uploaded_dir` until usage of the
/// storage root is at or below `max_percent`.
///
/// Returns the number of files removed. Files that fail to delete are
/// skipped.
pub fn purge_uploaded(
    guard: &StorageGuard<'_>,
    uploaded_dir: &str,
    max_percent: u8,
    probe: &dyn UsageProbe,
) -> StorageResult<usize> {
    let mut usage = probe.usage_percent(guard.root())?;
    if usage <= max_percent {
        debug!("Storage usage {}% within {}%", usage, max_percent);
        return Ok(0);
    }

    let mut files = uploaded_files(&guard.path(uploaded_dir))?;
    files.sort();

    let mut removed = 0;
    for (_, path) in files {
        if usage <= max_percent {
            break;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                usage = probe.usage_percent(guard.root())?;
            }
            Err(e) => warn!("Failed to purge {}: {}", path.display(), e),
        }
    }

    info!(
        "Purged {} uploaded file(s), usage now {}% (max {}%)",
        removed, usage, max_percent
    );
    Ok(removed)
}

/// Regular, non-hidden files of `dir` with their modification time.
fn uploaded_files(dir: &Path) -> io::Result<Vec<(SystemTime, PathBuf)>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in read {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push((meta.modified()?, entry.path()));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageArbiter;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_statvfs_probe_reports_a_percentage() {
        let dir = TempDir::new().unwrap();
        let usage = StatvfsProbe.usage_percent(dir.path()).unwrap();
        assert!(usage <= 100);
    }

    #[test]
    fn test_purge_within_limit_removes_nothing() {
        let (dir, arbiter) = storage_with_uploaded(&["a.csv"]);
        let probe = FakeProbe::new(50, 10);

        let guard = arbiter.acquire().unwrap();
        assert_eq!(purge_uploaded(&guard, "uploaded", 80, &probe).unwrap(), 0);
        assert!(dir.path().join("uploaded/a.csv").exists());
    }

    #[test]
    fn test_purge_removes_oldest_first_until_within_limit() {
        let (dir, arbiter) = storage_with_uploaded(&["oldest.csv", "middle.csv", "newest.csv"]);
        // 95% before, -10% per delete: two deletes reach 75%.
        let probe = FakeProbe::new(95, 10);

        let guard = arbiter.acquire().unwrap();
        assert_eq!(purge_uploaded(&guard, "uploaded", 80, &probe).unwrap(), 2);
        assert!(!dir.path().join("uploaded/oldest.csv").exists());
        assert!(!dir.path().join("uploaded/middle.csv").exists());
        assert!(dir.path().join("uploaded/newest.csv").exists());
    }

    #[test]
    fn test_purge_without_uploaded_dir() {
        let dir = TempDir::new().unwrap();
        let arbiter = StorageArbiter::with_timeout(dir.path(), Duration::from_millis(50));
        let guard = arbiter.acquire().unwrap();
        let probe = FakeProbe::new(99, 10);
        assert_eq!(purge_uploaded(&guard, "uploaded", 80, &probe).unwrap(), 0);
    }

    // ─── Helpers ────────────────────────────────────────────────────

    /// Usage drops by `step` percent each time a file is removed.
    struct FakeProbe {
        usage: AtomicU8,
        step: u8,
        dir_checked: AtomicU8,
    }

    impl FakeProbe {
        fn new(usage: u8, step: u8) -> Self {
            Self {
                usage: AtomicU8::new(usage),
                step,
                dir_checked: AtomicU8::new(0),
            }
        }
    }

    impl UsageProbe for FakeProbe {
        fn usage_percent(&self, _path: &Path) -> io::Result<u8> {
            // First call reports the initial usage, later calls follow a delete.
            if self.dir_checked.fetch_add(1, Ordering::SeqCst) > 0 {
                let now = self.usage.load(Ordering::SeqCst).saturating_sub(self.step);
                self.usage.store(now, Ordering::SeqCst);
            }
            Ok(self.usage.load(Ordering::SeqCst))
        }
    }

    fn storage_with_uploaded(names: &[&str]) -> (TempDir, StorageArbiter) {
        let dir = TempDir::new().unwrap();
        let uploaded = dir.path().join("uploaded");
        fs::create_dir(&uploaded).unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for (i, name) in names.iter().enumerate() {
            let path = uploaded.join(name);
            fs::write(&path, "x").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(60 * i as u64)).unwrap();
        }
        let arbiter = StorageArbiter::with_timeout(dir.path(), Duration::from_millis(50));
        (dir, arbiter)
    }
}
