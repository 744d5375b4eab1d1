//! File operations on the storage root: browse, read, delete, upload queue.

use crate::error::{StorageError, StorageResult};
use crate::storage::StorageGuard;
use miap_common::consts::MAX_REL_PATH_LEN;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use tracing::{info, warn};

/// Validate a path relative to the storage root.
///
/// A leading `/` is stripped. Empty paths, paths longer than
/// [`MAX_REL_PATH_LEN`], and paths containing `..` or `//` are rejected, as is
/// any character outside `[A-Za-z0-9_.\- /()]`.
pub fn sanitize_path(raw: &str) -> StorageResult<String> {
    let rel = raw.strip_prefix('/').unwrap_or(raw);
    let invalid = || StorageError::InvalidPath(raw.to_string());

    if rel.is_empty() || rel.len() > MAX_REL_PATH_LEN {
        return Err(invalid());
    }
    if rel.contains("..") || rel.contains("//") {
        return Err(invalid());
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "_.- /()".contains(c);
    if !rel.chars().all(allowed) {
        return Err(invalid());
    }
    Ok(rel.to_string())
}

/// Last component of a relative path.
fn base_name(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Entry name.
    pub name: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Entry is a directory.
    pub is_dir: bool,
}

/// List `rel_dir` (`""` or `"/"` for the root). Hidden entries are skipped;
/// directories come first, then files, each sorted by name.
pub fn list_dir(guard: &StorageGuard<'_>, rel_dir: &str) -> StorageResult<Vec<FileEntry>> {
    let dir = if rel_dir.trim_matches('/').is_empty() {
        guard.root().to_path_buf()
    } else {
        guard.path(sanitize_path(rel_dir)?)
    };
    let read = fs::read_dir(&dir).map_err(|e| not_found_or(e, rel_dir))?;

    let mut entries = Vec::new();
    for entry in read {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let meta = entry.metadata()?;
        entries.push(FileEntry {
            name,
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
        });
    }
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

/// Read a whole file.
pub fn read_file(guard: &StorageGuard<'_>, rel: &str) -> StorageResult<Vec<u8>> {
    let rel = sanitize_path(rel)?;
    let path = guard.path(&rel);
    if path.is_dir() {
        return Err(StorageError::InvalidPath(rel));
    }
    fs::read(&path).map_err(|e| not_found_or(e, &rel))
}

/// Outcome of a batch delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// Paths removed.
    pub deleted: Vec<String>,
    /// Paths left alone, with the reason.
    pub skipped: Vec<String>,
    /// Paths that could not be removed, with the reason.
    pub failed: Vec<String>,
}

/// Names a batch delete must never remove.
#[derive(Debug, Clone, Copy)]
pub struct Protected<'a> {
    /// Runtime settings file name (compared case-insensitively).
    pub settings_file: &'a str,
    /// Name of the log currently being written, if any.
    pub active_log: Option<&'a str>,
}

impl Protected<'_> {
    fn reason(&self, rel: &str) -> Option<&'static str> {
        let name = base_name(rel);
        if name.eq_ignore_ascii_case(self.settings_file) {
            Some("protected")
        } else if self.active_log == Some(name) {
            Some("active log")
        } else {
            None
        }
    }
}

/// Delete `paths`, skipping protected names. Duplicate requests are ignored.
///
/// Individual failures are reported, never returned as an error.
pub fn delete_files(
    guard: &StorageGuard<'_>,
    paths: &[String],
    protected: Protected<'_>,
) -> DeleteReport {
    let mut report = DeleteReport::default();
    let mut seen = HashSet::new();

    for raw in paths {
        if !seen.insert(raw.as_str()) {
            continue;
        }
        if let Some(reason) = protected.reason(raw) {
            report.skipped.push(format!("{raw} ({reason})"));
            continue;
        }
        let rel = match sanitize_path(raw) {
            Ok(rel) => rel,
            Err(_) => {
                report.failed.push(format!("{raw} (invalid)"));
                continue;
            }
        };
        match fs::remove_file(guard.path(&rel)) {
            Ok(()) => report.deleted.push(raw.clone()),
            Err(e) => {
                warn!("Delete of {} failed: {}", rel, e);
                report.failed.push(format!("{raw} (delete failed)"));
            }
        }
    }

    if !report.deleted.is_empty() {
        info!("Deleted {} file(s)", report.deleted.len());
    }
    report
}

/// Move `name` from the upload queue directory into the uploaded directory.
pub fn mark_uploaded(
    guard: &StorageGuard<'_>,
    to_upload_dir: &str,
    uploaded_dir: &str,
    name: &str,
) -> StorageResult<()> {
    let rel = sanitize_path(name)?;
    let name = base_name(&rel);
    let source = guard.path(to_upload_dir).join(name);
    if !source.is_file() {
        return Err(StorageError::NotFound(name.to_string()));
    }
    let target_dir = guard.path(uploaded_dir);
    fs::create_dir_all(&target_dir)?;
    fs::rename(&source, target_dir.join(name))?;
    info!("Marked {} as uploaded", name);
    Ok(())
}

fn not_found_or(e: io::Error, rel: &str) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(rel.to_string())
    } else {
        StorageError::Io(e)
    }
}
