//! Measurement log files.
//!
//! A log file lives in the storage root while it is being written and is
//! moved into the upload queue directory when it is rotated or the session
//! ends. Records are appended and flushed one line at a time; files carry no
//! header line.

use crate::clock::{self, file_stamp};
use crate::error::StorageResult;
use crate::storage::StorageGuard;
use chrono::{DateTime, Utc};
use miap_common::consts::{LOG_FILE_EXTENSION, MAX_POSTFIX_LEN};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Highest numeric suffix tried before giving up on a unique name.
const MAX_COLLISION_SUFFIX: u32 = 999;

/// Reduce a user-supplied name postfix to a filesystem-safe token.
///
/// ASCII alphanumerics, `_` and `-` are kept, whitespace becomes `_`,
/// everything else is dropped. Trailing `_` are trimmed and the result is
/// capped at [`MAX_POSTFIX_LEN`] characters.
pub fn sanitize_postfix(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .take(MAX_POSTFIX_LEN)
        .collect();
    let trimmed = out.trim_end_matches('_').len();
    out.truncate(trimmed);
    out
}

/// File name for a log opened at `at`, without collision suffix.
pub fn log_file_name(device_id: &str, at: DateTime<Utc>, postfix: &str) -> String {
    let stem = log_file_stem(device_id, at, postfix);
    format!("{stem}.{LOG_FILE_EXTENSION}")
}

fn log_file_stem(device_id: &str, at: DateTime<Utc>, postfix: &str) -> String {
    if postfix.is_empty() {
        format!("{}_{}", device_id, file_stamp(at))
    } else {
        format!("{}_{}_{}", device_id, file_stamp(at), postfix)
    }
}

/// An open measurement log.
#[derive(Debug)]
pub struct LogFile {
    file: File,
    name: String,
    path: PathBuf,
    opened_ms: u64,
}

impl LogFile {
    /// Create a new log in the storage root.
    ///
    /// If the name is taken a numeric suffix (`_1`, `_2`, ...) is appended.
    ///
    /// # Errors
    /// `StorageError::Io` if the file cannot be created.
    pub fn create(
        guard: &StorageGuard<'_>,
        device_id: &str,
        postfix: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Self> {
        let stem = log_file_stem(device_id, at, postfix);
        for suffix in 0..=MAX_COLLISION_SUFFIX {
            let name = if suffix == 0 {
                log_file_name(device_id, at, postfix)
            } else {
                format!("{stem}_{suffix}.{LOG_FILE_EXTENSION}")
            };
            let path = guard.path(&name);
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => {
                    info!("Log file opened: {}", path.display());
                    return Ok(Self {
                        file,
                        name,
                        path,
                        opened_ms: clock::monotonic_ms(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Log name {} taken", name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free log name for {stem}"),
        )
        .into())
    }

    /// File name (no directory).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path while the file is open.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Monotonic time the file was opened [ms].
    pub fn opened_ms(&self) -> u64 {
        self.opened_ms
    }

    /// Age of the file [ms].
    pub fn age_ms(&self) -> u64 {
        clock::monotonic_ms().saturating_sub(self.opened_ms)
    }

    /// Append one record line and flush it.
    pub fn append(&mut self, _guard: &StorageGuard<'_>, line: &str) -> StorageResult<()> {
        self.file.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.file.write_all(b"\n")?;
        }
        self.file.flush()?;
        Ok(())
    }

    /// Close the file and move it into `to_upload_dir` under the storage root.
    ///
    /// Returns the new path.
    pub fn queue_for_upload(
        self,
        guard: &StorageGuard<'_>,
        to_upload_dir: &str,
    ) -> StorageResult<PathBuf> {
        let Self { file, name, path, .. } = self;
        file.sync_all()?;
        drop(file);

        let dir = guard.path(to_upload_dir);
        fs::create_dir_all(&dir)?;
        let target = dir.join(&name);
        fs::rename(&path, &target)?;
        info!("Log file queued for upload: {}", target.display());
        Ok(target)
    }

    /// Close the file in place.
    pub fn close(self) {
        if let Err(e) = self.file.sync_all() {
            debug!("Sync on close of {} failed: {}", self.name, e);
        }
        info!("Log file closed: {}", self.path.display());
    }
}
