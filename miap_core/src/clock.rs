//! Monotonic and wall-clock time sources.
//!
//! Step pacing and file ageing use the monotonic clock (process-relative,
//! never jumps). Records carry wall-clock UTC timestamps.

use chrono::{DateTime, Utc};
use std::sync::LazyLock;
use std::time::Instant;

/// Process start reference for the monotonic clock.
static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Microseconds since process start.
pub fn monotonic_us() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}

/// Milliseconds since process start.
pub fn monotonic_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// A wall-clock instant in the two forms written to measurement records.
#[derive(Debug, Clone, PartialEq)]
pub struct WallStamp {
    /// UTC, second resolution: `2026-01-13T21:35:00Z`.
    pub iso: String,
    /// Unix epoch milliseconds.
    pub epoch_ms: i64,
}

impl WallStamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from an explicit UTC time.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            iso: at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            epoch_ms: at.timestamp_millis(),
        }
    }
}

/// Compact UTC stamp used in log file names: `20260113_213500`.
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = monotonic_us();
        assert!(b >= a + 1000);
    }

    #[test]
    fn test_wall_stamp_formats() {
        let at = Utc.with_ymd_and_hms(2026, 1, 13, 21, 35, 0).unwrap();
        let stamp = WallStamp::from_datetime(at);
        assert_eq!(stamp.iso, "2026-01-13T21:35:00Z");
        assert_eq!(stamp.epoch_ms, at.timestamp_millis());
        assert_eq!(file_stamp(at), "20260113_213500");
    }
}
