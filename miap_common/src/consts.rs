//! System-wide constants for the MIAP workspace.
//!
//! Single source of truth for numeric limits and default paths.

/// Number of analog front-end channels.
pub const ANALOG_CHANNELS: usize = 3;

/// Maximum number of temperature sensors on the bus.
pub const MAX_TEMP_SENSORS: usize = 8;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/miap/miap.toml";

/// Default storage root (mount point of the durable medium).
pub const DEFAULT_STORAGE_ROOT: &str = "/sdcard";

/// Directory (relative to the storage root) holding files awaiting upload.
pub const DEFAULT_TO_UPLOAD_DIR: &str = "to_upload";

/// Directory (relative to the storage root) holding uploaded files.
pub const DEFAULT_UPLOADED_DIR: &str = "uploaded";

/// Runtime settings file name in the storage root. Never deleted by file operations.
pub const DEFAULT_SETTINGS_FILE: &str = "config.toml";

/// Extension of measurement log files.
pub const LOG_FILE_EXTENSION: &str = "csv";

/// Longest accepted log name postfix.
pub const MAX_POSTFIX_LEN: usize = 255;

/// Longest accepted relative path for file operations.
pub const MAX_REL_PATH_LEN: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(ANALOG_CHANNELS > 0);
        assert!(MAX_TEMP_SENSORS > 0 && MAX_TEMP_SENSORS <= 16);
        assert!(MAX_POSTFIX_LEN <= MAX_REL_PATH_LEN);
        assert_ne!(DEFAULT_TO_UPLOAD_DIR, DEFAULT_UPLOADED_DIR);
    }
}
