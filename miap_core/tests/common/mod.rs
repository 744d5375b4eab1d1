//! Shared bench for integration tests: a started instrument over the
//! simulation rig with millisecond-scale timings and a temporary storage root.

#![allow(dead_code)]

use miap_common::hal::config::InstrumentConfig;
use miap_core::Instrument;
use miap_core::drivers::simulation::SimulatedRig;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Steps between the simulated limit sensor and the start position.
pub const SENSOR_DISTANCE: u32 = 30;

/// Instrument, rig handles and storage root kept alive together.
pub struct Bench {
    pub instrument: Instrument,
    pub rig: SimulatedRig,
    pub dir: TempDir,
}

impl Bench {
    /// Bench with the default fast configuration, loops started.
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    /// Bench with `adjust` applied to the fast configuration, loops started.
    pub fn start_with(adjust: impl FnOnce(&mut InstrumentConfig)) -> Self {
        let bench = Self::build(adjust);
        bench.instrument.start().unwrap();
        bench.wait_for_readings();
        bench
    }

    /// Bench without started loops.
    pub fn build(adjust: impl FnOnce(&mut InstrumentConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = fast_config(&dir);
        adjust(&mut config);
        let rig = SimulatedRig::new(Some(SENSOR_DISTANCE));
        let instrument = Instrument::new(config, rig.hardware()).unwrap();
        Self {
            instrument,
            rig,
            dir,
        }
    }

    /// Block until the sampler has published a temperature reading for
    /// every simulated sensor.
    pub fn wait_for_readings(&self) {
        let sensors = self.rig.temperature.count();
        wait_until(Duration::from_secs(5), || {
            self.instrument.state_snapshot().temperature_count() == sensors
        });
    }

    /// Path under the storage root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Names of the regular files in `rel_dir`, sorted.
    pub fn files_in(&self, rel_dir: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path(rel_dir))
            .map(|read| {
                read.filter_map(Result::ok)
                    .filter(|e| e.path().is_file())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.instrument.shutdown();
    }
}

/// Configuration scaled down to millisecond timings.
pub fn fast_config(dir: &TempDir) -> InstrumentConfig {
    let mut config = InstrumentConfig::default();
    config.device.storage_root = dir.path().to_path_buf();

    config.motion.default_speed_us = 20;
    config.motion.min_speed_us = 10;
    config.motion.max_speed_us = 100;
    config.motion.homing_step_budget = 2000;
    config.motion.active_sleep_ms = 0;
    config.motion.idle_sleep_ms = 1;

    config.sampler.analog_period_ms = 5;
    config.sampler.temperature_period_ms = 10;
    config.sampler.power_period_ms = 10;

    config.calibration.samples = 6;
    config.calibration.warmup_samples = 2;
    config.calibration.sample_interval_ms = 1;
    config.calibration.settle_ms = 5;

    config.logging.default_duration_s = 0.05;
    config.logging.cycle_steps = 20;
    config.logging.settle_ms = 30;
    config.logging.sample_period_ms = 5;
    config.logging.no_sample_retry_ms = 10;
    config.logging.storage_retry_ms = 10;

    config.storage.lock_timeout_ms = 50;
    config.thermal.period_ms = 10;
    config
}

/// Poll `done` until it holds, failing the test after `timeout`.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < timeout, "condition not reached in {timeout:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Record lines of a log file, empty if it does not exist.
pub fn records(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}
