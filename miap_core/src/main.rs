//! # MIAP Core Binary
//!
//! Runs the instrument control core against the simulation backend until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! miap_core
//!
//! # Explicit config, storage in a scratch directory
//! miap_core --config config/miap.toml --storage-root /tmp/sd
//!
//! # Verbose logging with a status snapshot every 2 s, JSON output
//! miap_core -v --status-interval 2 --json
//! ```

#![deny(warnings)]

use clap::Parser;
use miap_common::config::{ConfigError, ConfigLoader, LogLevel};
use miap_common::consts::DEFAULT_CONFIG_PATH;
use miap_common::hal::config::InstrumentConfig;
use miap_core::Instrument;
use miap_core::drivers::simulation::SimulatedRig;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Steps between the simulated limit sensor and the start position.
const SIM_SENSOR_DISTANCE: u32 = 400;

/// MIAP Core - instrument control core
#[derive(Parser, Debug)]
#[command(name = "miap_core")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Instrument control core: motion, acquisition, logging and storage")]
#[command(long_about = None)]
struct Args {
    /// Path to the instrument configuration file (miap.toml)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the storage root from the configuration
    #[arg(long, value_name = "DIR")]
    storage_root: Option<PathBuf>,

    /// Seconds between status snapshots at debug level (0 disables)
    #[arg(long, default_value_t = 10)]
    status_interval: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        // Tracing may not be initialized yet.
        eprintln!("MIAP core startup failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut config, from_file) = load_config(&args.config)?;
    setup_tracing(&args, config.shared.log_level);

    info!("MIAP Core v{} starting...", env!("CARGO_PKG_VERSION"));
    if from_file {
        info!("Configuration loaded from {:?}", args.config);
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
    }
    if let Some(root) = args.storage_root {
        info!("Storage root overridden: {}", root.display());
        config.device.storage_root = root;
    }
    config.validate()?;

    let rig = SimulatedRig::new(Some(SIM_SENSOR_DISTANCE));
    let instrument = Instrument::new(config, rig.hardware())?;

    let running = instrument.running_flag();
    instrument.start()?;
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    if let Err(e) = instrument.restore_settings() {
        warn!("Runtime settings not restored: {}", e);
    }

    let status_every = Duration::from_secs(args.status_interval);
    let mut last_status = Instant::now();
    while instrument.is_running() {
        thread::sleep(Duration::from_millis(100));
        if !status_every.is_zero() && last_status.elapsed() >= status_every {
            last_status = Instant::now();
            match serde_json::to_string(&instrument.state_snapshot()) {
                Ok(json) => debug!("Status: {}", json),
                Err(e) => warn!("Status snapshot not serializable: {}", e),
            }
        }
    }

    instrument.shutdown();
    info!("MIAP Core shutdown complete");
    Ok(())
}

/// Load the configuration, falling back to defaults if the file is missing.
///
/// The flag tells whether the file was found.
fn load_config(path: &Path) -> Result<(InstrumentConfig, bool), ConfigError> {
    match InstrumentConfig::load(path) {
        Ok(config) => Ok((config, true)),
        Err(ConfigError::FileNotFound) => Ok((InstrumentConfig::default(), false)),
        Err(e) => Err(e),
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        configured.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
