//! Instrument context and background task management.
//!
//! [`Instrument`] owns every component, the shared state store and the
//! storage arbiter. It starts the periodic loops (stepping, sampling,
//! thermal), restores persisted settings, and shuts everything down.
//! The command surface is implemented on it in [`crate::commands`].
//!
//! ```text
//!                    ┌──────────────┐
//!   commands ───────►│  Instrument  │
//!                    └──────┬───────┘
//!      ┌──────────┬─────────┼──────────┬──────────────┐
//!      ▼          ▼         ▼          ▼              ▼
//!   Motion     Sampler   Thermal   Orchestrator   StorageArbiter
//!      └──────────┴────► StateStore ◄──┘
//! ```

use crate::cancel::CancelToken;
use crate::drivers::Hardware;
use crate::error::{ActionError, ActionResult};
use crate::motion::MotionController;
use crate::orchestrator::{Orchestrator, SessionConfig};
use crate::sampler::{Sampler, SamplerInputs};
use crate::settings::{LoggingIntent, RuntimeSettings};
use crate::state::{SharedState, StateStore};
use crate::storage::StorageArbiter;
use crate::storage::maintenance::{StatvfsProbe, UsageProbe};
use crate::thermal::ThermalController;
use miap_common::config::ConfigError;
use miap_common::hal::config::InstrumentConfig;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// The instrument: components, shared state and background tasks.
pub struct Instrument {
    /// Validated configuration
    pub(crate) config: InstrumentConfig,
    pub(crate) store: Arc<StateStore>,
    pub(crate) storage: Arc<StorageArbiter>,
    pub(crate) motion: Arc<MotionController>,
    pub(crate) sampler: Arc<Sampler>,
    pub(crate) thermal: Arc<ThermalController>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) cancel: CancelToken,
    pub(crate) usage_probe: Box<dyn UsageProbe>,
    /// Last logging request, persisted with the runtime settings
    pub(crate) logging_intent: Mutex<LoggingIntent>,
    /// Running flag for the periodic loops
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Instrument {
    /// Build the instrument over `hardware`.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if `config` is inconsistent.
    pub fn new(config: InstrumentConfig, hardware: Hardware) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = Arc::new(StateStore::new(SharedState::new(&config)));
        let storage = Arc::new(StorageArbiter::new(
            config.device.storage_root.clone(),
            &config.storage,
        ));
        let motion = Arc::new(MotionController::new(
            Arc::clone(&store),
            hardware.stepper,
            hardware.limit,
            config.motion.clone(),
        ));
        let sampler = Arc::new(Sampler::new(
            Arc::clone(&store),
            SamplerInputs {
                analog: hardware.analog,
                temperature: hardware.temperature,
                power: hardware.power,
                relay: hardware.relay,
            },
            config.sampler.clone(),
            config.calibration.clone(),
        ));
        let thermal = Arc::new(ThermalController::new(
            Arc::clone(&store),
            hardware.heater,
            hardware.fan,
            config.thermal.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&storage),
            Arc::clone(&motion),
            config.device.device_id.clone(),
            config.logging.clone(),
            &config.storage,
        ));

        info!(
            "Instrument created: device={} storage_root={}",
            config.device.device_id,
            config.device.storage_root.display()
        );

        Ok(Self {
            cancel: CancelToken::new(Arc::clone(&store)),
            logging_intent: Mutex::new(LoggingIntent {
                duration_s: config.logging.default_duration_s,
                ..LoggingIntent::default()
            }),
            config,
            store,
            storage,
            motion,
            sampler,
            thermal,
            orchestrator,
            usage_probe: Box::new(StatvfsProbe),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Replace the filesystem usage probe used by purge.
    pub fn with_usage_probe(mut self, probe: Box<dyn UsageProbe>) -> Self {
        self.usage_probe = probe;
        self
    }

    /// Configuration the instrument was built with.
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Storage arbiter shared with transport adapters (uploads, downloads).
    pub fn storage(&self) -> &StorageArbiter {
        &self.storage
    }

    /// Storage root.
    pub fn storage_root(&self) -> &Path {
        self.storage.root()
    }

    /// Get the running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// `true` between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Start the stepping, sampling and thermal loops.
    ///
    /// # Errors
    /// `ActionError::Spawn` if a loop thread cannot be created; loops
    /// already started are stopped again.
    pub fn start(&self) -> ActionResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Instrument already started");
            return Ok(());
        }
        info!("Starting background loops...");

        let spawned = [
            self.motion.spawn_stepping_loop(self.running_flag()),
            self.sampler.spawn_loop(self.running_flag()),
            self.thermal.spawn_loop(self.running_flag()),
        ];
        let mut tasks = self.tasks.lock();
        let mut failure = None;
        for result in spawned {
            match result {
                Ok(handle) => tasks.push(handle),
                Err(e) => failure = Some(e),
            }
        }
        drop(tasks);

        if let Some(e) = failure {
            error!("Failed to spawn background loop: {}", e);
            self.stop_loops();
            return Err(ActionError::Spawn(e.to_string()));
        }
        info!("Instrument running");
        Ok(())
    }

    /// Restore persisted runtime settings and resume logging if it was active.
    ///
    /// Returns `false` if no settings file exists.
    ///
    /// # Errors
    /// Storage or parse failures; the instrument keeps its defaults then.
    pub fn restore_settings(&self) -> ActionResult<bool> {
        let loaded = {
            let guard = self.storage.acquire()?;
            RuntimeSettings::load_from(&guard, &self.config.storage.settings_file)?
        };
        let Some(settings) = loaded else {
            info!("No runtime settings found, using defaults");
            return Ok(false);
        };

        let speed = self.config.motion.clamp_speed(settings.motion.speed_us);
        self.store.update_retry(10, |s| {
            s.motion.speed_interval_us = speed;
            s.storage.exposed = settings.storage.exposed;
        });
        self.thermal.apply_pid(settings.thermal.pid);
        self.thermal.set_pid_enabled(settings.thermal.pid_enabled);
        *self.logging_intent.lock() = settings.logging.clone();
        info!(
            "Runtime settings restored (speed={}us pid={} exposed={})",
            speed, settings.thermal.pid_enabled, settings.storage.exposed
        );

        let intent = &settings.logging;
        if intent.active {
            if settings.storage.exposed {
                warn!("Logging not resumed: storage is exposed");
            } else {
                let session = SessionConfig::new(
                    &intent.postfix,
                    intent.use_motion_cycle,
                    intent.duration_s,
                    &self.config.logging,
                );
                match self.orchestrator.start_session(session) {
                    Ok(name) => info!("Logging resumed into {}", name),
                    Err(e) => warn!("Logging not resumed: {}", e),
                }
            }
        }
        Ok(true)
    }

    /// Stop logging (keeping the persisted intent), stop the loops and
    /// release the stepper.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        if self.orchestrator.is_active() {
            self.orchestrator.stop_session();
        }
        self.stop_loops();
        if let Some(outcome) = self.motion.wait_homing() {
            info!("Homing task ended: {:?}", outcome);
        }
        self.sampler.wait_calibration();
        if let Err(e) = self.motion.disable() {
            warn!("Failed to disable stepper on shutdown: {}", e);
        }
        info!("Instrument stopped");
    }

    fn stop_loops(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in tasks {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!("Background loop {} panicked", name);
            }
        }
    }
}
