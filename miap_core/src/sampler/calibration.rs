//! Zero calibration.
//!
//! With the settling relay energised, the converter is read `samples` times
//! at a fixed cadence. The first `warmup_samples` reads are discarded and the
//! rest are averaged per channel; the averages become the channel offsets.
//! Reads that fail are skipped. If no valid read remains the offsets are left
//! untouched.

use super::Sampler;
use crate::error::SamplerError;
use miap_common::consts::ANALOG_CHANNELS;
use miap_common::hal::types::AnalogFrame;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Attempts made to land the calibration flags.
const FLAG_ATTEMPTS: u32 = 100;

/// Per-channel running sum in `f64`.
#[derive(Debug, Default)]
struct Accumulator {
    sums: [f64; ANALOG_CHANNELS],
    count: u32,
}

impl Accumulator {
    fn add(&mut self, frame: &AnalogFrame) {
        for (sum, v) in self.sums.iter_mut().zip(frame) {
            *sum += *v as f64;
        }
        self.count += 1;
    }

    fn mean(&self) -> Option<AnalogFrame> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(self.sums.map(|sum| (sum / n) as f32))
    }
}

impl Sampler {
    /// Run a zero calibration on the calling thread.
    ///
    /// Returns the new offsets, or `None` if no valid sample was collected.
    ///
    /// # Errors
    /// `AlreadyRunning` if another calibration is in progress; nothing is
    /// changed in that case.
    pub fn calibrate(&self) -> Result<Option<AnalogFrame>, SamplerError> {
        self.begin_calibration()?;
        Ok(self.run_calibration())
    }

    /// Start a zero calibration on a background task.
    ///
    /// The re-entry check happens before this returns.
    pub fn start_calibration(self: &Arc<Self>) -> Result<(), SamplerError> {
        self.begin_calibration()?;

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("calibrate".into())
            .spawn(move || this.run_calibration());
        match spawned {
            Ok(handle) => {
                *self.calibration_task.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.store
                    .update_retry(FLAG_ATTEMPTS, |s| s.calibration.in_progress = false);
                Err(SamplerError::Spawn(e.to_string()))
            }
        }
    }

    /// Wait for a background calibration and return its offsets.
    ///
    /// `None` if no calibration was started since the last wait, or it
    /// collected no samples.
    pub fn wait_calibration(&self) -> Option<AnalogFrame> {
        let handle = self.calibration_task.lock().take()?;
        handle.join().ok().flatten()
    }

    fn begin_calibration(&self) -> Result<(), SamplerError> {
        let claimed = self
            .store
            .update_retry(FLAG_ATTEMPTS, |s| {
                let already = s.calibration.in_progress;
                s.calibration.in_progress = true;
                !already
            })
            .ok_or(SamplerError::StateBusy)?;
        if !claimed {
            warn!("Calibration already in progress");
            return Err(SamplerError::AlreadyRunning);
        }
        Ok(())
    }

    fn run_calibration(&self) -> Option<AnalogFrame> {
        let cfg = &self.calibration;
        info!(
            "Calibration started ({} samples, {} warm-up)",
            cfg.samples, cfg.warmup_samples
        );
        self.inputs.relay.set(true);
        thread::sleep(Duration::from_millis(cfg.settle_ms));

        let interval = Duration::from_millis(cfg.sample_interval_ms);
        let mut acc = Accumulator::default();
        for i in 0..cfg.samples {
            match self.read_frame() {
                Ok(frame) if i >= cfg.warmup_samples => acc.add(&frame),
                Ok(_) => {}
                Err(e) => warn!("Calibration read {} failed: {}", i, e),
            }
            thread::sleep(interval);
        }

        let offsets = acc.mean();
        let landed = self.store.update_retry(FLAG_ATTEMPTS, |s| {
            if let Some(offsets) = offsets {
                s.acquisition.offsets = offsets;
            }
            s.calibration.in_progress = false;
        });
        if landed.is_none() {
            warn!("Calibration result could not be recorded under contention");
        }
        self.inputs.relay.set(false);

        match offsets {
            Some(o) => info!(
                "Calibration done: offsets {:.6}, {:.6}, {:.6} ({} samples)",
                o[0], o[1], o[2], acc.count
            ),
            None => warn!("Calibration collected no samples, offsets unchanged"),
        }
        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedRig;
    use crate::sampler::SamplerInputs;
    use crate::state::StateStore;
    use miap_common::hal::config::{CalibrationConfig, SamplerConfig};

    #[test]
    fn test_calibration_averages_after_warmup() {
        let rig = SimulatedRig::new(None);
        // Two warm-up reads that must be ignored, then four that average to 1.5 / -2.0 / 0.25.
        rig.analog.push_script(0, [100.0, 100.0, 1.0, 2.0, 1.0, 2.0]);
        rig.analog.push_script(1, [100.0, 100.0, -2.0, -2.0, -2.0, -2.0]);
        rig.analog.push_script(2, [100.0, 100.0, 0.0, 0.5, 0.0, 0.5]);
        let (sampler, store) = sampler(&rig);

        let offsets = sampler.calibrate().unwrap();
        assert_eq!(offsets, Some([1.5, -2.0, 0.25]));

        let snap = store.snapshot();
        assert_eq!(snap.acquisition.offsets, [1.5, -2.0, 0.25]);
        assert!(!snap.calibration.in_progress);
        assert!(!rig.relay.is_on());
        assert_eq!(rig.relay.switches(), 2);
    }

    #[test]
    fn test_calibration_without_samples_keeps_offsets() {
        let rig = SimulatedRig::new(None);
        rig.analog.fail_next(u32::MAX);
        let (sampler, store) = sampler(&rig);
        store.update(|s| s.acquisition.offsets = [0.1, 0.2, 0.3]);

        assert_eq!(sampler.calibrate().unwrap(), None);
        let snap = store.snapshot();
        assert_eq!(snap.acquisition.offsets, [0.1, 0.2, 0.3]);
        assert!(!snap.calibration.in_progress);
        assert!(!rig.relay.is_on());
    }

    #[test]
    fn test_calibration_reentry_rejected() {
        let rig = SimulatedRig::new(None).with_analog([0.5; 3], [0.0; 3]);
        let (sampler, store) = sampler(&rig);
        let sampler = Arc::new(sampler);
        store.update(|s| s.acquisition.offsets = [0.1; 3]);

        sampler.start_calibration().unwrap();
        let before = store.snapshot();
        assert!(matches!(
            sampler.start_calibration(),
            Err(SamplerError::AlreadyRunning)
        ));
        assert!(matches!(sampler.calibrate(), Err(SamplerError::AlreadyRunning)));
        assert_eq!(store.snapshot().acquisition.offsets, before.acquisition.offsets);

        assert_eq!(sampler.wait_calibration(), Some([0.5; 3]));
        assert!(!store.snapshot().calibration.in_progress);
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn sampler(rig: &SimulatedRig) -> (Sampler, Arc<StateStore>) {
        let store = Arc::new(StateStore::default());
        let hw = rig.hardware();
        let sampler = Sampler::new(
            Arc::clone(&store),
            SamplerInputs {
                analog: hw.analog,
                temperature: hw.temperature,
                power: hw.power,
                relay: hw.relay,
            },
            SamplerConfig::default(),
            CalibrationConfig {
                samples: 6,
                warmup_samples: 2,
                sample_interval_ms: 1,
                settle_ms: 20,
            },
        );
        (sampler, store)
    }
}
