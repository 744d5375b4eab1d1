//! Averaging windows and CSV record lines.
//!
//! ```text
//! iso,ts_ms,ch1,ch2,ch3[,t1..tN],bus_v,bus_i,bus_p[,cal1,cal2,cal3]
//! ```
//!
//! Channels and the calibration triple use 6 decimals, temperatures 2, bus
//! values 3. The calibration triple is present only for motor-assisted
//! sessions, where the leading channel values come from the zero pass.

use crate::clock::WallStamp;
use crate::state::SharedState;
use miap_common::consts::{ANALOG_CHANNELS, MAX_TEMP_SENSORS};
use std::fmt::Write;

/// Per-quantity means of one averaging window.
#[derive(Debug, Clone, PartialEq)]
pub struct Averages {
    /// Offset-corrected channel means.
    pub channels: [f64; ANALOG_CHANNELS],
    /// Temperature means, one per sensor present in the window.
    pub temperatures: heapless::Vec<f64, MAX_TEMP_SENSORS>,
    /// Bus voltage [V], current [mA], power [mW] means.
    pub power: [f64; 3],
    /// Snapshots that contributed.
    pub samples: u32,
}

impl Averages {
    /// Channel means narrowed to the state representation.
    pub fn channels_f32(&self) -> [f32; ANALOG_CHANNELS] {
        self.channels.map(|v| v as f32)
    }
}

/// Running sums over state snapshots, accumulated in `f64`.
#[derive(Debug, Default)]
pub struct WindowAccumulator {
    channels: [f64; ANALOG_CHANNELS],
    temperatures: heapless::Vec<(f64, u32), MAX_TEMP_SENSORS>,
    power: [f64; 3],
    samples: u32,
}

impl WindowAccumulator {
    /// Accumulator tracking `temp_count` temperature sensors.
    pub fn new(temp_count: usize) -> Self {
        let mut temperatures = heapless::Vec::new();
        for _ in 0..temp_count.min(MAX_TEMP_SENSORS) {
            // Capacity is bounded by the `min` above.
            let _ = temperatures.push((0.0, 0));
        }
        Self {
            temperatures,
            ..Self::default()
        }
    }

    /// Add one snapshot.
    pub fn add(&mut self, snap: &SharedState) {
        let acq = &snap.acquisition;
        for (sum, v) in self.channels.iter_mut().zip(acq.channels) {
            *sum += v as f64;
        }
        for (slot, t) in self.temperatures.iter_mut().zip(acq.temperatures.iter()) {
            if t.is_finite() {
                slot.0 += *t as f64;
                slot.1 += 1;
            }
        }
        self.power[0] += acq.power.bus_voltage_v as f64;
        self.power[1] += acq.power.current_ma as f64;
        self.power[2] += acq.power.power_mw as f64;
        self.samples += 1;
    }

    /// Snapshots added so far.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Means, or `None` if nothing was added.
    pub fn finish(&self) -> Option<Averages> {
        if self.samples == 0 {
            return None;
        }
        let n = self.samples as f64;
        Some(Averages {
            channels: self.channels.map(|s| s / n),
            temperatures: self
                .temperatures
                .iter()
                .map(|&(sum, count)| if count == 0 { f64::NAN } else { sum / count as f64 })
                .collect(),
            power: self.power.map(|s| s / n),
            samples: self.samples,
        })
    }
}

/// One measurement record awaiting its write.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Wall-clock time the record was completed.
    pub stamp: WallStamp,
    /// Channel, temperature and bus means (zero pass in motor-assisted sessions).
    pub base: Averages,
    /// Channel means of the calibration pass, motor-assisted sessions only.
    pub calibration: Option<[f64; ANALOG_CHANNELS]>,
}

impl Record {
    /// Record stamped now.
    pub fn new(base: Averages, calibration: Option<[f64; ANALOG_CHANNELS]>) -> Self {
        Self {
            stamp: WallStamp::now(),
            base,
            calibration,
        }
    }

    /// CSV line, newline-terminated.
    pub fn to_line(&self) -> String {
        let mut line = format!("{},{}", self.stamp.iso, self.stamp.epoch_ms);
        // Writing to a String cannot fail.
        for v in self.base.channels {
            let _ = write!(line, ",{v:.6}");
        }
        for t in &self.base.temperatures {
            let _ = write!(line, ",{t:.2}");
        }
        for v in self.base.power {
            let _ = write!(line, ",{v:.3}");
        }
        if let Some(cal) = self.calibration {
            for v in cal {
                let _ = write!(line, ",{v:.6}");
            }
        }
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use miap_common::hal::types::PowerReading;

    #[test]
    fn test_window_means() {
        let mut acc = WindowAccumulator::new(2);
        assert_eq!(acc.finish(), None);

        acc.add(&snapshot([1.0, 2.0, 3.0], &[20.0, 21.0], 12.0));
        acc.add(&snapshot([3.0, 2.0, 1.0], &[22.0, 23.0], 14.0));
        let avg = acc.finish().unwrap();

        assert_eq!(avg.samples, 2);
        assert_eq!(avg.channels, [2.0, 2.0, 2.0]);
        assert_eq!(avg.temperatures.as_slice(), &[21.0, 22.0]);
        assert_eq!(avg.power[0], 13.0);
    }

    #[test]
    fn test_window_skips_missing_temperatures() {
        let mut acc = WindowAccumulator::new(2);
        acc.add(&snapshot([0.0; 3], &[20.0], 12.0));
        acc.add(&snapshot([0.0; 3], &[30.0, f32::NAN], 12.0));
        let avg = acc.finish().unwrap();
        assert_eq!(avg.temperatures[0], 25.0);
        assert!(avg.temperatures[1].is_nan());
    }

    #[test]
    fn test_direct_record_line() {
        let record = Record {
            stamp: stamp(),
            base: averages([0.5, -1.25, 2.0], &[21.456, 22.0]),
            calibration: None,
        };
        assert_eq!(
            record.to_line(),
            "2026-05-06T07:08:09Z,1778051289000,0.500000,-1.250000,2.000000,21.46,22.00,12.000,150.000,1800.000\n"
        );
    }

    #[test]
    fn test_motion_record_puts_calibration_last() {
        let record = Record {
            stamp: stamp(),
            base: averages([1.0, 2.0, 3.0], &[]),
            calibration: Some([4.0, 5.0, 6.0]),
        };
        let line = record.to_line();
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 2 + 3 + 3 + 3);
        assert_eq!(&fields[2..5], ["1.000000", "2.000000", "3.000000"]);
        assert_eq!(&fields[8..], ["4.000000", "5.000000", "6.000000"]);
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn stamp() -> WallStamp {
        WallStamp::from_datetime(Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap())
    }

    fn averages(channels: [f64; 3], temps: &[f64]) -> Averages {
        Averages {
            channels,
            temperatures: temps.iter().copied().collect(),
            power: [12.0, 150.0, 1800.0],
            samples: 1,
        }
    }

    fn snapshot(channels: [f32; 3], temps: &[f32], bus_v: f32) -> SharedState {
        let mut s = SharedState::default();
        s.acquisition.channels = channels;
        s.acquisition.temperatures = temps.iter().copied().collect();
        s.acquisition.power = PowerReading {
            bus_voltage_v: bus_v,
            current_ma: 150.0,
            power_mw: 1800.0,
        };
        s
    }
}
