//! Fault registry.
//!
//! Background tasks never propagate hardware or storage failures to a caller;
//! they raise a fault instead. A raised fault stays visible in the state
//! snapshot until the condition clears.

use crate::state::StateStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Fault sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// Analog conversion failed.
    AdcRead,
    /// Temperature bus read failed.
    TempSensor,
    /// Power monitor read failed.
    PowerRead,
    /// Storage arbiter timed out.
    StorageBusy,
    /// Storage root unavailable.
    StorageMount,
    /// Log file could not be opened, written or rotated.
    LogFile,
    /// Homing finished without seeing the limit sensor.
    Homing,
}

impl FaultCode {
    /// Number of fault codes.
    pub const COUNT: usize = 7;

    /// All codes, in table order.
    pub const ALL: [FaultCode; Self::COUNT] = [
        FaultCode::AdcRead,
        FaultCode::TempSensor,
        FaultCode::PowerRead,
        FaultCode::StorageBusy,
        FaultCode::StorageMount,
        FaultCode::LogFile,
        FaultCode::Homing,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Fault severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Degraded but self-healing.
    Warning,
    /// Operation failed.
    Error,
    /// Instrument cannot continue its current activity.
    Critical,
}

/// Currently raised severity per fault code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultTable {
    raised: [Option<Severity>; FaultCode::COUNT],
}

impl FaultTable {
    /// Severity currently raised for `code`.
    pub fn get(&self, code: FaultCode) -> Option<Severity> {
        self.raised[code.index()]
    }

    /// `true` if any fault is raised.
    pub fn any(&self) -> bool {
        self.raised.iter().any(Option::is_some)
    }

    /// Raised faults as `(code, severity)` pairs.
    pub fn active(&self) -> impl Iterator<Item = (FaultCode, Severity)> + '_ {
        FaultCode::ALL
            .iter()
            .filter_map(|&code| self.get(code).map(|sev| (code, sev)))
    }

    fn set(&mut self, code: FaultCode, severity: Option<Severity>) -> bool {
        let slot = &mut self.raised[code.index()];
        let changed = *slot != severity;
        *slot = severity;
        changed
    }
}

/// Raise `code` and log `message` at a level matching `severity`.
///
/// Repeated raises of an already-raised fault are logged only once.
pub fn raise(store: &StateStore, code: FaultCode, severity: Severity, message: &str) {
    let changed = store
        .update(|s| s.faults.set(code, Some(severity)))
        .into_option()
        .unwrap_or(true);
    if !changed {
        return;
    }
    match severity {
        Severity::Warning => warn!("Fault {:?}: {}", code, message),
        Severity::Error | Severity::Critical => error!("Fault {:?}: {}", code, message),
    }
}

/// Clear `code` if it is raised.
pub fn clear(store: &StateStore, code: FaultCode) {
    let changed = store
        .update(|s| s.faults.set(code, None))
        .into_option()
        .unwrap_or(false);
    if changed {
        info!("Fault {:?} cleared", code);
    }
}
