//! # MIAP Core Library
//!
//! Control core of a measurement instrument: a stepper-driven actuator with a
//! limit sensor, three analog channels, a temperature bus and a power
//! monitor. The core moves the actuator, samples the inputs, and writes
//! averaged, calibrated measurement records to durable storage.
//!
//! Hardware is consumed through the collaborator traits of
//! `miap_common::hal::driver`; [`drivers::simulation`] provides a software rig.
//!
//! # Module Structure
//!
//! - [`core`] - `Instrument` context, background loops, settings restore
//! - [`commands`] - Command surface and `Ack` status tokens
//! - [`state`] - Shared state record and its timeout-bounded store
//! - [`motion`] - Stepper state machine, stepping loop, homing
//! - [`sampler`] - Periodic acquisition and zero calibration
//! - [`orchestrator`] - Logging sessions, averaging, rotation
//! - [`storage`] - Storage arbiter, log files, file operations, purge
//! - [`settings`] - Runtime settings persisted on the medium
//! - [`thermal`] - Heater / fan outputs and PID loop
//! - [`faults`] - Fault registry
//! - [`cancel`] - Cooperative cancellation token
//! - [`clock`] - Monotonic and wall-clock time
//! - [`drivers`] - Hardware backends
//! - [`error`] - Error types
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         miap_core                                │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │  commands   │───►│  Instrument  │───►│  StorageArbiter     │  │
//! │  └─────────────┘    └──────┬───────┘    └─────────────────────┘  │
//! │                            │                                     │
//! │        ┌─────────┬─────────┼──────────┬──────────────┐           │
//! │        ▼         ▼         ▼          ▼              │           │
//! │     Motion    Sampler   Thermal   Orchestrator       │           │
//! │        └─────────┴────► StateStore ◄──┘              │           │
//! │                            ▲                         │           │
//! │                            └──── Hardware (traits) ◄─┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(warnings)]
#![deny(missing_docs)]

pub mod cancel;
pub mod clock;
pub mod commands;
pub mod core;
pub mod drivers;
pub mod error;
pub mod faults;
pub mod motion;
pub mod orchestrator;
pub mod sampler;
pub mod settings;
pub mod state;
pub mod storage;
pub mod thermal;

// Re-export key types for convenience
pub use crate::commands::Ack;
pub use crate::core::Instrument;
pub use crate::error::{ActionError, ActionResult};
pub use crate::state::{SharedState, StateStore};
