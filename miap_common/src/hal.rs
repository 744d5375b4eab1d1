//! Hardware abstraction layer: collaborator traits, reading types and
//! instrument configuration.
//!
//! The control core never talks to pins or buses directly. Every hardware
//! collaborator is reached through one of the traits in [`driver`], so the
//! same core runs against real hardware or the simulation backend.

pub mod config;
pub mod consts;
pub mod driver;
pub mod types;
