//! MIAP Common Library
//!
//! This crate provides shared constants, configuration loading utilities
//! and the hardware collaborator traits for all MIAP workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - System-wide limits and default paths
//! - [`hal`] - Hardware traits, reading types and instrument configuration
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use miap_common::config::{ConfigLoader, SharedConfig};
//! use miap_common::hal::config::InstrumentConfig;
//! ```

pub mod config;
pub mod consts;
pub mod hal;
pub mod prelude;
