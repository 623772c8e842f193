//! Configuration module for GpuTopo
//!
//! Provides the CLI arguments and the discovery configuration.

mod settings;

pub use settings::*;
