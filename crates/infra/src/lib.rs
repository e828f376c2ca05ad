//! Infrastructure layer: queue and store backends, object store, config.

pub mod blob;
pub mod config;
pub mod jobs;

pub use config::{Config, ConfigError};
