//! Configuration module for Spindrift
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files. Validation runs in full before any navigation begins; a bad
//! configuration fails the run up front.
//!
//! # Example
//!
//! ```no_run
//! use spindrift::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Run concurrency: {}", config.run.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, Config, NavigatorSettings, PoolSettings, RunSettings, SinkSettings,
    TargetConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

// Re-export validation entry points (the coordinator re-validates run
// settings when a Config is constructed in code rather than loaded)
pub use validation::{validate, validate_navigator, validate_pool, validate_run};
