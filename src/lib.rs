//! Spindrift: a headless-browser scraping agent core
//!
//! This crate implements the scraping engine that drives a browser capability
//! to visit target pages and extract structured records, managing session
//! lifecycles, retry with backoff, and bounded concurrent dispatch.

pub mod browser;
pub mod config;
pub mod pool;
pub mod scrape;
pub mod sink;
pub mod target;

use thiserror::Error;

/// Main error type for Spindrift operations
#[derive(Debug, Error)]
pub enum SpindriftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session pool error: {0}")]
    Pool(#[from] pool::PoolError),

    #[error("Browser capability error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("Sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for Spindrift operations
pub type Result<T> = std::result::Result<T, SpindriftError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use browser::{BrowserCapability, HttpBrowser};
pub use config::Config;
pub use pool::{BrowserSession, SessionHealth, SessionPool};
pub use scrape::{Coordinator, OutcomeOrder, ScrapeRun};
pub use sink::{JsonlSink, ResultSink, RunSummary};
pub use target::{
    ExtractionRule, FieldValue, NavigationError, OutcomeKind, OutcomeStatus, Record, RuleError,
    TargetDescriptor, TargetError, TaskOutcome, ValueKind,
};
