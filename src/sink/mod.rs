//! Result sink interface and run summaries
//!
//! The coordinator pushes every terminal [`TaskOutcome`] into a
//! [`ResultSink`]. Persistence is entirely the sink's concern; the core
//! only defines the record shape. Sink failures are non-fatal to the run
//! by default: they are logged, counted in the [`RunSummary`], and the run
//! carries on unless configured to abort.

mod jsonl;
mod summary;

pub use jsonl::JsonlSink;
pub use summary::{FailureDetail, RunSummary};

use crate::target::TaskOutcome;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while writing outcomes
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write outcome: {0}")]
    Write(String),

    #[error("Failed to serialize outcome: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// External consumer of task outcomes
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Accepts one terminal outcome
    async fn write(&self, outcome: &TaskOutcome) -> SinkResult<()>;
}

/// Sink that discards everything
pub struct NullSink;

#[async_trait]
impl ResultSink for NullSink {
    async fn write(&self, _outcome: &TaskOutcome) -> SinkResult<()> {
        Ok(())
    }
}
