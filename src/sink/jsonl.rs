//! JSON-lines sink
//!
//! Appends one JSON object per outcome to a file. Writes are small and
//! serialized through a mutex, so the blocking file IO stays negligible
//! next to page navigation times.

use crate::sink::{ResultSink, SinkError, SinkResult};
use crate::target::TaskOutcome;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Appends outcomes to a file as JSON lines
pub struct JsonlSink {
    file: Mutex<File>,
}

impl JsonlSink {
    /// Opens (or creates) the output file in append mode
    pub fn open(path: &Path) -> SinkResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn write(&self, outcome: &TaskOutcome) -> SinkResult<()> {
        let line = serde_json::to_string(outcome)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| SinkError::Write("sink file lock poisoned".to_string()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
