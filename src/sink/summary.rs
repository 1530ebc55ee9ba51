//! Run summary aggregation
//!
//! The summary reports per-kind outcome counts and the classified error of
//! every failed target, enough to diagnose a run without re-running it.

use crate::target::{OutcomeKind, OutcomeStatus, TaskOutcome};
use serde::Serialize;
use std::fmt::Write as _;

/// Detail for one failed target
#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub target: String,
    pub error: String,
    pub attempts: u32,
}

/// Aggregated result of one scrape run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Hash of the configuration that produced this run, when known
    pub config_hash: Option<String>,

    pub total: u64,
    pub succeeded: u64,
    pub partial: u64,
    pub failed: u64,
    pub cancelled: u64,

    /// Outcomes the sink rejected (the outcomes themselves still counted)
    pub sink_errors: u64,

    /// Whether a sink error aborted the run under abort-on-sink-error
    pub aborted_by_sink: bool,

    pub elapsed_ms: u64,

    /// One entry per failed target
    pub failures: Vec<FailureDetail>,
}

impl RunSummary {
    /// Folds one outcome into the counts
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.total += 1;
        match outcome.status.kind() {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::Partial => self.partial += 1,
            OutcomeKind::Failed => {
                self.failed += 1;
                if let OutcomeStatus::Failed { error } = &outcome.status {
                    self.failures.push(FailureDetail {
                        target: outcome.target.clone(),
                        error: error.to_string(),
                        attempts: outcome.attempts,
                    });
                }
            }
            OutcomeKind::Cancelled => self.cancelled += 1,
        }
    }

    /// Renders a human-readable report
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Scrape Run Summary ===");
        if let Some(hash) = &self.config_hash {
            let _ = writeln!(out, "Config hash: {}", hash);
        }
        let _ = writeln!(out, "Elapsed: {}ms", self.elapsed_ms);
        let _ = writeln!(out, "Targets: {}", self.total);
        let _ = writeln!(out, "  Succeeded: {}", self.succeeded);
        let _ = writeln!(out, "  Partial:   {}", self.partial);
        let _ = writeln!(out, "  Failed:    {}", self.failed);
        let _ = writeln!(out, "  Cancelled: {}", self.cancelled);
        if self.sink_errors > 0 {
            let _ = writeln!(
                out,
                "Sink errors: {}{}",
                self.sink_errors,
                if self.aborted_by_sink {
                    " (run aborted)"
                } else {
                    ""
                }
            );
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out, "\nFailures:");
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "  {} - {} (attempts: {})",
                    failure.target, failure.error, failure.attempts
                );
            }
        }
        out
    }
}
