//! Scraping pipeline: navigation, extraction, and coordinated dispatch
//!
//! This module contains the per-target pipeline and the run-level
//! orchestration around it:
//! - Navigation with classified failures, bounded retries, and backoff
//! - Rule evaluation against the rendered page
//! - Rate-limited, concurrency-bounded fan-out across many targets
//! - Cooperative cancellation observed at every suspension point

mod coordinator;
mod extractor;
mod navigator;
mod rate;

pub use coordinator::{Coordinator, OutcomeOrder, ScrapeRun};
pub use extractor::Extractor;
pub use navigator::{backoff_delay, LoadOutcome, LoadedPage, Navigator};
pub use rate::RateGate;

use tokio::sync::watch;

/// Creates a linked cancellation handle/flag pair
pub fn cancel_pair() -> (CancelHandle, CancelFlag) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelFlag { rx })
}

/// Requests cancellation of a run
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observes cancellation; cloned into every worker
#[derive(Clone)]
pub struct CancelFlag {
    rx: watch::Receiver<bool>,
}

impl CancelFlag {
    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves otherwise
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // The handle is gone and can never fire; park forever so
                // select! arms built on this future stay inert.
                std::future::pending::<()>().await;
            }
        }
    }
}
