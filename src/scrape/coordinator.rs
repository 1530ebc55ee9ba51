//! Run-level orchestration of many targets
//!
//! The coordinator owns the session pool, the navigator, and the extractor,
//! and drives a set of targets through them under a concurrency bound, an
//! optional rate limit, and cooperative cancellation. Every submitted target
//! produces exactly one terminal outcome, cancellation included.

use crate::browser::BrowserCapability;
use crate::config::{validate_navigator, validate_pool, validate_run, Config, RunSettings};
use crate::pool::{PoolError, SessionHealth, SessionPool};
use crate::sink::{ResultSink, RunSummary};
use crate::target::{OutcomeStatus, TargetDescriptor, TargetError, TaskOutcome};
use crate::ConfigError;

use super::{cancel_pair, CancelFlag, CancelHandle, Extractor, LoadOutcome, Navigator, RateGate};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::Instant;

/// Emission order for [`ScrapeRun::next`]
///
/// Completion order delivers outcomes as soon as workers finish; submission
/// order buffers finished outcomes until every earlier-submitted target has
/// also finished, trading latency for a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeOrder {
    Completion,
    Submission,
}

/// Dispatches targets through the pool/navigator/extractor pipeline
///
/// Cheap to share behind an [`Arc`]; [`Coordinator::run`] can be called
/// multiple times and each call is an independent run over its own targets.
pub struct Coordinator {
    pool: Arc<SessionPool>,
    navigator: Arc<Navigator>,
    extractor: Arc<Extractor>,
    sink: Arc<dyn ResultSink>,
    run: RunSettings,
    config_hash: Option<String>,
}

impl Coordinator {
    /// Builds a coordinator from validated configuration
    ///
    /// Validation happens here so a bad concurrency or pool bound is
    /// rejected before any session is started.
    ///
    /// # Arguments
    ///
    /// * `browser` - Backend the pool creates sessions against
    /// * `sink` - Destination every outcome is written to
    /// * `config` - Run, pool, and navigator settings
    pub fn new(
        browser: Arc<dyn BrowserCapability>,
        sink: Arc<dyn ResultSink>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        validate_run(&config.run)?;
        validate_pool(&config.pool)?;
        validate_navigator(&config.navigator)?;

        let pool = Arc::new(SessionPool::new(Arc::clone(&browser), config.pool.clone()));
        let navigator = Arc::new(Navigator::new(
            Arc::clone(&browser),
            config.navigator.clone(),
        ));
        let extractor = Arc::new(Extractor::new(
            browser,
            config.navigator.quiescence_window(),
        ));

        Ok(Self {
            pool,
            navigator,
            extractor,
            sink,
            run: config.run.clone(),
            config_hash: None,
        })
    }

    /// Stamps the run summary with the hash of the loaded configuration
    pub fn with_config_hash(mut self, hash: String) -> Self {
        self.config_hash = Some(hash);
        self
    }

    /// The session pool backing this coordinator
    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Emission order implied by the run settings
    pub fn outcome_order(&self) -> OutcomeOrder {
        if self.run.ordered_outcomes {
            OutcomeOrder::Submission
        } else {
            OutcomeOrder::Completion
        }
    }

    /// Starts a run over `targets` and returns its handle
    ///
    /// The run proceeds in the background; the caller consumes outcomes
    /// through the returned [`ScrapeRun`] and may cancel at any point.
    /// The outcome channel is sized to the target count, so a slow caller
    /// never stalls the workers.
    pub fn run(self: &Arc<Self>, targets: Vec<TargetDescriptor>) -> ScrapeRun {
        let (cancel, flag) = cancel_pair();
        let (out_tx, outcomes) = mpsc::channel(targets.len().max(1));
        let (summary_tx, summary) = oneshot::channel();

        tokio::spawn(Arc::clone(self).drive(targets, flag, out_tx, summary_tx));

        ScrapeRun {
            outcomes,
            cancel,
            summary,
        }
    }

    /// Retires every pooled session; acquisitions after this fail
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn drive(
        self: Arc<Self>,
        targets: Vec<TargetDescriptor>,
        caller_flag: CancelFlag,
        out_tx: mpsc::Sender<TaskOutcome>,
        summary_tx: oneshot::Sender<RunSummary>,
    ) {
        let started = Instant::now();
        let total = targets.len();
        let order = self.outcome_order();
        tracing::info!("Starting run over {} targets", total);

        // Caller cancellation, the run deadline, and abort-on-sink-error all
        // converge on one internal flag the dispatcher and workers watch.
        let (cancel, flag) = cancel_pair();
        {
            let mut caller_flag = caller_flag;
            let cancel = cancel.clone();
            let mut done = flag.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller_flag.cancelled() => {
                        tracing::info!("Cancellation requested by caller");
                        cancel.cancel();
                    }
                    // The run ended; nothing left to cancel.
                    _ = done.cancelled() => {}
                }
            });
        }
        if let Some(deadline) = self.run.run_deadline() {
            let cancel = cancel.clone();
            let mut done = flag.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        tracing::warn!("Run deadline of {}ms reached", deadline.as_millis());
                        cancel.cancel();
                    }
                    _ = done.cancelled() => {}
                }
            });
        }

        let (done_tx, mut done_rx) = mpsc::channel::<(usize, TaskOutcome)>(total.max(1));
        self.spawn_dispatcher(targets, flag, done_tx);

        let mut summary = RunSummary {
            config_hash: self.config_hash.clone(),
            ..RunSummary::default()
        };
        let mut buffered: BTreeMap<usize, TaskOutcome> = BTreeMap::new();
        let mut next_to_emit = 0usize;
        let mut completed = 0usize;

        while let Some((idx, outcome)) = done_rx.recv().await {
            completed += 1;

            if let Err(error) = self.sink.write(&outcome).await {
                tracing::warn!("Sink rejected outcome for {}: {}", outcome.target, error);
                summary.sink_errors += 1;
                if self.run.abort_on_sink_error && !summary.aborted_by_sink {
                    tracing::error!("Aborting run after sink error");
                    summary.aborted_by_sink = true;
                    cancel.cancel();
                }
            }
            summary.record(&outcome);

            match order {
                OutcomeOrder::Completion => {
                    let _ = out_tx.send(outcome).await;
                }
                OutcomeOrder::Submission => {
                    buffered.insert(idx, outcome);
                    while let Some(ready) = buffered.remove(&next_to_emit) {
                        let _ = out_tx.send(ready).await;
                        next_to_emit += 1;
                    }
                }
            }

            if completed % 10 == 0 {
                tracing::info!("Progress: {}/{} targets complete", completed, total);
            }
        }

        // Fires the internal flag so the watchdog tasks above wind down.
        cancel.cancel();

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Run complete: {} succeeded, {} partial, {} failed, {} cancelled in {}ms",
            summary.succeeded,
            summary.partial,
            summary.failed,
            summary.cancelled,
            summary.elapsed_ms
        );
        let _ = summary_tx.send(summary);
    }

    /// Spawns the dispatch loop
    ///
    /// Targets are admitted in submission order: the concurrency permit and
    /// the rate gate are both taken here, before the worker is spawned, so
    /// start order matches submission order and the gate stays first come,
    /// first served.
    fn spawn_dispatcher(
        self: &Arc<Self>,
        targets: Vec<TargetDescriptor>,
        mut flag: CancelFlag,
        done_tx: mpsc::Sender<(usize, TaskOutcome)>,
    ) {
        let this = Arc::clone(self);
        let semaphore = Arc::new(Semaphore::new(this.run.concurrency as usize));
        let gate = this
            .run
            .rate_limit_starts
            .map(|starts| Arc::new(RateGate::new(starts, this.run.rate_window())));

        tokio::spawn(async move {
            for (idx, target) in targets.into_iter().enumerate() {
                if flag.is_cancelled() {
                    let _ = done_tx
                        .send((idx, TaskOutcome::cancelled(&target.id, 0)))
                        .await;
                    continue;
                }

                let permit = tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        // Unreachable while the semaphore is open, but a
                        // closed semaphore still resolves to a cancelled
                        // outcome rather than losing the target.
                        Err(_) => {
                            let _ = done_tx
                                .send((idx, TaskOutcome::cancelled(&target.id, 0)))
                                .await;
                            continue;
                        }
                    },
                    _ = flag.cancelled() => {
                        let _ = done_tx
                            .send((idx, TaskOutcome::cancelled(&target.id, 0)))
                            .await;
                        continue;
                    }
                };

                if let Some(gate) = &gate {
                    tokio::select! {
                        _ = gate.admit() => {}
                        _ = flag.cancelled() => {
                            let _ = done_tx
                                .send((idx, TaskOutcome::cancelled(&target.id, 0)))
                                .await;
                            continue;
                        }
                    }
                }

                tracing::debug!("Dispatching target {}", target.id);
                let this = Arc::clone(&this);
                let mut flag = flag.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let outcome = this.scrape_target(&target, &mut flag).await;
                    let _ = done_tx.send((idx, outcome)).await;
                    drop(permit);
                });
            }
        });
    }

    /// Runs one target to a terminal outcome
    ///
    /// Sessions always return to the pool, with a health matching what the
    /// navigator reported, so cancellation never strands a checkout.
    async fn scrape_target(&self, target: &TargetDescriptor, cancel: &mut CancelFlag) -> TaskOutcome {
        tracing::debug!("Target {}: acquiring session", target.id);
        let acquired = tokio::select! {
            acquired = self.pool.acquire(self.run.max_queue_wait()) => acquired,
            _ = cancel.cancelled() => return TaskOutcome::cancelled(&target.id, 0),
        };
        let mut session = match acquired {
            Ok(session) => session,
            Err(PoolError::Exhausted) => {
                tracing::warn!(
                    "Target {}: no session within {}ms",
                    target.id,
                    self.run.max_queue_wait_ms
                );
                return TaskOutcome::failed(&target.id, 0, TargetError::PoolExhausted);
            }
            Err(PoolError::Browser(reason)) => {
                tracing::error!("Target {}: browser session failed to start: {}", target.id, reason);
                return TaskOutcome::failed(&target.id, 0, TargetError::SessionStart(reason));
            }
            // Only a shut-down pool ends a target without a classified error.
            Err(PoolError::Closed) => return TaskOutcome::cancelled(&target.id, 0),
        };

        tracing::debug!("Target {}: loading {} in session {}", target.id, target.url, session.id());
        match self.navigator.load(&mut session, target, cancel).await {
            LoadOutcome::Loaded { page, attempts } => {
                tracing::debug!("Target {}: extracting after {} attempt(s)", target.id, attempts);
                match self.extractor.extract(&session, &page, target).await {
                    Ok((record, missing)) => {
                        self.pool.release(session, SessionHealth::Healthy).await;
                        let status = if missing.is_empty() {
                            OutcomeStatus::Success { record }
                        } else {
                            OutcomeStatus::Partial { record, missing }
                        };
                        TaskOutcome {
                            target: target.id.clone(),
                            attempts,
                            status,
                        }
                    }
                    Err(error) => {
                        // An unstable page says nothing about the session;
                        // a capability failure means the session lost the
                        // page and must not be reused.
                        let health = match &error {
                            TargetError::Capability(_) => SessionHealth::Degraded,
                            _ => SessionHealth::Healthy,
                        };
                        self.pool.release(session, health).await;
                        TaskOutcome::failed(&target.id, attempts, error)
                    }
                }
            }
            LoadOutcome::Failed {
                error,
                attempts,
                health,
            } => {
                self.pool.release(session, health).await;
                TaskOutcome::failed(&target.id, attempts, TargetError::Navigation(error))
            }
            LoadOutcome::Cancelled { attempts } => {
                // A navigation was torn down mid-flight; the page state is
                // unknown, so the session is not reused.
                self.pool.release(session, SessionHealth::Degraded).await;
                TaskOutcome::cancelled(&target.id, attempts)
            }
        }
    }
}

/// Handle to an in-flight run
///
/// Dropping the handle detaches from the run without cancelling it; call
/// [`ScrapeRun::cancel`] for that.
pub struct ScrapeRun {
    outcomes: mpsc::Receiver<TaskOutcome>,
    cancel: CancelHandle,
    summary: oneshot::Receiver<RunSummary>,
}

impl ScrapeRun {
    /// Next outcome, or `None` once every target has one
    pub async fn next(&mut self) -> Option<TaskOutcome> {
        self.outcomes.recv().await
    }

    /// Requests cancellation; in-flight targets wind down cooperatively
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A detached handle that can cancel this run, e.g. from a signal task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drains any remaining outcomes and returns the run summary
    pub async fn finish(self) -> RunSummary {
        let ScrapeRun {
            mut outcomes,
            summary,
            ..
        } = self;
        while outcomes.recv().await.is_some() {}
        summary.await.unwrap_or_default()
    }
}
