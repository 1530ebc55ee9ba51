//! Navigator - one target, one session, bounded retries
//!
//! The navigator drives a checked-out session to load a single target. It
//! owns the retry policy:
//! - Only transient failures (timeout, network, 5xx) are retried
//! - Permanent failures (4xx, explicit block signal) surface immediately
//! - Backoff between attempts is exponential with jitter, capped per
//!   attempt, and the whole attempt sequence is bounded by the target's
//!   timeout
//! - A crashed context ends the attempt loop and reports the session dead
//!   so the pool retires it instead of reusing it against the next target

use crate::browser::BrowserCapability;
use crate::config::NavigatorSettings;
use crate::pool::{BrowserSession, SessionHealth};
use crate::scrape::CancelFlag;
use crate::target::{NavigationError, TargetDescriptor};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// A page successfully loaded into a session, ready for extraction
#[derive(Debug, Clone)]
pub struct LoadedPage {
    /// Final URL after redirects; links resolve against this
    pub final_url: Url,
}

/// Result of driving one target through the navigator
#[derive(Debug)]
pub enum LoadOutcome {
    /// The page loaded; extraction may proceed
    Loaded { page: LoadedPage, attempts: u32 },

    /// All attempts failed; `health` tells the pool whether the session
    /// survived
    Failed {
        error: NavigationError,
        attempts: u32,
        health: SessionHealth,
    },

    /// Cancellation was observed mid-load; the session state is unknown
    Cancelled { attempts: u32 },
}

/// Pure backoff schedule: `base * 2^retry_index`, capped
///
/// Jitter is applied separately at sleep time so the schedule itself stays
/// a deterministic function of the retry index.
pub fn backoff_delay(retry_index: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(retry_index).unwrap_or(u32::MAX);
    match base.checked_mul(factor) {
        Some(delay) => delay.min(cap),
        None => cap,
    }
}

/// Multiplies a delay by a jitter factor in [0.5, 1.5)
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
}

/// Loads one target in one session with bounded retries
pub struct Navigator {
    browser: Arc<dyn BrowserCapability>,
    settings: NavigatorSettings,
}

impl Navigator {
    pub fn new(browser: Arc<dyn BrowserCapability>, settings: NavigatorSettings) -> Self {
        Self { browser, settings }
    }

    /// Drives the session to load the target
    ///
    /// Makes up to `target.retry_budget` attempts, never exceeding
    /// `target.timeout` of total wall clock. Transient failures back off
    /// and retry; permanent failures and dead sessions return immediately.
    pub async fn load(
        &self,
        session: &mut BrowserSession,
        target: &TargetDescriptor,
        cancel: &mut CancelFlag,
    ) -> LoadOutcome {
        let deadline = Instant::now() + target.timeout;
        let budget = target.retry_budget.max(1);
        let mut attempts = 0u32;
        let mut last_error = NavigationError::Timeout;

        while attempts < budget {
            if cancel.is_cancelled() {
                return LoadOutcome::Cancelled { attempts };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(
                    "Target {} exhausted its {}ms budget after {} attempts",
                    target.id,
                    target.timeout.as_millis(),
                    attempts
                );
                return LoadOutcome::Failed {
                    error: NavigationError::Timeout,
                    attempts,
                    health: SessionHealth::Healthy,
                };
            }

            attempts += 1;
            session.touch();
            tracing::debug!(
                "Loading {} (attempt {}/{}, session {})",
                target.url,
                attempts,
                budget,
                session.id()
            );

            let result = tokio::select! {
                result = self.browser.navigate(
                    session.handle(),
                    &target.url,
                    &target.headers,
                    &target.cookies,
                    remaining,
                ) => result,
                _ = cancel.cancelled() => {
                    return LoadOutcome::Cancelled { attempts };
                }
            };

            let failure = match result {
                Ok(page) => {
                    return LoadOutcome::Loaded {
                        page: LoadedPage {
                            final_url: page.final_url,
                        },
                        attempts,
                    };
                }
                Err(failure) => failure,
            };

            tracing::debug!(
                "Attempt {} for {} failed: {} (session_dead: {})",
                attempts,
                target.id,
                failure.error,
                failure.session_dead
            );
            last_error = failure.error;

            if failure.session_dead {
                // No point retrying in a dead context; the pool replaces it.
                return LoadOutcome::Failed {
                    error: last_error,
                    attempts,
                    health: SessionHealth::Dead,
                };
            }

            if !last_error.is_transient() || attempts >= budget {
                break;
            }

            let delay = jittered(backoff_delay(
                attempts - 1,
                self.settings.base_backoff(),
                self.settings.max_backoff(),
            ));
            let delay = delay.min(deadline.saturating_duration_since(Instant::now()));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return LoadOutcome::Cancelled { attempts };
                }
            }
        }

        LoadOutcome::Failed {
            error: last_error,
            attempts,
            health: SessionHealth::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBrowser, FakeNav};
    use crate::config::PoolSettings;
    use crate::pool::SessionPool;
    use crate::scrape::cancel_pair;
    use crate::target::ExtractionRule;
    use crate::target::ValueKind;

    fn test_target(url: &str, retry_budget: u32, timeout: Duration) -> TargetDescriptor {
        TargetDescriptor {
            id: "t".to_string(),
            url: Url::parse(url).unwrap(),
            rules: vec![ExtractionRule {
                name: "title".to_string(),
                selector: "h1".to_string(),
                kind: ValueKind::Text,
                attribute: None,
                required: false,
            }],
            timeout,
            retry_budget,
            headers: vec![],
            cookies: vec![],
        }
    }

    fn navigator(browser: Arc<FakeBrowser>) -> Navigator {
        let mut settings = NavigatorSettings::default();
        settings.base_backoff_ms = 100;
        settings.max_backoff_ms = 1000;
        Navigator::new(browser, settings)
    }

    async fn checkout(browser: Arc<FakeBrowser>) -> (SessionPool, BrowserSession) {
        let pool = SessionPool::new(browser, PoolSettings::default());
        let session = pool.acquire(Duration::from_millis(50)).await.unwrap();
        (pool, session)
    }

    #[test]
    fn test_backoff_delay_schedule() {
        let base = Duration::from_millis(250);
        let cap = Duration::from_secs(5);

        assert_eq!(backoff_delay(0, base, cap), Duration::from_millis(250));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(6, base, cap), cap);
        // Shift overflow saturates at the cap rather than wrapping.
        assert_eq!(backoff_delay(40, base, cap), cap);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let browser = Arc::new(FakeBrowser::new());
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser).await;
        let (_handle, mut flag) = cancel_pair();

        let target = test_target("https://example.com/", 3, Duration::from_secs(30));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Loaded { attempts, page } => {
                assert_eq!(attempts, 1);
                assert_eq!(page.final_url.as_str(), "https://example.com/");
            }
            other => panic!("expected Loaded, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_succeeds() {
        let browser = Arc::new(FakeBrowser::new());
        browser.script_nav(
            "https://example.com/",
            vec![
                FakeNav::Fail(NavigationError::Timeout),
                FakeNav::Fail(NavigationError::HttpStatus(503)),
                FakeNav::Ok,
            ],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (_handle, mut flag) = cancel_pair();

        let target = test_target("https://example.com/", 5, Duration::from_secs(30));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Loaded { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Loaded, got {:?}", other),
        }
        assert_eq!(browser.nav_log().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let browser = Arc::new(FakeBrowser::new());
        browser.script_nav(
            "https://example.com/",
            vec![FakeNav::Fail(NavigationError::HttpStatus(404))],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (_handle, mut flag) = cancel_pair();

        let target = test_target("https://example.com/", 3, Duration::from_secs(30));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Failed {
                error,
                attempts,
                health,
            } => {
                assert_eq!(error, NavigationError::HttpStatus(404));
                assert_eq!(attempts, 1);
                assert_eq!(health, SessionHealth::Healthy);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(browser.nav_log().len(), 1);
    }

    #[tokio::test]
    async fn test_block_signal_not_retried() {
        let browser = Arc::new(FakeBrowser::new());
        browser.script_nav(
            "https://example.com/",
            vec![FakeNav::Fail(NavigationError::Blocked)],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (_handle, mut flag) = cancel_pair();

        let target = test_target("https://example.com/", 3, Duration::from_secs(30));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Failed { error, attempts, .. } => {
                assert_eq!(error, NavigationError::Blocked);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_reports_exact_attempts() {
        let browser = Arc::new(FakeBrowser::new());
        browser.script_nav(
            "https://example.com/",
            vec![
                FakeNav::Fail(NavigationError::Timeout),
                FakeNav::Fail(NavigationError::Timeout),
                FakeNav::Fail(NavigationError::Timeout),
            ],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (_handle, mut flag) = cancel_pair();

        let target = test_target("https://example.com/", 3, Duration::from_secs(60));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Failed { error, attempts, .. } => {
                assert_eq!(error, NavigationError::Timeout);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(browser.nav_log().len(), 3);
    }

    #[tokio::test]
    async fn test_session_crash_reports_dead_context() {
        let browser = Arc::new(FakeBrowser::new());
        browser.script_nav(
            "https://example.com/",
            vec![FakeNav::Crash(NavigationError::Network(
                "context crashed".to_string(),
            ))],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (_handle, mut flag) = cancel_pair();

        let target = test_target("https://example.com/", 5, Duration::from_secs(30));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Failed {
                attempts, health, ..
            } => {
                // Transient class, but the dead context ends the loop.
                assert_eq!(attempts, 1);
                assert_eq!(health, SessionHealth::Dead);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_timeout_bounds_all_attempts() {
        let browser = Arc::new(FakeBrowser::new());
        // Every attempt times out; the 300ms target budget runs out before
        // the 5-attempt budget does.
        browser.script_nav(
            "https://example.com/",
            vec![FakeNav::Fail(NavigationError::Timeout); 5],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (_handle, mut flag) = cancel_pair();

        let started = Instant::now();
        let target = test_target("https://example.com/", 5, Duration::from_millis(300));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Failed { error, .. } => {
                assert_eq!(error, NavigationError::Timeout)
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(started.elapsed() <= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let browser = Arc::new(FakeBrowser::new());
        browser.script_nav(
            "https://example.com/",
            vec![FakeNav::Fail(NavigationError::Timeout); 5],
        );
        let nav = navigator(browser.clone());
        let (_pool, mut session) = checkout(browser.clone()).await;
        let (handle, mut flag) = cancel_pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let target = test_target("https://example.com/", 5, Duration::from_secs(60));
        match nav.load(&mut session, &target, &mut flag).await {
            LoadOutcome::Cancelled { attempts } => assert!(attempts >= 1),
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }
}
