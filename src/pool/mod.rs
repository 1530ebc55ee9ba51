//! Session pool - bounded browser session ownership
//!
//! This module owns every browser session in the system. Workers check
//! sessions out through [`SessionPool::acquire`], use them for exactly one
//! target, and hand them back through [`SessionPool::release`] with a health
//! report. The pool amortizes browser startup cost by parking healthy
//! sessions for reuse, and bounds memory growth by retiring sessions that
//! are degraded, over-used, too old, or idle too long.

mod session;

pub use session::{BrowserSession, SessionHealth};

use crate::browser::{BrowserCapability, SessionHandle};
use crate::config::PoolSettings;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Errors from session pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No session became available in time")]
    Exhausted,

    #[error("Session pool is closed")]
    Closed,

    #[error("Failed to open a browser session: {0}")]
    Browser(String),
}

/// A healthy session parked for reuse
struct IdleSession {
    handle: SessionHandle,
    created_at: Instant,
    uses: u32,
    parked_at: Instant,
}

/// Bounded pool of browser sessions
pub struct SessionPool {
    browser: Arc<dyn BrowserCapability>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleSession>>,
    closed: AtomicBool,
    checked_out: AtomicUsize,
    sessions_opened: AtomicUsize,
}

impl SessionPool {
    pub fn new(browser: Arc<dyn BrowserCapability>, settings: PoolSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_sessions as usize));
        Self {
            browser,
            settings,
            permits,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            checked_out: AtomicUsize::new(0),
            sessions_opened: AtomicUsize::new(0),
        }
    }

    /// Checks a session out of the pool
    ///
    /// Blocks cooperatively until a session slot is free, up to `timeout`.
    /// Reuses the most recently parked healthy session when one exists,
    /// otherwise opens a new context through the browser capability.
    ///
    /// # Errors
    ///
    /// * `PoolError::Exhausted` - no slot freed up within `timeout`
    /// * `PoolError::Closed` - the pool has been shut down
    /// * `PoolError::Browser` - opening a fresh context failed
    pub async fn acquire(&self, timeout: Duration) -> Result<BrowserSession, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => return Err(PoolError::Exhausted),
        };

        // Shutdown may have raced the permit; the permit drops here and
        // returns the slot.
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        self.sweep_stale_idle().await;

        let reusable = self.idle.lock().await.pop_back();
        let session = match reusable {
            Some(parked) => {
                tracing::debug!(
                    "Reusing session {} (uses: {})",
                    parked.handle.0,
                    parked.uses
                );
                BrowserSession::new(parked.handle, parked.created_at, parked.uses, permit)
            }
            None => {
                let handle = self
                    .browser
                    .new_session()
                    .await
                    .map_err(|e| PoolError::Browser(e.to_string()))?;
                self.sessions_opened.fetch_add(1, Ordering::AcqRel);
                tracing::debug!("Opened new session {}", handle.0);
                BrowserSession::new(handle, Instant::now(), 0, permit)
            }
        };

        self.checked_out.fetch_add(1, Ordering::AcqRel);
        Ok(session)
    }

    /// Returns a session to the pool
    ///
    /// A healthy session under its use and age limits is parked for reuse.
    /// Anything else is destroyed; the pool lazily opens a replacement on a
    /// later `acquire`.
    pub async fn release(&self, session: BrowserSession, health: SessionHealth) {
        self.checked_out.fetch_sub(1, Ordering::AcqRel);

        let (handle, created_at, uses) = session.into_parts();
        let uses = uses + 1;

        let over_used = uses >= self.settings.max_session_uses;
        let over_age = created_at.elapsed() >= self.settings.max_session_age();
        let retire = health != SessionHealth::Healthy
            || over_used
            || over_age
            || self.closed.load(Ordering::Acquire);

        if retire {
            tracing::debug!(
                "Retiring session {} (health: {:?}, uses: {}, over_age: {})",
                handle.0,
                health,
                uses,
                over_age
            );
            self.browser.close_session(handle).await;
        } else {
            self.idle.lock().await.push_back(IdleSession {
                handle,
                created_at,
                uses,
                parked_at: Instant::now(),
            });
        }
        // The permit inside `session` drops here, freeing the slot.
    }

    /// Closes every session and fails all subsequent acquires
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();

        let mut idle = self.idle.lock().await;
        while let Some(parked) = idle.pop_front() {
            self.browser.close_session(parked.handle).await;
        }
        tracing::debug!("Session pool shut down");
    }

    /// Number of sessions currently checked out
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::Acquire)
    }

    /// Number of sessions parked for reuse
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Total browser contexts opened over the pool's lifetime
    ///
    /// Stays flat while parked sessions are being reused.
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::Acquire)
    }

    /// Destroys parked sessions that idled or aged past their limits
    async fn sweep_stale_idle(&self) {
        let max_idle = self.settings.max_idle();
        let max_age = self.settings.max_session_age();

        let stale: Vec<IdleSession> = {
            let mut idle = self.idle.lock().await;
            let mut keep = VecDeque::with_capacity(idle.len());
            let mut stale = Vec::new();
            while let Some(parked) = idle.pop_front() {
                if parked.parked_at.elapsed() >= max_idle
                    || parked.created_at.elapsed() >= max_age
                {
                    stale.push(parked);
                } else {
                    keep.push_back(parked);
                }
            }
            *idle = keep;
            stale
        };

        for parked in stale {
            tracing::debug!("Sweeping stale idle session {}", parked.handle.0);
            self.browser.close_session(parked.handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakeBrowser;
    use std::collections::HashSet;

    fn settings(max_sessions: u32) -> PoolSettings {
        PoolSettings {
            max_sessions,
            max_session_uses: 32,
            max_session_age_ms: 600_000,
            max_idle_ms: 60_000,
        }
    }

    fn pool_with(max_sessions: u32) -> (Arc<FakeBrowser>, SessionPool) {
        let browser = Arc::new(FakeBrowser::new());
        let pool = SessionPool::new(browser.clone(), settings(max_sessions));
        (browser, pool)
    }

    #[tokio::test]
    async fn test_acquire_up_to_bound_then_exhausted() {
        let (_browser, pool) = pool_with(2);

        let a = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.checked_out(), 2);

        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted));

        pool.release(a, SessionHealth::Healthy).await;
        pool.release(b, SessionHealth::Healthy).await;
        assert_eq!(pool.checked_out(), 0);
    }

    #[tokio::test]
    async fn test_healthy_release_reuses_session() {
        let (browser, pool) = pool_with(1);

        let first = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let first_id = first.id();
        pool.release(first, SessionHealth::Healthy).await;

        let second = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(second.uses(), 1);
        assert_eq!(browser.sessions_created(), 1);
        assert_eq!(pool.sessions_opened(), 1);
        pool.release(second, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_degraded_release_destroys_session() {
        let (browser, pool) = pool_with(1);

        let first = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let first_id = first.id();
        pool.release(first, SessionHealth::Degraded).await;
        assert_eq!(browser.sessions_closed(), 1);

        let second = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(browser.sessions_created(), 2);
        pool.release(second, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_use_count_retirement() {
        let browser = Arc::new(FakeBrowser::new());
        let mut s = settings(1);
        s.max_session_uses = 2;
        let pool = SessionPool::new(browser.clone(), s);

        // Two checkouts exhaust the use budget even with healthy releases.
        for _ in 0..2 {
            let session = pool.acquire(Duration::from_millis(50)).await.unwrap();
            pool.release(session, SessionHealth::Healthy).await;
        }
        assert_eq!(browser.sessions_closed(), 1);
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_swept() {
        let browser = Arc::new(FakeBrowser::new());
        let mut s = settings(2);
        s.max_idle_ms = 1_000;
        let pool = SessionPool::new(browser.clone(), s);

        let session = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let parked_id = session.id();
        pool.release(session, SessionHealth::Healthy).await;
        assert_eq!(pool.idle_count().await, 1);

        tokio::time::advance(Duration::from_secs(5)).await;

        let fresh = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(fresh.id(), parked_id);
        assert_eq!(browser.sessions_closed(), 1);
        pool.release(fresh, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_session_start_failure_surfaces_as_browser_error() {
        let (browser, pool) = pool_with(1);
        browser.fail_sessions("chromium binary missing");

        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PoolError::Browser(_)));
        assert_eq!(pool.checked_out(), 0);

        // A second attempt errors the same way rather than reporting
        // Exhausted: the failed acquire gave its slot back.
        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PoolError::Browser(_)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (browser, pool) = pool_with(2);

        let session = pool.acquire(Duration::from_millis(50)).await.unwrap();
        pool.release(session, SessionHealth::Healthy).await;
        assert_eq!(pool.idle_count().await, 1);

        pool.shutdown().await;
        assert_eq!(browser.sessions_created(), browser.sessions_closed());

        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
    }

    #[tokio::test]
    async fn test_no_double_acquire_under_stress() {
        let browser = Arc::new(FakeBrowser::new());
        let pool = Arc::new(SessionPool::new(browser, settings(3)));
        let out = Arc::new(std::sync::Mutex::new(HashSet::new()));

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            let out = Arc::clone(&out);
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let session = pool.acquire(Duration::from_secs(5)).await.unwrap();
                    {
                        let mut out = out.lock().unwrap();
                        // Exclusive ownership: nobody else may hold this id.
                        assert!(out.insert(session.id()));
                    }
                    tokio::task::yield_now().await;
                    {
                        let mut out = out.lock().unwrap();
                        assert!(out.remove(&session.id()));
                    }
                    pool.release(session, SessionHealth::Healthy).await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(pool.checked_out(), 0);
    }
}
