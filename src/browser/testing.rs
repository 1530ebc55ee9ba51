//! Scripted browser capability for unit tests
//!
//! `FakeBrowser` replays per-URL navigation scripts and serves canned DOM
//! nodes, so pool/navigator/coordinator tests run without any network or
//! rendering engine. Navigation start times are logged with
//! `tokio::time::Instant` so paused-clock tests can assert scheduling.

use crate::browser::{
    BrowserCapability, BrowserError, DomNode, NavigateFailure, NavigatedPage, SessionHandle,
};
use crate::target::NavigationError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// One scripted navigation step
#[derive(Debug, Clone)]
pub(crate) enum FakeNav {
    /// Navigation succeeds with HTTP 200
    Ok,

    /// Navigation fails, target-scoped
    Fail(NavigationError),

    /// Navigation fails and the browsing context is dead afterwards
    Crash(NavigationError),
}

#[derive(Default)]
struct Inner {
    /// Remaining scripted steps per URL; empty or missing means `Ok`
    scripts: HashMap<String, VecDeque<FakeNav>>,

    /// Canned query results keyed by (url, selector)
    nodes: HashMap<(String, String), Vec<DomNode>>,

    /// URLs whose pages never reach quiescence
    unstable: Vec<String>,

    /// (url, start instant) per navigation attempt, in start order
    nav_log: Vec<(String, tokio::time::Instant)>,

    /// Current page URL per open session
    current: HashMap<u64, String>,

    /// Simulated navigation latency per URL
    delays: HashMap<String, Duration>,

    /// When set, `new_session` fails with this reason
    session_error: Option<String>,

    /// When set, every `query_selector` call fails
    queries_fail: bool,
}

pub(crate) struct FakeBrowser {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    created: AtomicU64,
    closed: AtomicU64,
}

impl FakeBrowser {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Scripts the navigation outcomes for a URL, consumed in order
    pub(crate) fn script_nav(&self, url: &str, steps: Vec<FakeNav>) {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.insert(url.to_string(), steps.into());
    }

    /// Serves `nodes` for `selector` on pages loaded from `url`
    pub(crate) fn set_nodes(&self, url: &str, selector: &str, nodes: Vec<DomNode>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .nodes
            .insert((url.to_string(), selector.to_string()), nodes);
    }

    /// Makes navigations to `url` take `delay` before resolving
    pub(crate) fn set_nav_delay(&self, url: &str, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.delays.insert(url.to_string(), delay);
    }

    /// Makes every subsequent `new_session` fail with `reason`
    pub(crate) fn fail_sessions(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.session_error = Some(reason.to_string());
    }

    /// Makes every subsequent `query_selector` call fail
    pub(crate) fn fail_queries(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queries_fail = true;
    }

    /// Marks `url` as a page that never settles
    pub(crate) fn set_unstable(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.unstable.push(url.to_string());
    }

    pub(crate) fn nav_log(&self) -> Vec<(String, tokio::time::Instant)> {
        self.inner.lock().unwrap().nav_log.clone()
    }

    pub(crate) fn sessions_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn sessions_closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Builds a text-only node
    pub(crate) fn node(text: &str) -> DomNode {
        DomNode {
            text: text.to_string(),
            attributes: vec![],
        }
    }

    /// Builds a node with attributes
    pub(crate) fn node_with_attrs(text: &str, attrs: &[(&str, &str)]) -> DomNode {
        DomNode {
            text: text.to_string(),
            attributes: attrs
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl BrowserCapability for FakeBrowser {
    async fn new_session(&self) -> Result<SessionHandle, BrowserError> {
        if let Some(reason) = self.inner.lock().unwrap().session_error.clone() {
            return Err(BrowserError::SessionStart(reason));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(SessionHandle(id))
    }

    async fn close_session(&self, handle: SessionHandle) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().unwrap().current.remove(&handle.0);
    }

    async fn navigate(
        &self,
        handle: SessionHandle,
        url: &Url,
        _headers: &[(String, String)],
        _cookies: &[(String, String)],
        _timeout: Duration,
    ) -> Result<NavigatedPage, NavigateFailure> {
        let (step, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .nav_log
                .push((url.to_string(), tokio::time::Instant::now()));
            let step = inner
                .scripts
                .get_mut(url.as_str())
                .and_then(|steps| steps.pop_front())
                .unwrap_or(FakeNav::Ok);
            (step, inner.delays.get(url.as_str()).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            FakeNav::Ok => {
                self.inner
                    .lock()
                    .unwrap()
                    .current
                    .insert(handle.0, url.to_string());
                Ok(NavigatedPage {
                    final_url: url.clone(),
                    status: 200,
                })
            }
            FakeNav::Fail(error) => Err(NavigateFailure::target_scoped(error)),
            FakeNav::Crash(error) => Err(NavigateFailure::session_scoped(error)),
        }
    }

    async fn query_selector(
        &self,
        handle: SessionHandle,
        selector: &str,
    ) -> Result<Vec<DomNode>, BrowserError> {
        let inner = self.inner.lock().unwrap();
        if inner.queries_fail {
            return Err(BrowserError::UnknownSession(handle.0));
        }
        let url = inner
            .current
            .get(&handle.0)
            .ok_or(BrowserError::NoPage(handle.0))?;
        Ok(inner
            .nodes
            .get(&(url.clone(), selector.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn wait_for_quiescence(&self, handle: SessionHandle, _window: Duration) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.current.get(&handle.0) {
            Some(url) => !inner.unstable.contains(url),
            None => false,
        }
    }
}
