//! Browser capability interface
//!
//! The scraping core never talks to a rendering engine directly; it consumes
//! the [`BrowserCapability`] trait. A capability owns the actual browser
//! sessions and exposes navigation, DOM queries, and a quiescence signal.
//! The bundled [`HttpBrowser`] implements the trait with a plain HTTP fetch
//! plus an HTML parser, which is enough for server-rendered pages.

mod http;

#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpBrowser;

use crate::target::NavigationError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors from the capability itself, as opposed to classified navigation
/// failures against the remote site
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to start browser session: {0}")]
    SessionStart(String),

    #[error("Unknown browser session: {0}")]
    UnknownSession(u64),

    #[error("No page loaded in session {0}")]
    NoPage(u64),

    #[error("Invalid selector: {0}")]
    Selector(String),
}

/// Opaque handle to one isolated browsing context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// A DOM element surfaced by a selector query
#[derive(Debug, Clone, Default)]
pub struct DomNode {
    /// Concatenated, trimmed text content
    pub text: String,

    /// Element attributes in document order
    pub attributes: Vec<(String, String)>,
}

impl DomNode {
    /// Looks up an attribute value by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of a successful navigation
#[derive(Debug, Clone)]
pub struct NavigatedPage {
    /// Final URL after any redirects
    pub final_url: Url,

    /// HTTP status of the final response
    pub status: u16,
}

/// A navigation failure together with a session-scoped flag
///
/// `session_dead` distinguishes a crashed or unusable browsing context from
/// a target-scoped failure (remote site down, blocked, etc). The navigator
/// uses it to report the session dead so the pool retires it.
#[derive(Debug, Clone)]
pub struct NavigateFailure {
    pub error: NavigationError,
    pub session_dead: bool,
}

impl NavigateFailure {
    pub fn target_scoped(error: NavigationError) -> Self {
        Self {
            error,
            session_dead: false,
        }
    }

    pub fn session_scoped(error: NavigationError) -> Self {
        Self {
            error,
            session_dead: true,
        }
    }
}

/// The opaque browser dependency consumed by the scraping core
///
/// Implementations own rendering and network transport. All methods take
/// `&self`; the capability serializes its own internal state.
#[async_trait]
pub trait BrowserCapability: Send + Sync {
    /// Opens a new isolated browsing context
    async fn new_session(&self) -> Result<SessionHandle, BrowserError>;

    /// Closes a browsing context and frees its resources
    async fn close_session(&self, handle: SessionHandle);

    /// Navigates the session to `url`, applying per-target headers and
    /// cookies, bounded by `timeout`
    async fn navigate(
        &self,
        handle: SessionHandle,
        url: &Url,
        headers: &[(String, String)],
        cookies: &[(String, String)],
        timeout: Duration,
    ) -> Result<NavigatedPage, NavigateFailure>;

    /// Evaluates a CSS selector against the currently loaded page
    async fn query_selector(
        &self,
        handle: SessionHandle,
        selector: &str,
    ) -> Result<Vec<DomNode>, BrowserError>;

    /// Waits until no further rendering/network activity is observed for
    /// `window`, returning `false` if the page never settles
    async fn wait_for_quiescence(&self, handle: SessionHandle, window: Duration) -> bool;
}
