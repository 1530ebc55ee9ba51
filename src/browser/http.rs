//! Fetch-and-parse browser backend
//!
//! This module implements [`BrowserCapability`] over a plain HTTP client and
//! an HTML parser. There is no script execution; a fetched document is
//! trivially quiescent. It handles:
//! - Building the HTTP client with a proper user agent string
//! - Per-target request headers and cookies
//! - Error classification (timeout, network, HTTP status, block signal)
//! - CSS selector evaluation against the fetched document

use crate::browser::{
    BrowserCapability, BrowserError, DomNode, NavigateFailure, NavigatedPage, SessionHandle,
};
use crate::config::BrowserConfig;
use crate::target::NavigationError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{redirect::Policy, Client, StatusCode};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Per-session state: the last document fetched into the context
#[derive(Debug, Default)]
struct SessionState {
    html: Option<String>,
    final_url: Option<Url>,
}

/// HTTP fetch backend for the browser capability
pub struct HttpBrowser {
    client: Client,
    sessions: Mutex<HashMap<u64, SessionState>>,
    next_id: AtomicU64,

    /// Optional selector whose presence on a loaded page classifies the
    /// navigation as blocked (anti-bot interstitial, auth wall, captcha)
    blocked_marker: Option<Selector>,
}

impl HttpBrowser {
    /// Builds an HTTP browser from the `[browser]` configuration section
    pub fn new(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let client = build_http_client(&config.user_agent, config.connect_timeout())
            .map_err(|e| BrowserError::SessionStart(e.to_string()))?;

        let blocked_marker = match &config.blocked_marker {
            Some(raw) => Some(
                Selector::parse(raw).map_err(|e| BrowserError::Selector(format!("{e:?}")))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            blocked_marker,
        })
    }
}

/// Builds the underlying HTTP client
///
/// Redirects are followed by the client (up to its default hop limit);
/// per-request timeouts are applied at navigation time, not here.
fn build_http_client(user_agent: &str, connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.to_string())
        .connect_timeout(connect_timeout)
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Classifies a transport-level error from the HTTP client
fn classify_transport_error(error: &reqwest::Error) -> NavigationError {
    if error.is_timeout() {
        NavigationError::Timeout
    } else if error.is_connect() {
        NavigationError::Network("connection failed".to_string())
    } else if error.is_redirect() {
        NavigationError::Network("redirect limit exceeded".to_string())
    } else {
        NavigationError::Network(error.to_string())
    }
}

/// Classifies a non-success HTTP status
///
/// 403 and 429 are treated as explicit block signals; everything else
/// surfaces as its status code (the navigator retries only 5xx).
fn classify_status(status: StatusCode) -> NavigationError {
    match status.as_u16() {
        403 | 429 => NavigationError::Blocked,
        code => NavigationError::HttpStatus(code),
    }
}

/// Builds the request header map from per-target headers and cookies
///
/// Header names/values are validated at configuration time; anything that
/// still fails to encode is skipped with a warning rather than aborting
/// the navigation.
fn build_headers(headers: &[(String, String)], cookies: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => {
                tracing::warn!("Skipping unencodable request header: {}", name);
            }
        }
    }

    if !cookies.is_empty() {
        let joined = cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        match HeaderValue::from_str(&joined) {
            Ok(value) => {
                map.insert(COOKIE, value);
            }
            Err(_) => {
                tracing::warn!("Skipping unencodable cookie header");
            }
        }
    }

    map
}

/// Evaluates a selector against a document outside any await point
///
/// `scraper::Html` is not `Send`, so the parse is confined to this
/// synchronous helper and only owned [`DomNode`]s cross task boundaries.
fn collect_nodes(html: &str, selector: &str) -> Result<Vec<DomNode>, BrowserError> {
    let parsed = Selector::parse(selector)
        .map_err(|e| BrowserError::Selector(format!("{selector}: {e:?}")))?;

    let document = Html::parse_document(html);
    let nodes = document
        .select(&parsed)
        .map(|element| DomNode {
            text: element.text().collect::<String>().trim().to_string(),
            attributes: element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        })
        .collect();

    Ok(nodes)
}

/// Checks a fetched document for the configured block marker
fn has_block_marker(html: &str, marker: &Selector) -> bool {
    let document = Html::parse_document(html);
    document.select(marker).next().is_some()
}

#[async_trait]
impl BrowserCapability for HttpBrowser {
    async fn new_session(&self) -> Result<SessionHandle, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .await
            .insert(id, SessionState::default());
        tracing::debug!("Opened browser session {}", id);
        Ok(SessionHandle(id))
    }

    async fn close_session(&self, handle: SessionHandle) {
        self.sessions.lock().await.remove(&handle.0);
        tracing::debug!("Closed browser session {}", handle.0);
    }

    async fn navigate(
        &self,
        handle: SessionHandle,
        url: &Url,
        headers: &[(String, String)],
        cookies: &[(String, String)],
        timeout: Duration,
    ) -> Result<NavigatedPage, NavigateFailure> {
        let request = self
            .client
            .get(url.clone())
            .headers(build_headers(headers, cookies))
            .timeout(timeout);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(NavigateFailure::target_scoped(classify_transport_error(&e)))
            }
        };

        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(NavigateFailure::target_scoped(classify_status(status)));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Err(NavigateFailure::target_scoped(NavigationError::Network(
                    e.to_string(),
                )))
            }
        };

        if let Some(marker) = &self.blocked_marker {
            if has_block_marker(&body, marker) {
                return Err(NavigateFailure::target_scoped(NavigationError::Blocked));
            }
        }

        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(&handle.0).ok_or_else(|| {
            // The context disappeared under us; session-scoped by definition.
            NavigateFailure::session_scoped(NavigationError::Network(format!(
                "session {} is gone",
                handle.0
            )))
        })?;
        state.html = Some(body);
        state.final_url = Some(final_url.clone());

        Ok(NavigatedPage {
            final_url,
            status: status.as_u16(),
        })
    }

    async fn query_selector(
        &self,
        handle: SessionHandle,
        selector: &str,
    ) -> Result<Vec<DomNode>, BrowserError> {
        let html = {
            let sessions = self.sessions.lock().await;
            let state = sessions
                .get(&handle.0)
                .ok_or(BrowserError::UnknownSession(handle.0))?;
            state.html.clone().ok_or(BrowserError::NoPage(handle.0))?
        };

        collect_nodes(&html, selector)
    }

    async fn wait_for_quiescence(&self, handle: SessionHandle, _window: Duration) -> bool {
        // A fetched document has no pending scripts or requests; it is
        // quiescent as soon as a page is present.
        let sessions = self.sessions.lock().await;
        sessions
            .get(&handle.0)
            .map(|state| state.html.is_some())
            .unwrap_or(false)
    }
}
