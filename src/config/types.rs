use crate::target::{ExtractionRule, TargetDescriptor};
use crate::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Main configuration structure for Spindrift
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunSettings,
    pub pool: PoolSettings,
    pub navigator: NavigatorSettings,
    pub browser: BrowserConfig,
    pub sink: SinkSettings,
    #[serde(rename = "target")]
    pub targets: Vec<TargetConfig>,
}

/// Run-level dispatch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Maximum number of targets in flight simultaneously
    pub concurrency: u32,

    /// Maximum navigation starts per rate window; absent means unlimited
    #[serde(rename = "rate-limit-starts")]
    pub rate_limit_starts: Option<u32>,

    /// Rate window length (milliseconds)
    #[serde(rename = "rate-limit-window-ms")]
    pub rate_limit_window_ms: u64,

    /// How long a target may wait for a pool session before failing (milliseconds)
    #[serde(rename = "max-queue-wait-ms")]
    pub max_queue_wait_ms: u64,

    /// Emit outcomes in submission order instead of completion order
    #[serde(rename = "ordered-outcomes")]
    pub ordered_outcomes: bool,

    /// Optional wall-clock deadline for the whole run (milliseconds)
    #[serde(rename = "run-deadline-ms")]
    pub run_deadline_ms: Option<u64>,

    /// Abort the run when the sink rejects an outcome
    #[serde(rename = "abort-on-sink-error")]
    pub abort_on_sink_error: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit_starts: None,
            rate_limit_window_ms: 1000,
            max_queue_wait_ms: 30_000,
            ordered_outcomes: false,
            run_deadline_ms: None,
            abort_on_sink_error: false,
        }
    }
}

impl RunSettings {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_millis(self.max_queue_wait_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_ms.map(Duration::from_millis)
    }
}

/// Session pool sizing and retirement policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum concurrently open browser sessions
    #[serde(rename = "max-sessions")]
    pub max_sessions: u32,

    /// A session is retired after this many uses, even when healthy
    #[serde(rename = "max-session-uses")]
    pub max_session_uses: u32,

    /// A session is retired once older than this (milliseconds)
    #[serde(rename = "max-session-age-ms")]
    pub max_session_age_ms: u64,

    /// An idle session is destroyed after sitting unused this long (milliseconds)
    #[serde(rename = "max-idle-ms")]
    pub max_idle_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            max_session_uses: 32,
            max_session_age_ms: 600_000,
            max_idle_ms: 60_000,
        }
    }
}

impl PoolSettings {
    pub fn max_session_age(&self) -> Duration {
        Duration::from_millis(self.max_session_age_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

/// Navigation retry and readiness policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigatorSettings {
    /// First backoff delay (milliseconds); doubles per attempt
    #[serde(rename = "base-backoff-ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on a single backoff delay (milliseconds)
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Quiescence window the extractor waits for before reading the page (milliseconds)
    #[serde(rename = "quiescence-window-ms")]
    pub quiescence_window_ms: u64,

    /// Per-target timeout when the target does not set its own (milliseconds)
    #[serde(rename = "default-timeout-ms")]
    pub default_timeout_ms: u64,

    /// Attempt budget when the target does not set its own
    #[serde(rename = "default-retry-budget")]
    pub default_retry_budget: u32,
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self {
            base_backoff_ms: 250,
            max_backoff_ms: 5000,
            quiescence_window_ms: 2000,
            default_timeout_ms: 30_000,
            default_retry_budget: 3,
        }
    }
}

impl NavigatorSettings {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn quiescence_window(&self) -> Duration {
        Duration::from_millis(self.quiescence_window_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Settings for the bundled HTTP browser backend
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// User agent string sent with every navigation
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Connection establishment timeout (milliseconds)
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    /// Selector whose presence on a loaded page signals an anti-bot block
    #[serde(rename = "blocked-marker")]
    pub blocked_marker: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: "spindrift/0.3".to_string(),
            connect_timeout_ms: 10_000,
            blocked_marker: None,
        }
    }
}

impl BrowserConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Result sink configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Path outcomes are appended to as JSON lines; absent discards records
    #[serde(rename = "records-path")]
    pub records_path: Option<String>,
}

/// One target entry from the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Unique identifier for this target within the run
    pub id: String,

    /// URL to scrape
    pub url: String,

    /// Per-target navigation budget override (milliseconds)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Per-target attempt budget override
    #[serde(rename = "retry-budget")]
    pub retry_budget: Option<u32>,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Cookies applied at navigation time
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Extraction rules, evaluated in declaration order
    #[serde(rename = "rule")]
    pub rules: Vec<ExtractionRule>,
}

impl Config {
    /// Builds immutable target descriptors, applying navigator defaults
    ///
    /// Assumes the configuration already passed validation; URL parse
    /// failures still surface as `ConfigError` rather than panicking.
    pub fn build_targets(&self) -> Result<Vec<TargetDescriptor>, ConfigError> {
        self.targets
            .iter()
            .map(|t| {
                let url = Url::parse(&t.url)
                    .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", t.url, e)))?;
                Ok(TargetDescriptor {
                    id: t.id.clone(),
                    url,
                    rules: t.rules.clone(),
                    timeout: t
                        .timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or_else(|| self.navigator.default_timeout()),
                    retry_budget: t
                        .retry_budget
                        .unwrap_or(self.navigator.default_retry_budget),
                    headers: t
                        .headers
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    cookies: t
                        .cookies
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                })
            })
            .collect()
    }
}
