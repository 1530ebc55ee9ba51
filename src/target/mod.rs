//! Target descriptors, extraction rules, and per-target outcomes
//!
//! This module defines the inert data types that flow through a scrape run:
//! what to visit, what to pull out of the page, and what came of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Value kind for an extraction rule
///
/// This is a closed set; unknown kinds are rejected when the configuration
/// is parsed, not at extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// The concatenated text content of the first matching element
    Text,

    /// A named attribute of the first matching element
    Attribute,

    /// The `href` of the first matching element, resolved against the page URL
    Link,

    /// The text content of every matching element
    List,
}

/// A single named extraction rule
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionRule {
    /// Field name the extracted value is stored under
    pub name: String,

    /// CSS selector to evaluate against the rendered page
    pub selector: String,

    /// How the matched element(s) are coerced into a field value
    pub kind: ValueKind,

    /// Attribute name, only meaningful (and mandatory) for `kind = "attribute"`
    #[serde(default)]
    pub attribute: Option<String>,

    /// Whether a missing value is an error (`true`) or silently omitted
    #[serde(default)]
    pub required: bool,
}

/// One URL to scrape, with its extraction rules and per-target policy
///
/// Immutable once submitted to the coordinator.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    /// Caller-chosen identifier, unique within a run
    pub id: String,

    /// The URL to navigate to
    pub url: Url,

    /// Extraction rules, evaluated in declaration order
    pub rules: Vec<ExtractionRule>,

    /// Total wall-clock budget for all navigation attempts
    pub timeout: Duration,

    /// Maximum number of navigation attempts (at least 1)
    pub retry_budget: u32,

    /// Extra request headers applied at navigation time
    pub headers: Vec<(String, String)>,

    /// Cookies applied at navigation time
    pub cookies: Vec<(String, String)>,
}

/// An extracted field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A single text value
    Text(String),

    /// Multiple values, for `list` rules
    Many(Vec<String>),
}

/// A named field within a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

/// Structured data extracted from one target
///
/// Field order is the declaration order of the rules that produced them.
/// Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    /// The target this record was extracted from
    pub target: String,

    /// When extraction completed
    pub extracted_at: DateTime<Utc>,

    /// Extracted fields, in rule declaration order
    pub fields: Vec<Field>,
}

impl Record {
    /// Looks up a field value by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }
}

/// Classified navigation failure
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum NavigationError {
    #[error("navigation timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("blocked by target site")]
    Blocked,
}

impl NavigationError {
    /// Whether this failure class is worth another attempt
    ///
    /// Timeouts, network errors, and 5xx responses are transient; 4xx
    /// responses and explicit block signals are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            NavigationError::Timeout | NavigationError::Network(_) => true,
            NavigationError::HttpStatus(status) => *status >= 500,
            NavigationError::Blocked => false,
        }
    }
}

/// Per-rule extraction error
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "field", rename_all = "kebab-case")]
pub enum RuleError {
    #[error("missing required field: {0}")]
    MissingRequiredField(String),
}

/// Terminal classified error for one target
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum TargetError {
    /// No session became available within the queue wait budget
    #[error("session pool exhausted")]
    PoolExhausted,

    /// The capability could not open a browsing context at all
    #[error("browser session could not be started: {0}")]
    SessionStart(String),

    /// The final navigation failure after the retry budget was spent
    #[error("navigation failed: {0}")]
    Navigation(#[from] NavigationError),

    /// The page never reached a stable rendered state
    #[error("page never reached a stable rendered state")]
    UnstablePage,

    /// The capability failed while reading the loaded page
    #[error("browser capability failure: {0}")]
    Capability(String),
}

/// Coarse outcome kind, used for summary counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Partial,
    Failed,
    Cancelled,
}

/// Terminal status of one target
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OutcomeStatus {
    /// Navigation succeeded and every required rule produced a value
    Success { record: Record },

    /// Navigation succeeded but one or more required rules found nothing
    Partial {
        record: Record,
        missing: Vec<RuleError>,
    },

    /// The target failed with a classified error
    Failed { error: TargetError },

    /// The run was cancelled before this target reached a terminal state
    Cancelled,
}

impl OutcomeStatus {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            OutcomeStatus::Success { .. } => OutcomeKind::Success,
            OutcomeStatus::Partial { .. } => OutcomeKind::Partial,
            OutcomeStatus::Failed { .. } => OutcomeKind::Failed,
            OutcomeStatus::Cancelled => OutcomeKind::Cancelled,
        }
    }
}

/// The single result emitted for one submitted target
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    /// The target identifier
    pub target: String,

    /// Navigation attempts made (0 if navigation never started)
    pub attempts: u32,

    /// Terminal status, flattened so the tag sits at the top level of the
    /// serialized outcome
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl TaskOutcome {
    pub(crate) fn cancelled(target: &str, attempts: u32) -> Self {
        Self {
            target: target.to_string(),
            attempts,
            status: OutcomeStatus::Cancelled,
        }
    }

    pub(crate) fn failed(target: &str, attempts: u32, error: TargetError) -> Self {
        Self {
            target: target.to_string(),
            attempts,
            status: OutcomeStatus::Failed { error },
        }
    }
}
