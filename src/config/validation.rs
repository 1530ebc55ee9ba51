use crate::config::types::{
    BrowserConfig, Config, NavigatorSettings, PoolSettings, RunSettings, TargetConfig,
};
use crate::target::ValueKind;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
///
/// Every check here runs before any navigation begins; a failure aborts
/// the run with a configuration error.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_run(&config.run)?;
    validate_pool(&config.pool)?;
    validate_navigator(&config.navigator)?;
    validate_browser(&config.browser)?;
    validate_targets(&config.targets)?;
    Ok(())
}

/// Validates run-level dispatch settings
pub fn validate_run(run: &RunSettings) -> Result<(), ConfigError> {
    if run.concurrency < 1 || run.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            run.concurrency
        )));
    }

    if let Some(starts) = run.rate_limit_starts {
        if starts < 1 {
            return Err(ConfigError::Validation(
                "rate-limit-starts must be >= 1 when set".to_string(),
            ));
        }
        if run.rate_limit_window_ms < 1 {
            return Err(ConfigError::Validation(
                "rate-limit-window-ms must be >= 1".to_string(),
            ));
        }
    }

    if run.max_queue_wait_ms < 1 {
        return Err(ConfigError::Validation(
            "max-queue-wait-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates session pool settings
pub fn validate_pool(pool: &PoolSettings) -> Result<(), ConfigError> {
    if pool.max_sessions < 1 || pool.max_sessions > 32 {
        return Err(ConfigError::Validation(format!(
            "max-sessions must be between 1 and 32, got {}",
            pool.max_sessions
        )));
    }

    if pool.max_session_uses < 1 {
        return Err(ConfigError::Validation(
            "max-session-uses must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates navigator retry policy settings
pub fn validate_navigator(navigator: &NavigatorSettings) -> Result<(), ConfigError> {
    if navigator.base_backoff_ms < 1 {
        return Err(ConfigError::Validation(
            "base-backoff-ms must be >= 1".to_string(),
        ));
    }

    if navigator.max_backoff_ms < navigator.base_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max-backoff-ms ({}) must be >= base-backoff-ms ({})",
            navigator.max_backoff_ms, navigator.base_backoff_ms
        )));
    }

    if navigator.default_retry_budget < 1 {
        return Err(ConfigError::Validation(
            "default-retry-budget must be >= 1".to_string(),
        ));
    }

    if navigator.default_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "default-timeout-ms must be >= 100, got {}",
            navigator.default_timeout_ms
        )));
    }

    Ok(())
}

/// Validates browser backend settings
pub fn validate_browser(browser: &BrowserConfig) -> Result<(), ConfigError> {
    if browser.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if let Some(marker) = &browser.blocked_marker {
        Selector::parse(marker).map_err(|e| {
            ConfigError::InvalidSelector(format!("blocked-marker '{}': {:?}", marker, e))
        })?;
    }

    Ok(())
}

/// Validates the target list and every extraction rule
pub fn validate_targets(targets: &[TargetConfig]) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();

    for target in targets {
        if target.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "target id cannot be empty".to_string(),
            ));
        }

        if !seen_ids.insert(target.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate target id '{}'",
                target.id
            )));
        }

        let url = Url::parse(&target.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("'{}': {}", target.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "'{}': only http and https schemes are supported",
                target.url
            )));
        }

        if let Some(budget) = target.retry_budget {
            if budget < 1 {
                return Err(ConfigError::Validation(format!(
                    "target '{}': retry-budget must be >= 1",
                    target.id
                )));
            }
        }

        if let Some(timeout) = target.timeout_ms {
            if timeout < 100 {
                return Err(ConfigError::Validation(format!(
                    "target '{}': timeout-ms must be >= 100",
                    target.id
                )));
            }
        }

        for (name, _) in &target.headers {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ConfigError::Validation(format!(
                    "target '{}': invalid header name '{}'",
                    target.id, name
                )));
            }
        }

        validate_rules(target)?;
    }

    Ok(())
}

/// Validates the extraction rules of a single target
fn validate_rules(target: &TargetConfig) -> Result<(), ConfigError> {
    if target.rules.is_empty() {
        return Err(ConfigError::Validation(format!(
            "target '{}' must declare at least one rule",
            target.id
        )));
    }

    let mut seen_names = HashSet::new();

    for rule in &target.rules {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "target '{}': rule name cannot be empty",
                target.id
            )));
        }

        if !seen_names.insert(rule.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "target '{}': duplicate rule name '{}'",
                target.id, rule.name
            )));
        }

        Selector::parse(&rule.selector).map_err(|e| {
            ConfigError::InvalidSelector(format!(
                "target '{}' rule '{}': '{}': {:?}",
                target.id, rule.name, rule.selector, e
            ))
        })?;

        match rule.kind {
            ValueKind::Attribute => {
                if rule.attribute.as_deref().map_or(true, |a| a.trim().is_empty()) {
                    return Err(ConfigError::Validation(format!(
                        "target '{}' rule '{}': attribute kind requires an attribute name",
                        target.id, rule.name
                    )));
                }
            }
            _ => {
                if rule.attribute.is_some() {
                    return Err(ConfigError::Validation(format!(
                        "target '{}' rule '{}': attribute is only valid for attribute kind",
                        target.id, rule.name
                    )));
                }
            }
        }
    }

    Ok(())
}
