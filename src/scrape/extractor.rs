//! Extractor - rule evaluation against a loaded page
//!
//! Given a loaded page and a target's rule set, the extractor produces a
//! record. Rules are evaluated in declaration order and the record's field
//! order is the insertion order of the rules. A page that never reaches a
//! stable rendered state yields `UnstablePage` instead of partial data;
//! whether that is retried is the coordinator's decision, never this
//! module's.

use crate::browser::{BrowserCapability, DomNode};
use crate::pool::BrowserSession;
use crate::scrape::navigator::LoadedPage;
use crate::target::{
    ExtractionRule, Field, FieldValue, Record, RuleError, TargetDescriptor, TargetError, ValueKind,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Evaluates extraction rules through the browser capability
pub struct Extractor {
    browser: Arc<dyn BrowserCapability>,
    quiescence_window: Duration,
}

impl Extractor {
    pub fn new(browser: Arc<dyn BrowserCapability>, quiescence_window: Duration) -> Self {
        Self {
            browser,
            quiescence_window,
        }
    }

    /// Produces a record from the page loaded in `session`
    ///
    /// Returns the record together with one error per missing required
    /// rule. Optional rules that match nothing are omitted silently.
    pub async fn extract(
        &self,
        session: &BrowserSession,
        page: &LoadedPage,
        target: &TargetDescriptor,
    ) -> Result<(Record, Vec<RuleError>), TargetError> {
        if !self
            .browser
            .wait_for_quiescence(session.handle(), self.quiescence_window)
            .await
        {
            tracing::debug!(
                "Page for {} did not settle within {}ms",
                target.id,
                self.quiescence_window.as_millis()
            );
            return Err(TargetError::UnstablePage);
        }

        let mut fields = Vec::new();
        let mut errors = Vec::new();

        for rule in &target.rules {
            // Selectors are validated at configuration time, so a query
            // error here means the capability lost the page, not that the
            // rule matched nothing. Treating it as an empty match would
            // launder a broken session into a Partial record.
            let nodes = match self
                .browser
                .query_selector(session.handle(), &rule.selector)
                .await
            {
                Ok(nodes) => nodes,
                Err(e) => {
                    tracing::warn!(
                        "Selector '{}' failed on {}: {}",
                        rule.selector,
                        target.id,
                        e
                    );
                    return Err(TargetError::Capability(e.to_string()));
                }
            };

            match coerce(rule, &nodes, &page.final_url) {
                Some(value) => fields.push(Field {
                    name: rule.name.clone(),
                    value,
                }),
                None if rule.required => {
                    errors.push(RuleError::MissingRequiredField(rule.name.clone()))
                }
                None => {}
            }
        }

        let record = Record {
            target: target.id.clone(),
            extracted_at: Utc::now(),
            fields,
        };

        Ok((record, errors))
    }
}

/// Coerces matched nodes into a field value per the rule's declared kind
///
/// Returns `None` when nothing usable matched.
fn coerce(rule: &ExtractionRule, nodes: &[DomNode], base_url: &Url) -> Option<FieldValue> {
    match rule.kind {
        ValueKind::Text => nodes.first().map(|n| FieldValue::Text(n.text.clone())),

        ValueKind::Attribute => {
            let attribute = rule.attribute.as_deref()?;
            nodes
                .first()
                .and_then(|n| n.attribute(attribute))
                .map(|v| FieldValue::Text(v.to_string()))
        }

        ValueKind::Link => nodes
            .iter()
            .find_map(|n| n.attribute("href"))
            .and_then(|href| base_url.join(href).ok())
            .map(|resolved| FieldValue::Text(resolved.to_string())),

        ValueKind::List => {
            if nodes.is_empty() {
                None
            } else {
                Some(FieldValue::Many(
                    nodes.iter().map(|n| n.text.clone()).collect(),
                ))
            }
        }
    }
}
