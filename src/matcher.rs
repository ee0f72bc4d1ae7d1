//! The rule matcher evaluates a single rule against a batch of alerts.
//!
//! Conditions are checked in order; each condition consumes the first unused
//! alert whose summary contains the condition's pattern as a literal
//! substring and whose age meets the condition's dwell interval. The result
//! is all-or-nothing: either every condition found an alert, or the rule did
//! not match at all.

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::models::{Alert, Rule};

/// An error that occurs while evaluating a rule against a batch of alerts.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// A summary condition could not be compiled into a matching pattern.
    #[error("failed to compile pattern for condition '{condition}': {source}")]
    InvalidPattern {
        /// The offending summary condition.
        condition: String,
        /// The underlying regex error.
        source: regex::Error,
    },
}

/// Checks a batch of alerts against a rule's conditions.
///
/// Patterns are matched as literal substrings (meta characters are escaped
/// before compilation). An alert satisfies condition `i` when its summary
/// contains pattern `i` and `now - alert.created_at` is at least interval
/// `i`; every alert satisfies at most one condition per call.
///
/// Returns `Some` with exactly one alert per condition, in condition order,
/// or `None` when any condition goes unsatisfied.
pub fn find_matching_alerts(
    alerts: &[Alert],
    rule: &Rule,
    now: DateTime<Utc>,
) -> Result<Option<Vec<Alert>>, MatcherError> {
    tracing::debug!(
        num_alerts = alerts.len(),
        rule_id = %rule.id,
        conditions = rule.alerts_summary_conditions.len(),
        "Matching alerts against rule conditions."
    );

    let mut matching_alerts = Vec::with_capacity(rule.alerts_summary_conditions.len());
    let mut used = vec![false; alerts.len()];

    let conditions = rule
        .alerts_summary_conditions
        .iter()
        .zip(rule.alerts_activity_interval_conditions.iter());

    for (index, (condition, interval)) in conditions.enumerate() {
        let pattern = Regex::new(&regex::escape(condition)).map_err(|source| {
            MatcherError::InvalidPattern { condition: condition.clone(), source }
        })?;

        let mut condition_match_found = false;

        for (alert_index, alert) in alerts.iter().enumerate() {
            if used[alert_index] {
                continue;
            }

            // An alert from the future has no age and cannot satisfy any
            // dwell requirement.
            let age = match now.signed_duration_since(alert.created_at).to_std() {
                Ok(age) => age,
                Err(_) => continue,
            };

            if pattern.is_match(&alert.summary) && age >= *interval {
                matching_alerts.push(alert.clone());
                used[alert_index] = true;
                condition_match_found = true;
                break;
            }
        }

        if !condition_match_found {
            tracing::debug!(
                rule_id = %rule.id,
                condition_index = index,
                condition = %condition,
                interval_secs = interval.as_secs(),
                "No alert satisfies the condition; rule does not match."
            );
            return Ok(None);
        }
    }

    tracing::debug!(
        rule_id = %rule.id,
        num_matching = matching_alerts.len(),
        "All rule conditions satisfied."
    );

    Ok(Some(matching_alerts))
}
