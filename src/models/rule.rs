//! This module defines the `Rule` structure, an operator-authored recipe that
//! maps a sequence of alert patterns to an incident template.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{
        deserialize_duration_from_seconds, deserialize_duration_vec_from_seconds,
        serialize_duration_to_seconds, serialize_duration_vec_to_seconds,
    },
    models::incident::{Department, FailureType, Manageable},
};

/// The smallest allowed quiescence gate for finishing an incident.
const MIN_FINISHING_INTERVAL: Duration = Duration::from_secs(60);

/// An error that occurs during rule validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleValidationError {
    /// The number of summary conditions does not match the number of activity
    /// intervals.
    #[error(
        "mismatch in number of summary conditions ({conditions}) and activity intervals ({intervals})"
    )]
    ConditionCountMismatch {
        /// How many summary conditions the rule carries.
        conditions: usize,
        /// How many activity intervals the rule carries.
        intervals: usize,
    },

    /// The rule has no summary conditions at all.
    #[error("at least one summary condition is required")]
    EmptyConditions,

    /// The finishing interval is below the allowed minimum.
    #[error("incident finishing interval must be at least {min:?}, got {got:?}")]
    FinishingIntervalTooShort {
        /// The configured interval.
        got: Duration,
        /// The smallest allowed interval.
        min: Duration,
    },
}

/// A rule that dictates how alerts translate into incidents.
///
/// The identity (`id`) is immutable; everything else is operator-editable
/// configuration. `alerts_summary_conditions` and
/// `alerts_activity_interval_conditions` are index-aligned: condition `i`
/// requires an alert that contains pattern `i` and has been active for at
/// least interval `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier for the rule.
    pub id: String,

    /// A muted rule is skipped by the matcher entirely.
    pub is_muted: bool,

    /// Free-form operator description of the rule.
    pub description: String,

    /// Ordered literal text patterns an alert batch must satisfy.
    pub alerts_summary_conditions: Vec<String>,

    /// Per-condition dwell times, index-aligned with the summary conditions.
    #[serde(
        deserialize_with = "deserialize_duration_vec_from_seconds",
        serialize_with = "serialize_duration_vec_to_seconds"
    )]
    pub alerts_activity_interval_conditions: Vec<Duration>,

    /// How long after creation an incident remains eligible for update or
    /// reopen.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds"
    )]
    pub incident_life_time: Duration,

    /// How long an actual incident may go without a new match before it is
    /// finished.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds"
    )]
    pub incident_finishing_interval: Duration,

    /// Summary copied into incidents created by this rule.
    pub set_incident_summary: String,

    /// Description copied into incidents created by this rule.
    pub set_incident_description: String,

    /// Department copied into incidents created by this rule.
    pub set_incident_department: Department,

    /// Client-affect note copied into incidents created by this rule.
    pub set_incident_client_affect: String,

    /// Manageability flag copied into incidents created by this rule.
    pub set_incident_is_manageable: Manageable,

    /// Affected sale channels copied into incidents created by this rule.
    pub set_incident_sale_channels: Vec<String>,

    /// Troubled services copied into incidents created by this rule.
    pub set_incident_trouble_services: Vec<String>,

    /// Failure classification copied into incidents created by this rule.
    pub set_incident_failure_type: FailureType,

    /// Labels copied into incidents created by this rule.
    pub set_incident_labels: Vec<String>,

    /// Downtime flag copied into incidents created by this rule.
    pub set_incident_is_downtime: bool,

    /// Timestamp when the rule was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last update to the rule.
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Validates the rule's internal consistency.
    ///
    /// Enforced on every save: the condition and interval sequences must be
    /// non-empty and of equal length, and the finishing interval must be at
    /// least one minute.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.alerts_summary_conditions.is_empty() {
            return Err(RuleValidationError::EmptyConditions);
        }

        if self.alerts_summary_conditions.len() != self.alerts_activity_interval_conditions.len() {
            return Err(RuleValidationError::ConditionCountMismatch {
                conditions: self.alerts_summary_conditions.len(),
                intervals: self.alerts_activity_interval_conditions.len(),
            });
        }

        if self.incident_finishing_interval < MIN_FINISHING_INTERVAL {
            return Err(RuleValidationError::FinishingIntervalTooShort {
                got: self.incident_finishing_interval,
                min: MIN_FINISHING_INTERVAL,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> Rule {
        let now = Utc::now();
        Rule {
            id: "rule-1".to_string(),
            is_muted: false,
            description: "disk pressure".to_string(),
            alerts_summary_conditions: vec!["disk full".to_string()],
            alerts_activity_interval_conditions: vec![Duration::from_secs(0)],
            incident_life_time: Duration::from_secs(3600),
            incident_finishing_interval: Duration::from_secs(300),
            set_incident_summary: "Disk full".to_string(),
            set_incident_description: String::new(),
            set_incident_department: Department::InternalIt,
            set_incident_client_affect: String::new(),
            set_incident_is_manageable: Manageable::Yes,
            set_incident_sale_channels: vec!["web".to_string()],
            set_incident_trouble_services: vec!["storage".to_string()],
            set_incident_failure_type: FailureType::Infrastructure,
            set_incident_labels: vec!["disk".to_string()],
            set_incident_is_downtime: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_rule() {
        assert_eq!(sample_rule().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_condition_count_mismatch() {
        let mut rule = sample_rule();
        rule.alerts_summary_conditions.push("db slow".to_string());

        assert_eq!(
            rule.validate(),
            Err(RuleValidationError::ConditionCountMismatch { conditions: 2, intervals: 1 })
        );
    }

    #[test]
    fn test_validate_rejects_empty_conditions() {
        let mut rule = sample_rule();
        rule.alerts_summary_conditions.clear();
        rule.alerts_activity_interval_conditions.clear();

        assert_eq!(rule.validate(), Err(RuleValidationError::EmptyConditions));
    }

    #[test]
    fn test_validate_rejects_short_finishing_interval() {
        let mut rule = sample_rule();
        rule.incident_finishing_interval = Duration::from_secs(30);

        assert!(matches!(
            rule.validate(),
            Err(RuleValidationError::FinishingIntervalTooShort { .. })
        ));
    }

    #[test]
    fn test_rule_serde_round_trip() {
        let rule = sample_rule();

        let json = serde_json::to_string(&rule).unwrap();
        let decoded: Rule = serde_json::from_str(&json).unwrap();

        assert_eq!(rule, decoded);
    }
}
