//! This module defines the `Incident` structure and its associated enums. An
//! incident is the stateful object representing a live or closed operational
//! event, created either automatically by the incident engine or manually
//! through the external CRUD surface.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::rule::Rule;

/// The creator recorded on incidents produced by the engine.
const AUTO_INCIDENT_CREATOR: &str = "handler";

/// An error produced when a stored string does not map to a known enum value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownEnumValue {
    /// Which enum the value was parsed for.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Returns the wire representation of the value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownEnumValue { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

string_enum! {
    /// How an incident came into existence.
    IncidentType, "incident type" {
        /// Created by an operator through the CRUD surface.
        Manual => "manual",
        /// Created by the incident engine from matching alerts.
        Auto => "auto",
    }
}

string_enum! {
    /// The lifecycle state of an incident.
    ///
    /// `Closed` is a terminal, operator-driven state: the engine never writes
    /// it but honors it by creating a fresh incident instead of reopening.
    IncidentStatus, "incident status" {
        /// The incident is live.
        Actual => "actual",
        /// The incident aged out or went quiet; it may still be reopened.
        Finished => "finished",
        /// An operator closed the incident for good.
        Closed => "closed",
    }
}

string_enum! {
    /// The department responsible for handling an incident.
    Department, "department" {
        /// The internal digital products team.
        InternalDigital => "internal_digital",
        /// The internal IT team.
        InternalIt => "internal_it",
        /// An external service provider.
        ExternalService => "external_service",
    }
}

string_enum! {
    /// Whether an incident can be acted upon by the responsible team.
    Manageable, "manageability" {
        /// Fully manageable.
        Yes => "yes",
        /// Outside the team's control.
        No => "no",
        /// Manageable through a third party.
        Indirectly => "indirectly",
    }
}

string_enum! {
    /// Classification of the failure behind an incident.
    FailureType, "failure type" {
        /// Network connectivity failure.
        Network => "err_network",
        /// Payment acquiring failure.
        Acquiring => "err_acquiring",
        /// Defect introduced by development.
        Development => "err_development",
        /// Security incident.
        Security => "err_security",
        /// Infrastructure failure.
        Infrastructure => "err_infrastructure",
        /// Misconfiguration.
        Configuration => "err_configuration",
        /// Menu or catalog data problem.
        Menu => "err_menu",
        /// Failure of an external dependency.
        External => "err_external",
        /// Anything that does not fit the other classes.
        Other => "err_other",
    }
}

/// An error that occurs during incident validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IncidentValidationError {
    /// An auto incident is missing its originating rule id.
    #[error("auto incidents require a rule id")]
    MissingRuleId,

    /// An auto incident carries a matching count below one.
    #[error("auto incidents require a matching count of at least 1, got {0}")]
    InvalidMatchingCount(i64),

    /// An auto incident carries no serialized alerts data.
    #[error("auto incidents require alerts data")]
    MissingAlertsData,

    /// A finished or closed incident has no end time.
    #[error("{0} incidents require an end time")]
    MissingEndTime(IncidentStatus),

    /// The end time precedes the start time.
    #[error("incident end time {to_at} precedes start time {from_at}")]
    EndBeforeStart {
        /// Start of the incident.
        from_at: DateTime<Utc>,
        /// Recorded end of the incident.
        to_at: DateTime<Utc>,
    },

    /// The last matching time precedes the start time.
    #[error("last matching time {last_matching_time} precedes start time {from_at}")]
    MatchBeforeStart {
        /// Start of the incident.
        from_at: DateTime<Utc>,
        /// Recorded time of the last rule match.
        last_matching_time: DateTime<Utc>,
    },
}

/// An incident record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Unique identifier for the incident.
    pub id: String,

    /// Whether the incident was created manually or by the engine.
    #[serde(rename = "type")]
    pub incident_type: IncidentType,

    /// Current lifecycle state.
    pub status: IncidentStatus,

    /// Brief summary of the incident.
    pub summary: String,

    /// Detailed description of the incident.
    pub description: String,

    /// Start time of the incident.
    pub from_at: DateTime<Utc>,

    /// End time of the incident; unset while the incident is actual.
    pub to_at: Option<DateTime<Utc>>,

    /// Whether an operator has confirmed the incident.
    pub is_confirmed: bool,

    /// When the incident was confirmed, if it was.
    pub confirmation_time: Option<DateTime<Utc>>,

    /// Calendar quarter (1..=4) the incident occurred in.
    pub quarter: i32,

    /// Department responsible for handling the incident.
    pub department: Department,

    /// How clients are affected.
    pub client_affect: String,

    /// Whether the incident is manageable by the responsible team.
    pub is_manageable: Manageable,

    /// Sale channels affected by the incident.
    pub sale_channels: Vec<String>,

    /// Services troubled by the incident.
    pub trouble_services: Vec<String>,

    /// Financial losses attributed to the incident.
    pub fin_losses: i64,

    /// Classification of the underlying failure.
    pub failure_type: FailureType,

    /// Whether a deployment is involved.
    pub is_deploy: bool,

    /// Link to the deployment, when one is involved.
    pub deploy_link: String,

    /// Labels associated with the incident.
    pub labels: Vec<String>,

    /// Whether the incident caused downtime.
    pub is_downtime: bool,

    /// Link to the postmortem report, once written.
    pub postmortem_link: String,

    /// Who created the incident record.
    pub creator: String,

    /// Originating rule; present iff the incident was created by the engine.
    pub rule_id: Option<String>,

    /// How many times the rule has matched into this incident.
    pub matching_count: i64,

    /// Time of the most recent rule match.
    pub last_matching_time: DateTime<Utc>,

    /// JSON blob of the alerts that matched at creation time.
    pub alerts_data: String,

    /// Timestamp when the incident was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp when the incident was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Builds a fresh actual incident from a rule's payload attributes.
    ///
    /// `alerts_data` is the serialized batch of alerts that satisfied the
    /// rule. The new incident starts with `matching_count = 1` and both
    /// `from_at` and `last_matching_time` set to `now`.
    pub fn from_rule(rule: &Rule, alerts_data: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_type: IncidentType::Auto,
            status: IncidentStatus::Actual,
            summary: rule.set_incident_summary.clone(),
            description: rule.set_incident_description.clone(),
            from_at: now,
            to_at: None,
            is_confirmed: false,
            confirmation_time: None,
            quarter: quarter_of(now),
            department: rule.set_incident_department,
            client_affect: rule.set_incident_client_affect.clone(),
            is_manageable: rule.set_incident_is_manageable,
            sale_channels: rule.set_incident_sale_channels.clone(),
            trouble_services: rule.set_incident_trouble_services.clone(),
            fin_losses: 0,
            failure_type: rule.set_incident_failure_type,
            is_deploy: false,
            deploy_link: String::new(),
            labels: rule.set_incident_labels.clone(),
            is_downtime: rule.set_incident_is_downtime,
            postmortem_link: String::new(),
            creator: AUTO_INCIDENT_CREATOR.to_string(),
            rule_id: Some(rule.id.clone()),
            matching_count: 1,
            last_matching_time: now,
            alerts_data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates the incident's internal consistency.
    ///
    /// Auto incidents must reference a rule, carry at least one match and a
    /// serialized alerts blob; finished and closed incidents must carry an
    /// end time that does not precede the start.
    pub fn validate(&self) -> Result<(), IncidentValidationError> {
        if self.incident_type == IncidentType::Auto {
            if self.rule_id.is_none() {
                return Err(IncidentValidationError::MissingRuleId);
            }
            if self.matching_count < 1 {
                return Err(IncidentValidationError::InvalidMatchingCount(self.matching_count));
            }
            if self.alerts_data.is_empty() {
                return Err(IncidentValidationError::MissingAlertsData);
            }
            if self.last_matching_time < self.from_at {
                return Err(IncidentValidationError::MatchBeforeStart {
                    from_at: self.from_at,
                    last_matching_time: self.last_matching_time,
                });
            }
        }

        if matches!(self.status, IncidentStatus::Finished | IncidentStatus::Closed) {
            match self.to_at {
                None => return Err(IncidentValidationError::MissingEndTime(self.status)),
                Some(to_at) if to_at < self.from_at => {
                    return Err(IncidentValidationError::EndBeforeStart {
                        from_at: self.from_at,
                        to_at,
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Returns the calendar quarter (1..=4) of the given instant.
fn quarter_of(at: DateTime<Utc>) -> i32 {
    (at.month() as i32 - 1) / 3 + 1
}
