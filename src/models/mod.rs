//! This module contains the data models for the a2i application.

pub mod alert;
pub mod incident;
pub mod rule;

pub use alert::Alert;
pub use incident::{
    Department, FailureType, Incident, IncidentStatus, IncidentType, IncidentValidationError,
    Manageable, UnknownEnumValue,
};
pub use rule::{Rule, RuleValidationError};
