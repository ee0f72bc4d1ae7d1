//! This module contains the repository traits and query types for the
//! persistence layer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use super::error::PersistenceError;
use crate::models::{Incident, Rule};

/// A filter value matched against one column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Equality against a text column.
    Text(String),
    /// Equality against a boolean column.
    Flag(bool),
    /// Array containment: the column must contain every listed element.
    List(Vec<String>),
}

/// A set of column filters, keyed by column name.
///
/// Column names are interpolated into SQL verbatim; the external CRUD
/// surface allow-lists them before they reach the store.
pub type Filters = HashMap<String, FilterValue>;

/// Direction of a sorted read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// An inclusive `created_at` range restricting a read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    /// Start of the range.
    pub start: DateTime<Utc>,
    /// End of the range.
    pub end: DateTime<Utc>,
}

/// A filtered, sorted, paginated read.
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Column filters; empty means no filtering.
    pub filters: Filters,
    /// Column to sort by; assumed allow-list checked by the caller.
    pub sort_by: String,
    /// Sort direction.
    pub sort_order: SortOrder,
    /// 1-based page number.
    pub page_num: u32,
    /// Number of rows per page.
    pub page_size: u32,
    /// Optional `created_at` range.
    pub time_range: Option<TimeRange>,
}

impl ListQuery {
    /// Creates an unfiltered query over one page.
    pub fn page(sort_by: &str, sort_order: SortOrder, page_num: u32, page_size: u32) -> Self {
        Self {
            filters: Filters::new(),
            sort_by: sort_by.to_string(),
            sort_order,
            page_num,
            page_size,
            time_range: None,
        }
    }
}

/// Persistence operations for rules.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RulesRepository: Send + Sync {
    /// Persists a new rule. The rule is validated before the write.
    async fn create_rule(&self, rule: &Rule) -> Result<(), PersistenceError>;

    /// Retrieves a rule by id.
    async fn get_rule(&self, id: &str) -> Result<Rule, PersistenceError>;

    /// Updates an existing rule. The rule is validated before the write.
    async fn update_rule(&self, rule: &Rule) -> Result<(), PersistenceError>;

    /// Deletes a rule by id.
    async fn delete_rule(&self, id: &str) -> Result<(), PersistenceError>;

    /// Retrieves rules matching a filtered, sorted, paginated query.
    async fn list_rules(&self, query: &ListQuery) -> Result<Vec<Rule>, PersistenceError>;

    /// Counts rules matching the filters and optional time range.
    async fn count_rules(
        &self,
        filters: &Filters,
        time_range: Option<TimeRange>,
    ) -> Result<i64, PersistenceError>;
}

/// Persistence operations for incidents.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IncidentsRepository: Send + Sync {
    /// Persists a new incident. The incident is validated before the write.
    async fn create_incident(&self, incident: &Incident) -> Result<(), PersistenceError>;

    /// Retrieves an incident by id.
    async fn get_incident(&self, id: &str) -> Result<Incident, PersistenceError>;

    /// Updates an existing incident. The incident is validated before the
    /// write.
    async fn update_incident(&self, incident: &Incident) -> Result<(), PersistenceError>;

    /// Deletes an incident by id.
    async fn delete_incident(&self, id: &str) -> Result<(), PersistenceError>;

    /// Retrieves incidents matching a filtered, sorted, paginated query.
    async fn list_incidents(&self, query: &ListQuery) -> Result<Vec<Incident>, PersistenceError>;

    /// Counts incidents matching the filters and optional time range.
    async fn count_incidents(
        &self,
        filters: &Filters,
        time_range: Option<TimeRange>,
    ) -> Result<i64, PersistenceError>;
}
