//! Implementation of the `RulesRepository` trait for
//! `PostgresStateRepository`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use crate::{
    models::Rule,
    persistence::{
        error::PersistenceError,
        postgres::{PostgresStateRepository, operation_failed, push_filters, push_time_range},
        traits::{Filters, ListQuery, RulesRepository, TimeRange},
    },
};

const INSERT_RULE_QUERY: &str = "
    INSERT INTO a2i_rules (
        id, is_muted, description, alerts_summary_conditions,
        alerts_activity_interval_conditions, incident_life_time,
        incident_finishing_interval, set_incident_summary,
        set_incident_description, set_incident_department,
        set_incident_client_affect, set_incident_is_manageable,
        set_incident_sale_channels, set_incident_trouble_services,
        set_incident_failure_type, set_incident_labels,
        set_incident_is_downtime, created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
        $11, $12, $13, $14, $15, $16, $17, $18, $19
    )
";

const SELECT_RULE_COLUMNS: &str = "
    SELECT id, is_muted, description, alerts_summary_conditions,
        alerts_activity_interval_conditions, incident_life_time,
        incident_finishing_interval, set_incident_summary,
        set_incident_description, set_incident_department,
        set_incident_client_affect, set_incident_is_manageable,
        set_incident_sale_channels, set_incident_trouble_services,
        set_incident_failure_type, set_incident_labels,
        set_incident_is_downtime, created_at, updated_at
    FROM a2i_rules
";

const UPDATE_RULE_QUERY: &str = "
    UPDATE a2i_rules
    SET is_muted = $1, description = $2, alerts_summary_conditions = $3,
        alerts_activity_interval_conditions = $4, incident_life_time = $5,
        incident_finishing_interval = $6, set_incident_summary = $7,
        set_incident_description = $8, set_incident_department = $9,
        set_incident_client_affect = $10, set_incident_is_manageable = $11,
        set_incident_sale_channels = $12, set_incident_trouble_services = $13,
        set_incident_failure_type = $14, set_incident_labels = $15,
        set_incident_is_downtime = $16, updated_at = $17
    WHERE id = $18
";

const DELETE_RULE_QUERY: &str = "DELETE FROM a2i_rules WHERE id = $1";

// Helper struct for mapping from the database row
#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    is_muted: bool,
    description: String,
    alerts_summary_conditions: Vec<String>,
    alerts_activity_interval_conditions: Vec<i64>,
    incident_life_time: i64,
    incident_finishing_interval: i64,
    set_incident_summary: String,
    set_incident_description: String,
    set_incident_department: String,
    set_incident_client_affect: String,
    set_incident_is_manageable: String,
    set_incident_sale_channels: Vec<String>,
    set_incident_trouble_services: Vec<String>,
    set_incident_failure_type: String,
    set_incident_labels: Vec<String>,
    set_incident_is_downtime: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Converts a stored whole-seconds value back into a duration.
fn seconds_to_duration(secs: i64) -> Result<Duration, PersistenceError> {
    u64::try_from(secs).map(Duration::from_secs).map_err(|_| {
        PersistenceError::SerializationError(format!("negative duration in row: {secs}"))
    })
}

impl TryFrom<RuleRow> for Rule {
    type Error = PersistenceError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let decode =
            |e: crate::models::UnknownEnumValue| PersistenceError::SerializationError(e.to_string());

        Ok(Rule {
            id: row.id,
            is_muted: row.is_muted,
            description: row.description,
            alerts_summary_conditions: row.alerts_summary_conditions,
            alerts_activity_interval_conditions: row
                .alerts_activity_interval_conditions
                .into_iter()
                .map(seconds_to_duration)
                .collect::<Result<_, _>>()?,
            incident_life_time: seconds_to_duration(row.incident_life_time)?,
            incident_finishing_interval: seconds_to_duration(row.incident_finishing_interval)?,
            set_incident_summary: row.set_incident_summary,
            set_incident_description: row.set_incident_description,
            set_incident_department: row.set_incident_department.parse().map_err(decode)?,
            set_incident_client_affect: row.set_incident_client_affect,
            set_incident_is_manageable: row.set_incident_is_manageable.parse().map_err(decode)?,
            set_incident_sale_channels: row.set_incident_sale_channels,
            set_incident_trouble_services: row.set_incident_trouble_services,
            set_incident_failure_type: row.set_incident_failure_type.parse().map_err(decode)?,
            set_incident_labels: row.set_incident_labels,
            set_incident_is_downtime: row.set_incident_is_downtime,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl RulesRepository for PostgresStateRepository {
    #[tracing::instrument(skip(self, rule), fields(id = %rule.id), level = "debug")]
    async fn create_rule(&self, rule: &Rule) -> Result<(), PersistenceError> {
        rule.validate().map_err(|e| PersistenceError::InvalidInput(e.to_string()))?;

        tracing::debug!("Creating a new rule in the database.");

        let intervals: Vec<i64> = rule
            .alerts_activity_interval_conditions
            .iter()
            .map(|d| d.as_secs() as i64)
            .collect();

        sqlx::query(INSERT_RULE_QUERY)
            .bind(&rule.id)
            .bind(rule.is_muted)
            .bind(&rule.description)
            .bind(&rule.alerts_summary_conditions)
            .bind(&intervals)
            .bind(rule.incident_life_time.as_secs() as i64)
            .bind(rule.incident_finishing_interval.as_secs() as i64)
            .bind(&rule.set_incident_summary)
            .bind(&rule.set_incident_description)
            .bind(rule.set_incident_department.as_str())
            .bind(&rule.set_incident_client_affect)
            .bind(rule.set_incident_is_manageable.as_str())
            .bind(&rule.set_incident_sale_channels)
            .bind(&rule.set_incident_trouble_services)
            .bind(rule.set_incident_failure_type.as_str())
            .bind(&rule.set_incident_labels)
            .bind(rule.set_incident_is_downtime)
            .bind(rule.created_at)
            .bind(rule.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| operation_failed("create rule", e))?;

        tracing::debug!("The rule has been created in the database.");
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_rule(&self, id: &str) -> Result<Rule, PersistenceError> {
        tracing::debug!("Retrieving a rule from the database.");

        let mut builder = QueryBuilder::new(SELECT_RULE_COLUMNS);
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let row: Option<RuleRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| operation_failed("get rule", e))?;

        row.ok_or_else(|| PersistenceError::NotFound(id.to_string()))?.try_into()
    }

    #[tracing::instrument(skip(self, rule), fields(id = %rule.id), level = "debug")]
    async fn update_rule(&self, rule: &Rule) -> Result<(), PersistenceError> {
        rule.validate().map_err(|e| PersistenceError::InvalidInput(e.to_string()))?;

        tracing::debug!("Updating a rule in the database.");

        let intervals: Vec<i64> = rule
            .alerts_activity_interval_conditions
            .iter()
            .map(|d| d.as_secs() as i64)
            .collect();

        sqlx::query(UPDATE_RULE_QUERY)
            .bind(rule.is_muted)
            .bind(&rule.description)
            .bind(&rule.alerts_summary_conditions)
            .bind(&intervals)
            .bind(rule.incident_life_time.as_secs() as i64)
            .bind(rule.incident_finishing_interval.as_secs() as i64)
            .bind(&rule.set_incident_summary)
            .bind(&rule.set_incident_description)
            .bind(rule.set_incident_department.as_str())
            .bind(&rule.set_incident_client_affect)
            .bind(rule.set_incident_is_manageable.as_str())
            .bind(&rule.set_incident_sale_channels)
            .bind(&rule.set_incident_trouble_services)
            .bind(rule.set_incident_failure_type.as_str())
            .bind(&rule.set_incident_labels)
            .bind(rule.set_incident_is_downtime)
            .bind(rule.updated_at)
            .bind(&rule.id)
            .execute(&self.pool)
            .await
            .map_err(|e| operation_failed("update rule", e))?;

        tracing::debug!("The rule has been updated in the database.");
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn delete_rule(&self, id: &str) -> Result<(), PersistenceError> {
        tracing::debug!("Deleting a rule from the database.");

        sqlx::query(DELETE_RULE_QUERY)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| operation_failed("delete rule", e))?;

        tracing::debug!("The rule has been deleted from the database.");
        Ok(())
    }

    #[tracing::instrument(skip(self, query), level = "debug")]
    async fn list_rules(&self, query: &ListQuery) -> Result<Vec<Rule>, PersistenceError> {
        tracing::debug!(
            sort_by = %query.sort_by,
            sort_order = query.sort_order.as_str(),
            page_num = query.page_num,
            page_size = query.page_size,
            "Retrieving rules from the database."
        );

        let mut builder = QueryBuilder::new(SELECT_RULE_COLUMNS);
        builder.push(" WHERE 1 = 1");
        push_filters(&mut builder, &query.filters);
        push_time_range(&mut builder, query.time_range);
        builder.push(format!(" ORDER BY {} {}", query.sort_by, query.sort_order.as_str()));
        builder.push(" LIMIT ");
        builder.push_bind(query.page_size as i64);
        builder.push(" OFFSET ");
        builder.push_bind(query.page_num.saturating_sub(1) as i64 * query.page_size as i64);

        let rows: Vec<RuleRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| operation_failed("list rules", e))?;

        let rules =
            rows.into_iter().map(Rule::try_from).collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(rules_count = rules.len(), "Rules retrieved from the database.");
        Ok(rules)
    }

    #[tracing::instrument(skip(self, filters), level = "debug")]
    async fn count_rules(
        &self,
        filters: &Filters,
        time_range: Option<TimeRange>,
    ) -> Result<i64, PersistenceError> {
        tracing::debug!("Counting rules in the database.");

        let mut builder = QueryBuilder::new("SELECT COUNT(id) FROM a2i_rules WHERE 1 = 1");
        push_filters(&mut builder, filters);
        push_time_range(&mut builder, time_range);

        let total: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| operation_failed("count rules", e))?;

        tracing::debug!(total, "Rules counted in the database.");
        Ok(total)
    }
}
