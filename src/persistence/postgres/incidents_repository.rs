//! Implementation of the `IncidentsRepository` trait for
//! `PostgresStateRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use crate::{
    models::Incident,
    persistence::{
        error::PersistenceError,
        postgres::{PostgresStateRepository, operation_failed, push_filters, push_time_range},
        traits::{Filters, IncidentsRepository, ListQuery, TimeRange},
    },
};

const INSERT_INCIDENT_QUERY: &str = "
    INSERT INTO a2i_incidents (
        id, type, status, summary, description, from_at, to_at, is_confirmed,
        confirmation_time, quarter, department, client_affect, is_manageable,
        sale_channels, trouble_services, fin_losses, failure_type, is_deploy,
        deploy_link, labels, is_downtime, postmortem_link, creator, rule_id,
        matching_count, last_matching_time, alerts_data, created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
        $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
    )
";

const SELECT_INCIDENT_COLUMNS: &str = "
    SELECT id, type, status, summary, description, from_at, to_at, is_confirmed,
        confirmation_time, quarter, department, client_affect, is_manageable,
        sale_channels, trouble_services, fin_losses, failure_type, is_deploy,
        deploy_link, labels, is_downtime, postmortem_link, creator, rule_id,
        matching_count, last_matching_time, alerts_data, created_at, updated_at
    FROM a2i_incidents
";

const UPDATE_INCIDENT_QUERY: &str = "
    UPDATE a2i_incidents
    SET status = $1, summary = $2, description = $3, from_at = $4, to_at = $5,
        is_confirmed = $6, confirmation_time = $7, department = $8,
        client_affect = $9, is_manageable = $10, sale_channels = $11,
        trouble_services = $12, fin_losses = $13, failure_type = $14,
        is_deploy = $15, deploy_link = $16, labels = $17, is_downtime = $18,
        postmortem_link = $19, matching_count = $20, last_matching_time = $21,
        updated_at = $22
    WHERE id = $23
";

const DELETE_INCIDENT_QUERY: &str = "DELETE FROM a2i_incidents WHERE id = $1";

// Helper struct for mapping from the database row
#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: String,
    #[sqlx(rename = "type")]
    incident_type: String,
    status: String,
    summary: String,
    description: String,
    from_at: DateTime<Utc>,
    to_at: Option<DateTime<Utc>>,
    is_confirmed: bool,
    confirmation_time: Option<DateTime<Utc>>,
    quarter: i32,
    department: String,
    client_affect: String,
    is_manageable: String,
    sale_channels: Vec<String>,
    trouble_services: Vec<String>,
    fin_losses: i64,
    failure_type: String,
    is_deploy: bool,
    deploy_link: String,
    labels: Vec<String>,
    is_downtime: bool,
    postmortem_link: String,
    creator: String,
    rule_id: Option<String>,
    matching_count: i64,
    last_matching_time: DateTime<Utc>,
    alerts_data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IncidentRow> for Incident {
    type Error = PersistenceError;

    fn try_from(row: IncidentRow) -> Result<Self, Self::Error> {
        let decode =
            |e: crate::models::UnknownEnumValue| PersistenceError::SerializationError(e.to_string());

        Ok(Incident {
            id: row.id,
            incident_type: row.incident_type.parse().map_err(decode)?,
            status: row.status.parse().map_err(decode)?,
            summary: row.summary,
            description: row.description,
            from_at: row.from_at,
            to_at: row.to_at,
            is_confirmed: row.is_confirmed,
            confirmation_time: row.confirmation_time,
            quarter: row.quarter,
            department: row.department.parse().map_err(decode)?,
            client_affect: row.client_affect,
            is_manageable: row.is_manageable.parse().map_err(decode)?,
            sale_channels: row.sale_channels,
            trouble_services: row.trouble_services,
            fin_losses: row.fin_losses,
            failure_type: row.failure_type.parse().map_err(decode)?,
            is_deploy: row.is_deploy,
            deploy_link: row.deploy_link,
            labels: row.labels,
            is_downtime: row.is_downtime,
            postmortem_link: row.postmortem_link,
            creator: row.creator,
            rule_id: row.rule_id,
            matching_count: row.matching_count,
            last_matching_time: row.last_matching_time,
            alerts_data: row.alerts_data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl IncidentsRepository for PostgresStateRepository {
    #[tracing::instrument(skip(self, incident), fields(id = %incident.id), level = "debug")]
    async fn create_incident(&self, incident: &Incident) -> Result<(), PersistenceError> {
        incident.validate().map_err(|e| PersistenceError::InvalidInput(e.to_string()))?;

        tracing::debug!("Creating a new incident in the database.");

        sqlx::query(INSERT_INCIDENT_QUERY)
            .bind(&incident.id)
            .bind(incident.incident_type.as_str())
            .bind(incident.status.as_str())
            .bind(&incident.summary)
            .bind(&incident.description)
            .bind(incident.from_at)
            .bind(incident.to_at)
            .bind(incident.is_confirmed)
            .bind(incident.confirmation_time)
            .bind(incident.quarter)
            .bind(incident.department.as_str())
            .bind(&incident.client_affect)
            .bind(incident.is_manageable.as_str())
            .bind(&incident.sale_channels)
            .bind(&incident.trouble_services)
            .bind(incident.fin_losses)
            .bind(incident.failure_type.as_str())
            .bind(incident.is_deploy)
            .bind(&incident.deploy_link)
            .bind(&incident.labels)
            .bind(incident.is_downtime)
            .bind(&incident.postmortem_link)
            .bind(&incident.creator)
            .bind(&incident.rule_id)
            .bind(incident.matching_count)
            .bind(incident.last_matching_time)
            .bind(&incident.alerts_data)
            .bind(incident.created_at)
            .bind(incident.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| operation_failed("create incident", e))?;

        tracing::debug!("The incident has been created in the database.");
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_incident(&self, id: &str) -> Result<Incident, PersistenceError> {
        tracing::debug!("Retrieving an incident from the database.");

        let mut builder = QueryBuilder::new(SELECT_INCIDENT_COLUMNS);
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let row: Option<IncidentRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| operation_failed("get incident", e))?;

        row.ok_or_else(|| PersistenceError::NotFound(id.to_string()))?.try_into()
    }

    #[tracing::instrument(skip(self, incident), fields(id = %incident.id), level = "debug")]
    async fn update_incident(&self, incident: &Incident) -> Result<(), PersistenceError> {
        incident.validate().map_err(|e| PersistenceError::InvalidInput(e.to_string()))?;

        tracing::debug!("Updating an incident in the database.");

        sqlx::query(UPDATE_INCIDENT_QUERY)
            .bind(incident.status.as_str())
            .bind(&incident.summary)
            .bind(&incident.description)
            .bind(incident.from_at)
            .bind(incident.to_at)
            .bind(incident.is_confirmed)
            .bind(incident.confirmation_time)
            .bind(incident.department.as_str())
            .bind(&incident.client_affect)
            .bind(incident.is_manageable.as_str())
            .bind(&incident.sale_channels)
            .bind(&incident.trouble_services)
            .bind(incident.fin_losses)
            .bind(incident.failure_type.as_str())
            .bind(incident.is_deploy)
            .bind(&incident.deploy_link)
            .bind(&incident.labels)
            .bind(incident.is_downtime)
            .bind(&incident.postmortem_link)
            .bind(incident.matching_count)
            .bind(incident.last_matching_time)
            .bind(incident.updated_at)
            .bind(&incident.id)
            .execute(&self.pool)
            .await
            .map_err(|e| operation_failed("update incident", e))?;

        tracing::debug!("The incident has been updated in the database.");
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn delete_incident(&self, id: &str) -> Result<(), PersistenceError> {
        tracing::debug!("Deleting an incident from the database.");

        sqlx::query(DELETE_INCIDENT_QUERY)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| operation_failed("delete incident", e))?;

        tracing::debug!("The incident has been deleted from the database.");
        Ok(())
    }

    #[tracing::instrument(skip(self, query), level = "debug")]
    async fn list_incidents(&self, query: &ListQuery) -> Result<Vec<Incident>, PersistenceError> {
        tracing::debug!(
            sort_by = %query.sort_by,
            sort_order = query.sort_order.as_str(),
            page_num = query.page_num,
            page_size = query.page_size,
            "Retrieving incidents from the database."
        );

        let mut builder = QueryBuilder::new(SELECT_INCIDENT_COLUMNS);
        builder.push(" WHERE 1 = 1");
        push_filters(&mut builder, &query.filters);
        push_time_range(&mut builder, query.time_range);
        builder.push(format!(" ORDER BY {} {}", query.sort_by, query.sort_order.as_str()));
        builder.push(" LIMIT ");
        builder.push_bind(query.page_size as i64);
        builder.push(" OFFSET ");
        builder.push_bind(query.page_num.saturating_sub(1) as i64 * query.page_size as i64);

        let rows: Vec<IncidentRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| operation_failed("list incidents", e))?;

        let incidents =
            rows.into_iter().map(Incident::try_from).collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            incidents_count = incidents.len(),
            "Incidents retrieved from the database."
        );
        Ok(incidents)
    }

    #[tracing::instrument(skip(self, filters), level = "debug")]
    async fn count_incidents(
        &self,
        filters: &Filters,
        time_range: Option<TimeRange>,
    ) -> Result<i64, PersistenceError> {
        tracing::debug!("Counting incidents in the database.");

        let mut builder = QueryBuilder::new("SELECT COUNT(id) FROM a2i_incidents WHERE 1 = 1");
        push_filters(&mut builder, filters);
        push_time_range(&mut builder, time_range);

        let total: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| operation_failed("count incidents", e))?;

        tracing::debug!(total, "Incidents counted in the database.");
        Ok(total)
    }
}
