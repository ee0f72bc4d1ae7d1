//! The incident state manager.
//!
//! One logical task owns the sequence dequeue batch → iterate rules →
//! mutate and persist incidents. Each rule has at most one "latest" incident
//! and rules are processed sequentially within a batch, so incidents cloned
//! out of the cache can be mutated and re-persisted without further locking.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::Cache,
    matcher::find_matching_alerts,
    models::{Alert, Incident, IncidentStatus, Rule},
    persistence::traits::{
        Filters, IncidentsRepository, ListQuery, RulesRepository, SortOrder,
    },
};

/// Page size used when iterating rules, both at warm-up and per batch.
const RULES_PAGE_SIZE: u32 = 100;

/// Returns how many pages of `page_size` are needed to cover `total` items.
fn pages_for(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size)
}

/// Drives the incident lifecycle for every non-muted rule.
///
/// The manager keeps a cached, notification-driven view of rules and
/// incidents and writes every state transition through the store. Store
/// failures are logged and skipped; the next alert batch re-evaluates the
/// same decision, which is idempotent thanks to `last_matching_time`
/// monotonicity.
pub struct IncidentManager {
    rules_repo: Arc<dyn RulesRepository>,
    incidents_repo: Arc<dyn IncidentsRepository>,
    rules_cache: Arc<Cache<Rule>>,
    incidents_cache: Arc<Cache<Incident>>,
}

impl IncidentManager {
    /// Creates a new manager over the given repositories and caches.
    pub fn new(
        rules_repo: Arc<dyn RulesRepository>,
        incidents_repo: Arc<dyn IncidentsRepository>,
        rules_cache: Arc<Cache<Rule>>,
        incidents_cache: Arc<Cache<Incident>>,
    ) -> Self {
        Self { rules_repo, incidents_repo, rules_cache, incidents_cache }
    }

    /// Populates both caches from the store.
    ///
    /// Rules are paged in completely; incidents only up to the cache
    /// capacity, most recent first. Store errors are logged and leave the
    /// affected cache partially filled; change notifications repair it over
    /// time.
    pub async fn initialize_caches(&self) {
        match self.rules_repo.count_rules(&Filters::new(), None).await {
            Ok(total) if total > 0 => {
                let pages = pages_for(total as usize, RULES_PAGE_SIZE as usize);
                for page in 1..=pages {
                    let query = ListQuery::page(
                        "created_at",
                        SortOrder::Desc,
                        page as u32,
                        RULES_PAGE_SIZE,
                    );
                    match self.rules_repo.list_rules(&query).await {
                        Ok(rules) => {
                            for rule in rules {
                                let id = rule.id.clone();
                                self.rules_cache.set(&id, rule);
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, page, "Failed to load rules into the cache.");
                            break;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to count rules for cache initialization.");
            }
        }

        let capacity = self.incidents_cache.capacity().max(1) as u32;
        let query = ListQuery::page("created_at", SortOrder::Desc, 1, capacity);
        match self.incidents_repo.list_incidents(&query).await {
            Ok(incidents) => {
                // Insert oldest first so the most recent incidents end up at
                // the recent end of the LRU.
                for incident in incidents.into_iter().rev() {
                    let id = incident.id.clone();
                    self.incidents_cache.set(&id, incident);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load incidents into the cache.");
            }
        }

        tracing::info!(
            rules = self.rules_cache.len(),
            incidents = self.incidents_cache.len(),
            "Caches initialized from the store."
        );
    }

    /// Consumes alert batches until the token is cancelled.
    pub async fn run(&self, token: CancellationToken, mut alerts_rx: mpsc::Receiver<Vec<Alert>>) {
        tracing::debug!("Starting the incident processing loop.");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Stopping the incident processing loop.");
                    return;
                }
                Some(alerts) = alerts_rx.recv() => self.process_alerts(&alerts).await,
            }
        }
    }

    /// Evaluates every non-muted cached rule against one alert batch.
    pub async fn process_alerts(&self, alerts: &[Alert]) {
        let total_rules = self.rules_cache.len();
        let pages = pages_for(total_rules, RULES_PAGE_SIZE as usize);

        for page in 1..=pages {
            for entry in self.rules_cache.page(page, RULES_PAGE_SIZE as usize) {
                if entry.value.is_muted {
                    continue;
                }
                self.process_rule(alerts, &entry.value).await;
            }
        }
    }

    /// Applies the incident state machine for one rule.
    async fn process_rule(&self, alerts: &[Alert], rule: &Rule) {
        let now = Utc::now();

        let matching_alerts = match find_matching_alerts(alerts, rule, now) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, rule_id = %rule.id, "Failed to find matching alerts.");
                return;
            }
        };

        let latest = self.latest_cached_incident(&rule.id);

        match matching_alerts {
            Some(matched) => match latest {
                Some(mut incident)
                    if incident.status != IncidentStatus::Closed
                        && age_at_most(incident.created_at, now, rule.incident_life_time) =>
                {
                    self.update_incident(&mut incident, rule).await;
                }
                Some(incident) => {
                    // The prior incident aged out (or is closed). An actual
                    // one is finished first; either way a fresh incident
                    // captures the new match.
                    if incident.status == IncidentStatus::Actual {
                        let mut incident = incident;
                        self.finish_incident(&mut incident, rule).await;
                    }
                    self.create_incident(matched, rule).await;
                }
                None => self.create_incident(matched, rule).await,
            },
            None => {
                if let Some(mut incident) = latest {
                    if incident.status == IncidentStatus::Actual
                        && age_at_least(
                            incident.last_matching_time,
                            now,
                            rule.incident_finishing_interval,
                        )
                    {
                        self.finish_incident(&mut incident, rule).await;
                    }
                }
            }
        }
    }

    /// Records another match on an existing incident, reopening it when it
    /// had been finished.
    async fn update_incident(&self, incident: &mut Incident, rule: &Rule) {
        tracing::info!(
            id = %incident.id,
            rule_id = %rule.id,
            "The incident already exists; updating it with the new match."
        );

        let now = Utc::now();
        incident.matching_count += 1;
        incident.last_matching_time = now;
        incident.updated_at = now;

        if incident.status == IncidentStatus::Finished {
            tracing::info!(
                id = %incident.id,
                rule_id = %rule.id,
                "Incident is being reopened due to new matching alerts."
            );
            incident.status = IncidentStatus::Actual;
            incident.to_at = None;
        }

        if let Err(e) = self.incidents_repo.update_incident(incident).await {
            tracing::error!(error = %e, id = %incident.id, "Failed to update incident in the database.");
        }
    }

    /// Marks an incident finished as of now.
    async fn finish_incident(&self, incident: &mut Incident, rule: &Rule) {
        tracing::info!(
            id = %incident.id,
            rule_id = %rule.id,
            "Incident is being finished due to quiescence or expiration of its lifetime."
        );

        let now = Utc::now();
        incident.status = IncidentStatus::Finished;
        incident.to_at = Some(now);
        incident.updated_at = now;

        if let Err(e) = self.incidents_repo.update_incident(incident).await {
            tracing::error!(error = %e, id = %incident.id, "Failed to update incident in the database.");
        }
    }

    /// Creates a fresh actual incident from the matched alerts.
    async fn create_incident(&self, matching_alerts: Vec<Alert>, rule: &Rule) {
        let alerts_data = match serde_json::to_string(&matching_alerts) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, rule_id = %rule.id, "Failed to serialize alerts for a new incident.");
                return;
            }
        };

        let incident = Incident::from_rule(rule, alerts_data, Utc::now());

        if let Err(e) = incident.validate() {
            tracing::error!(error = %e, rule_id = %rule.id, "Failed to validate the new incident.");
            return;
        }

        if let Err(e) = self.incidents_repo.create_incident(&incident).await {
            tracing::error!(error = %e, id = %incident.id, "Failed to create a new incident in the database.");
            return;
        }

        tracing::info!(id = %incident.id, rule_id = %rule.id, "A new incident has been detected.");
    }

    /// Returns the first cached incident belonging to the rule, scanning in
    /// recency order. The cache holds the recent working set; an incident
    /// that was evicted simply leads to a fresh one being created.
    fn latest_cached_incident(&self, rule_id: &str) -> Option<Incident> {
        self.incidents_cache
            .all()
            .into_iter()
            .find(|entry| entry.value.rule_id.as_deref() == Some(rule_id))
            .map(|entry| entry.value)
    }
}

/// Whether `since` happened within `limit` of `now`.
fn age_at_most(
    since: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
    limit: std::time::Duration,
) -> bool {
    match now.signed_duration_since(since).to_std() {
        Ok(age) => age <= limit,
        // A timestamp from the future has no age yet.
        Err(_) => true,
    }
}

/// Whether at least `threshold` has passed since `since`.
fn age_at_least(
    since: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
    threshold: std::time::Duration,
) -> bool {
    match now.signed_duration_since(since).to_std() {
        Ok(age) => age >= threshold,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        models::{Department, FailureType, IncidentType, Manageable},
        persistence::traits::{MockIncidentsRepository, MockRulesRepository},
    };

    fn test_rule(id: &str) -> Rule {
        let now = Utc::now();
        Rule {
            id: id.to_string(),
            is_muted: false,
            description: String::new(),
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
            set_incident_labels: vec![],
            set_incident_is_downtime: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn incident_for(rule: &Rule, created_at: DateTime<Utc>) -> Incident {
        let mut incident = Incident::from_rule(rule, "[]".to_string(), created_at);
        incident.id = format!("incident-for-{}", rule.id);
        incident
    }

    fn matching_batch() -> Vec<Alert> {
        vec![Alert::new("disk full on host-a", Utc::now())]
    }

    struct Harness {
        rules_cache: Arc<Cache<Rule>>,
        incidents_cache: Arc<Cache<Incident>>,
        rules_repo: MockRulesRepository,
        incidents_repo: MockIncidentsRepository,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                rules_cache: Arc::new(Cache::new(100, "rules")),
                incidents_cache: Arc::new(Cache::new(100, "incidents")),
                rules_repo: MockRulesRepository::new(),
                incidents_repo: MockIncidentsRepository::new(),
            }
        }

        fn build(self) -> IncidentManager {
            IncidentManager::new(
                Arc::new(self.rules_repo),
                Arc::new(self.incidents_repo),
                self.rules_cache,
                self.incidents_cache,
            )
        }
    }

    #[tokio::test]
    async fn test_match_without_prior_incident_creates_one() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        harness
            .incidents_repo
            .expect_create_incident()
            .withf(|incident| {
                incident.incident_type == IncidentType::Auto
                    && incident.status == IncidentStatus::Actual
                    && incident.matching_count == 1
                    && incident.rule_id.as_deref() == Some("rule-1")
                    && incident.from_at == incident.last_matching_time
                    && incident.validate().is_ok()
            })
            .times(1)
            .returning(|_| Ok(()));

        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_match_within_lifetime_updates_incident() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let prior = incident_for(&rule, Utc::now() - chrono::Duration::minutes(10));
        harness.incidents_cache.set(&prior.id.clone(), prior);

        harness
            .incidents_repo
            .expect_update_incident()
            .withf(|incident| {
                incident.matching_count == 2
                    && incident.status == IncidentStatus::Actual
                    && incident.to_at.is_none()
            })
            .times(1)
            .returning(|_| Ok(()));

        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_match_reopens_finished_incident_within_lifetime() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let mut prior = incident_for(&rule, Utc::now() - chrono::Duration::minutes(10));
        prior.status = IncidentStatus::Finished;
        prior.to_at = Some(Utc::now() - chrono::Duration::minutes(2));
        harness.incidents_cache.set(&prior.id.clone(), prior);

        harness
            .incidents_repo
            .expect_update_incident()
            .withf(|incident| {
                incident.status == IncidentStatus::Actual
                    && incident.to_at.is_none()
                    && incident.matching_count == 2
            })
            .times(1)
            .returning(|_| Ok(()));

        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_match_past_lifetime_finishes_and_recreates() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let prior = incident_for(&rule, Utc::now() - chrono::Duration::hours(2));
        let prior_id = prior.id.clone();
        harness.incidents_cache.set(&prior.id.clone(), prior);

        harness
            .incidents_repo
            .expect_update_incident()
            .withf(move |incident| {
                incident.id == prior_id
                    && incident.status == IncidentStatus::Finished
                    && incident.to_at.is_some()
            })
            .times(1)
            .returning(|_| Ok(()));
        harness
            .incidents_repo
            .expect_create_incident()
            .withf(|incident| incident.matching_count == 1)
            .times(1)
            .returning(|_| Ok(()));

        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_match_past_lifetime_on_finished_incident_only_creates() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let mut prior = incident_for(&rule, Utc::now() - chrono::Duration::hours(2));
        prior.status = IncidentStatus::Finished;
        prior.to_at = Some(Utc::now() - chrono::Duration::hours(1));
        harness.incidents_cache.set(&prior.id.clone(), prior);

        // No update expected; the aged-out incident is already finished.
        harness
            .incidents_repo
            .expect_create_incident()
            .times(1)
            .returning(|_| Ok(()));

        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_match_on_closed_incident_creates_fresh_one() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let mut prior = incident_for(&rule, Utc::now() - chrono::Duration::minutes(5));
        prior.status = IncidentStatus::Closed;
        prior.to_at = Some(Utc::now() - chrono::Duration::minutes(1));
        harness.incidents_cache.set(&prior.id.clone(), prior);

        harness
            .incidents_repo
            .expect_create_incident()
            .withf(|incident| incident.status == IncidentStatus::Actual)
            .times(1)
            .returning(|_| Ok(()));

        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_quiescent_incident_is_finished() {
        let mut harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let mut prior = incident_for(&rule, Utc::now() - chrono::Duration::minutes(10));
        prior.last_matching_time = Utc::now() - chrono::Duration::minutes(6);
        harness.incidents_cache.set(&prior.id.clone(), prior);

        harness
            .incidents_repo
            .expect_update_incident()
            .withf(|incident| {
                incident.status == IncidentStatus::Finished && incident.to_at.is_some()
            })
            .times(1)
            .returning(|_| Ok(()));

        // Empty batch: no match for the rule.
        harness.build().process_alerts(&[]).await;
    }

    #[tokio::test]
    async fn test_recent_incident_is_left_alone_without_match() {
        let harness = Harness::new();
        let rule = test_rule("rule-1");
        harness.rules_cache.set(&rule.id, rule.clone());

        let prior = incident_for(&rule, Utc::now() - chrono::Duration::minutes(2));
        harness.incidents_cache.set(&prior.id.clone(), prior);

        // No repository expectations: any call would panic.
        harness.build().process_alerts(&[]).await;
    }

    #[tokio::test]
    async fn test_muted_rule_is_skipped() {
        let harness = Harness::new();
        let mut rule = test_rule("rule-1");
        rule.is_muted = true;
        harness.rules_cache.set(&rule.id.clone(), rule);

        // No repository expectations: a muted rule must not be evaluated.
        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_the_batch() {
        let mut harness = Harness::new();
        let failing = test_rule("rule-1");
        let healthy = test_rule("rule-2");
        harness.rules_cache.set(&healthy.id, healthy.clone());
        harness.rules_cache.set(&failing.id, failing.clone());

        harness
            .incidents_repo
            .expect_create_incident()
            .times(2)
            .returning(|incident| {
                if incident.rule_id.as_deref() == Some("rule-1") {
                    Err(crate::persistence::error::PersistenceError::OperationFailed(
                        "connection reset".to_string(),
                    ))
                } else {
                    Ok(())
                }
            });

        // Both rules are evaluated even though the first write fails.
        harness.build().process_alerts(&matching_batch()).await;
    }

    #[tokio::test]
    async fn test_initialize_caches_pages_rules_and_loads_recent_incidents() {
        let mut harness = Harness::new();

        harness.rules_repo.expect_count_rules().times(1).returning(|_, _| Ok(2));
        harness
            .rules_repo
            .expect_list_rules()
            .withf(|query| {
                query.page_num == 1
                    && query.page_size == 100
                    && query.sort_by == "created_at"
                    && query.sort_order == SortOrder::Desc
            })
            .times(1)
            .returning(|_| Ok(vec![test_rule("rule-1"), test_rule("rule-2")]));

        let rule = test_rule("rule-1");
        let newest = incident_for(&rule, Utc::now());
        let mut older = incident_for(&rule, Utc::now() - chrono::Duration::hours(1));
        older.id = "older".to_string();
        let newest_id = newest.id.clone();
        harness
            .incidents_repo
            .expect_list_incidents()
            .withf(|query| query.page_num == 1 && query.page_size == 100)
            .times(1)
            .returning(move |_| Ok(vec![newest.clone(), older.clone()]));

        let rules_cache = Arc::clone(&harness.rules_cache);
        let incidents_cache = Arc::clone(&harness.incidents_cache);
        harness.build().initialize_caches().await;

        assert_eq!(rules_cache.len(), 2);
        assert_eq!(incidents_cache.len(), 2);
        // The most recent incident sits at the recent end of the LRU.
        assert_eq!(incidents_cache.all()[0].key, newest_id);
    }

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(0, 100), 0);
        assert_eq!(pages_for(1, 100), 1);
        assert_eq!(pages_for(100, 100), 1);
        assert_eq!(pages_for(101, 100), 2);
    }

    #[test]
    fn test_age_helpers_handle_future_timestamps() {
        let now = Utc::now();
        let future = now + chrono::Duration::minutes(5);

        assert!(age_at_most(future, now, Duration::from_secs(0)));
        assert!(!age_at_least(future, now, Duration::from_secs(0)));
    }
}
