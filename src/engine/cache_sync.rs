//! Notification-driven cache refresh.
//!
//! Each watched store channel gets its own long-running listener task:
//! INSERT and UPDATE events re-fetch the row and overwrite the cache entry,
//! DELETE events drop it. Handlers are idempotent, so replays and missed
//! events across reconnects are harmless; startup repopulation covers the
//! gaps.

use std::{future::Future, sync::Arc};

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::Cache,
    models::{Incident, Rule},
    persistence::{
        error::PersistenceError,
        listener::{ChangeAction, ChangeEvent, ListenChannel, listen_for_changes},
        traits::{IncidentsRepository, RulesRepository},
    },
};

/// Applies one change event to a cache, re-fetching the row through `fetch`
/// for inserts and updates.
async fn apply_change_event<T, F, Fut>(cache: &Cache<T>, event: ChangeEvent, fetch: F)
where
    T: Clone,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, PersistenceError>>,
{
    match event.action {
        ChangeAction::Insert | ChangeAction::Update => match fetch(event.id.clone()).await {
            Ok(item) => cache.set(&event.id, item),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    id = %event.id,
                    "Failed to fetch changed item; cache entry left as-is."
                );
            }
        },
        ChangeAction::Delete => cache.delete(&event.id),
    }
}

/// Keeps the rules cache in sync with the store until the token is
/// cancelled.
pub async fn run_rules_cache_sync(
    token: CancellationToken,
    pool: PgPool,
    cache: Arc<Cache<Rule>>,
    repo: Arc<dyn RulesRepository>,
) {
    listen_for_changes(token, pool, ListenChannel::Rules, move |event| {
        let cache = Arc::clone(&cache);
        let repo = Arc::clone(&repo);
        async move {
            apply_change_event(&cache, event, |id| async move { repo.get_rule(&id).await }).await;
        }
    })
    .await;
}

/// Keeps the incidents cache in sync with the store until the token is
/// cancelled.
pub async fn run_incidents_cache_sync(
    token: CancellationToken,
    pool: PgPool,
    cache: Arc<Cache<Incident>>,
    repo: Arc<dyn IncidentsRepository>,
) {
    listen_for_changes(token, pool, ListenChannel::Incidents, move |event| {
        let cache = Arc::clone(&cache);
        let repo = Arc::clone(&repo);
        async move {
            apply_change_event(&cache, event, |id| async move { repo.get_incident(&id).await })
                .await;
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_event_fetches_and_caches_the_item() {
        let cache: Cache<String> = Cache::new(10, "test");
        let event = ChangeEvent { action: ChangeAction::Insert, id: "a".to_string() };

        apply_change_event(&cache, event, |id| async move { Ok(format!("value-{id}")) }).await;

        assert_eq!(cache.get("a"), Some("value-a".to_string()));
    }

    #[tokio::test]
    async fn test_update_event_overwrites_the_cached_item() {
        let cache: Cache<String> = Cache::new(10, "test");
        cache.set("a", "stale".to_string());
        let event = ChangeEvent { action: ChangeAction::Update, id: "a".to_string() };

        apply_change_event(&cache, event, |_| async move { Ok("fresh".to_string()) }).await;

        assert_eq!(cache.get("a"), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_delete_event_drops_the_cached_item() {
        let cache: Cache<String> = Cache::new(10, "test");
        cache.set("a", "value".to_string());
        let event = ChangeEvent { action: ChangeAction::Delete, id: "a".to_string() };

        apply_change_event(&cache, event, |_| async move {
            unreachable!("deletes must not fetch")
        })
        .await;

        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache_unchanged() {
        let cache: Cache<String> = Cache::new(10, "test");
        cache.set("a", "stale".to_string());
        let event = ChangeEvent { action: ChangeAction::Update, id: "a".to_string() };

        apply_change_event(&cache, event, |id| async move {
            Err(PersistenceError::NotFound(id))
        })
        .await;

        assert_eq!(cache.get("a"), Some("stale".to_string()));
    }
}
