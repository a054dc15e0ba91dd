//! Client-side sync engine (§4.5): batches outgoing pending changes, posts
//! a `SyncRequest`, applies the returned delta, updates the change tracker,
//! and surfaces conflicts — the client-side mirror of
//! `funkygibbon::sync_engine::ServerSyncEngine`.

use crate::config::ClientSyncConfig;
use crate::error::{ClientError, ClientResult};
use crate::state::SyncState;
use crate::tracker::{ChangeTracker, Operation, TrackerOutcome, TrackerRow};
use crate::transport::SyncTransport;
use inbetweenies::store::{CurrentState, VersionedStore};
use inbetweenies::{Change, ChangeType, InbetweeniesError, SyncRequest, SyncResponse, SyncType, PROTOCOL_VERSION};
use std::collections::HashSet;
use std::sync::Arc;

/// Marks versions the client pulled from the server rather than wrote
/// itself, so the store's per-device sequence counters stay meaningful
/// without the client needing its own `since()` bookkeeping.
const REMOTE_WRITER: &str = "remote";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub applied: usize,
    pub conflicts: usize,
}

pub struct ClientSyncEngine {
    store: Arc<dyn VersionedStore>,
    tracker: Arc<ChangeTracker>,
    state: Arc<SyncState>,
    transport: SyncTransport,
    config: ClientSyncConfig,
}

impl ClientSyncEngine {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        tracker: Arc<ChangeTracker>,
        state: Arc<SyncState>,
        transport: SyncTransport,
        config: ClientSyncConfig,
    ) -> Self {
        Self { store, tracker, state, transport, config }
    }

    /// Runs one or more push-pull cycles (§4.5) until every pending change
    /// has ridden in a request. On a transport failure the tracker is left
    /// untouched for that cycle (beyond bumping `retry_count`, §9) so the
    /// caller can retry later; the retry/backoff policy inside
    /// `post_with_retry` already exhausts the configured number of
    /// in-request attempts first, and a transport failure aborts the whole
    /// `sync()` call rather than continuing to the next chunk.
    pub async fn sync(&self) -> ClientResult<SyncOutcome> {
        let pending = self.tracker.get_pending().await?;
        let mut outcome = SyncOutcome::default();

        if pending.is_empty() {
            let response = self.run_round(&[]).await?;
            outcome.applied += response.sync_stats.applied;
            outcome.conflicts += response.conflicts.len();
            return Ok(outcome);
        }

        // §5 Backpressure: never push more than `max_batch_size` changes in
        // a single request. Each chunk rides its own full push-pull cycle,
        // so the vector clock (and thus what counts as "current") advances
        // between chunks exactly like it would between separate sync calls.
        for chunk in pending.chunks(self.config.max_batch_size.max(1)) {
            let response = self.run_round(chunk).await?;
            outcome.applied += response.sync_stats.applied;
            outcome.conflicts += response.conflicts.len();
        }
        Ok(outcome)
    }

    async fn run_round(&self, pending: &[TrackerRow]) -> ClientResult<SyncResponse> {
        let known_clock = self.state.vector_clock().await?;
        let device_id = self.state.device_id(&self.config.device_id).await?;
        let changes = self.build_changes(pending).await?;

        let sync_type = if known_clock.clocks.is_empty() { SyncType::Full } else { SyncType::Delta };
        let request = SyncRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            device_id,
            user_id: self.config.user_id.clone(),
            sync_type,
            vector_clock: known_clock,
            changes,
        };

        let response = match self.post_with_retry(&request).await {
            Ok(response) => response,
            Err(err) if err.is_transport() => {
                for row in pending {
                    self.tracker.record_transport_failure(&row.entity_id, self.config.retry_exhausted_after).await?;
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        self.apply_response(pending, &response).await?;
        self.state.set_vector_clock(&response.vector_clock).await?;
        self.state.set_last_sync(chrono::Utc::now()).await?;

        Ok(response)
    }

    async fn build_changes(&self, pending: &[TrackerRow]) -> ClientResult<Vec<Change>> {
        let mut changes = Vec::with_capacity(pending.len());
        for row in pending {
            let CurrentState::Single(version) = self.store.get_current(&row.entity_id).await? else {
                continue;
            };
            let Some(entity) = self.store.get_version(&row.entity_id, &version).await? else { continue };
            let relationships = self.store.get_relationships_for(&row.entity_id, &entity.version).await?;
            changes.push(Change {
                change_type: match row.operation {
                    Operation::Create => ChangeType::Create,
                    Operation::Update => ChangeType::Update,
                    Operation::Delete => ChangeType::Delete,
                },
                entity,
                relationships: if relationships.is_empty() { None } else { Some(relationships) },
            });
        }
        Ok(changes)
    }

    /// Exponential backoff with jitter over transport failures within a
    /// single request (§4.5, §9). Exhausting `max_retries` here just
    /// returns the transport error to `run_round`, which is what decides
    /// whether this cycle's failure crosses the cross-cycle
    /// `retry_exhausted_after` ceiling (§4.5 step 2: a transport failure
    /// alone must never force a row out of `pending`).
    async fn post_with_retry(&self, request: &SyncRequest) -> ClientResult<SyncResponse> {
        let mut backoff_ms = self.config.initial_backoff_ms;
        for attempt in 0..=self.config.max_retries {
            match self.transport.sync(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transport() && attempt < self.config.max_retries => {
                    tracing::warn!(attempt, %err, "sync transport failure, retrying");
                    let jitter = rand::random::<u64>() % (backoff_ms / 2 + 1);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms + jitter)).await;
                    backoff_ms = backoff_ms.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("loop always returns within max_retries + 1 iterations")
    }

    /// Applies `response.changes` to the local store, reconciles the
    /// tracker rows for whatever was pushed in `pending`, and writes every
    /// transition in one transaction (§4.5 "Cancellation").
    async fn apply_response(&self, pending: &[TrackerRow], response: &SyncResponse) -> ClientResult<()> {
        for change in &response.changes {
            match self.store.put_version(change.entity.clone(), REMOTE_WRITER).await {
                Ok(_) => {}
                // A merge version may reference a parent this replica hasn't
                // seen yet if it arrives out of order; the next sync (full or
                // delta) will pick it up once its ancestors have landed.
                Err(InbetweeniesError::ParentMissing(_)) => continue,
                Err(other) => return Err(ClientError::from(other)),
            }
            if let Some(relationships) = &change.relationships {
                for relationship in relationships {
                    self.store.put_relationship(relationship.clone()).await?;
                }
            }
        }

        let conflicted_ids: HashSet<&str> = response.conflicts.iter().map(|c| c.entity_id.as_str()).collect();
        let mut outcomes: Vec<(String, TrackerOutcome)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for change in &response.changes {
            if seen.contains(&change.entity.id) {
                continue;
            }
            if self.tracker.get(&change.entity.id).await?.is_none() {
                continue;
            }
            if let CurrentState::Conflicting(leaves) = self.store.get_current(&change.entity.id).await? {
                outcomes.push((
                    change.entity.id.clone(),
                    TrackerOutcome::Conflict(format!("server version diverges across leaves {leaves:?}")),
                ));
                seen.insert(change.entity.id.clone());
            }
        }

        for row in pending {
            if seen.contains(&row.entity_id) {
                continue;
            }
            seen.insert(row.entity_id.clone());
            if conflicted_ids.contains(row.entity_id.as_str()) {
                let reason = response
                    .conflicts
                    .iter()
                    .find(|c| c.entity_id == row.entity_id)
                    .map(|c| c.kind.clone())
                    .unwrap_or_else(|| "Conflict".to_string());
                outcomes.push((row.entity_id.clone(), TrackerOutcome::Conflict(reason)));
            } else if row.operation == Operation::Delete {
                outcomes.push((row.entity_id.clone(), TrackerOutcome::Remove));
            } else {
                outcomes.push((row.entity_id.clone(), TrackerOutcome::Synced));
            }
        }

        self.tracker.apply_outcomes(&outcomes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbetweenies::model::tests_support::make_version;
    use inbetweenies::{EntityType, SqliteVersionedStore};
    use sqlx::sqlite::SqlitePool;

    async fn engine_without_network() -> (ClientSyncEngine, Arc<dyn VersionedStore>, Arc<ChangeTracker>) {
        let store: Arc<dyn VersionedStore> = Arc::new(SqliteVersionedStore::connect_in_memory().await.unwrap());
        let tracker_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let tracker = Arc::new(ChangeTracker::new(tracker_pool));
        tracker.migrate().await.unwrap();
        let state_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let state = Arc::new(SyncState::new(state_pool));
        state.migrate().await.unwrap();
        let transport = SyncTransport::new("http://127.0.0.1:1", 1, None).unwrap();
        let engine = ClientSyncEngine::new(store.clone(), tracker.clone(), state, transport, ClientSyncConfig {
            max_retries: 0,
            initial_backoff_ms: 1,
            ..ClientSyncConfig::default()
        });
        (engine, store, tracker)
    }

    #[tokio::test]
    async fn build_changes_skips_rows_with_no_local_current_version() {
        let (engine, _store, tracker) = engine_without_network().await;
        tracker.record("ghost-1", EntityType::Device, Operation::Create).await.unwrap();
        let pending = tracker.get_pending().await.unwrap();
        let changes = engine.build_changes(&pending).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn build_changes_includes_pending_entity_current_version() {
        let (engine, store, tracker) = engine_without_network().await;
        let v = make_version("device-1", "v1-alice", vec![], "alice", serde_json::json!({}));
        store.put_version(v.clone(), "blowing-off-client").await.unwrap();
        tracker.record("device-1", EntityType::Device, Operation::Create).await.unwrap();

        let pending = tracker.get_pending().await.unwrap();
        let changes = engine.build_changes(&pending).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].entity, v);
        assert_eq!(changes[0].change_type, ChangeType::Create);
    }

    #[tokio::test]
    async fn transport_failure_leaves_tracker_untouched() {
        let (engine, store, tracker) = engine_without_network().await;
        let v = make_version("device-1", "v1-alice", vec![], "alice", serde_json::json!({}));
        store.put_version(v, "blowing-off-client").await.unwrap();
        tracker.record("device-1", EntityType::Device, Operation::Create).await.unwrap();

        let err = engine.sync().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(tracker.get("device-1").await.unwrap().unwrap().sync_status, crate::tracker::SyncStatus::Pending);
    }
}
