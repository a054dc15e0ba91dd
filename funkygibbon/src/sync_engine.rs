//! Server-side sync engine (§4.4): validates a `SyncRequest`, replays its
//! changes against the versioned store, resolves any conflicts that
//! appear, and computes the response delta.

use crate::config::SyncConfig;
use crate::error::{AppError, AppResult};
use inbetweenies::conflict::{self, ConflictReport};
use inbetweenies::store::{CurrentState, PutOutcome, VersionedStore};
use inbetweenies::{
    Change, ChangeType, EntityVersion, InbetweeniesError, SourceType, SyncRequest, SyncResponse,
    SyncStats, SyncType, PROTOCOL_VERSION,
};
use std::sync::Arc;

pub struct ServerSyncEngine {
    store: Arc<dyn VersionedStore>,
    config: SyncConfig,
    device_id: String,
}

impl ServerSyncEngine {
    pub fn new(store: Arc<dyn VersionedStore>, config: SyncConfig, device_id: String) -> Self {
        Self { store, config, device_id }
    }

    /// Runs the full algorithm of §4.4 and returns the response to hand back
    /// to the client. Protocol-level failures (bad version, oversized
    /// batch) return `Err` and apply nothing; per-entity failures are
    /// folded into `conflicts` while the rest of the batch still applies.
    pub async fn handle_sync(&self, request: SyncRequest) -> AppResult<SyncResponse> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(AppError::UnsupportedProtocol(request.protocol_version));
        }
        if request.changes.len() > self.config.max_batch_size {
            return Err(AppError::BatchTooLarge {
                received: request.changes.len(),
                max: self.config.max_batch_size,
            });
        }

        let mut stats = SyncStats {
            received: request.changes.len(),
            ..Default::default()
        };
        let mut conflicts: Vec<ConflictReport> = Vec::new();
        let mut merge_changes: Vec<Change> = Vec::new();

        for change in &request.changes {
            match self.apply_change(change, &request.device_id).await {
                Ok(Some(report)) => {
                    stats.applied += 1;
                    if report.resolution.is_some() {
                        stats.conflicts += 1;
                    }
                    if let Some(resolution) = &report.resolution {
                        merge_changes.push(Change {
                            change_type: ChangeType::Update,
                            entity: resolution.merge_version.clone(),
                            relationships: None,
                        });
                    }
                    conflicts.push(report);
                }
                Ok(None) => stats.applied += 1,
                Err(reason) => {
                    stats.rejected += 1;
                    conflicts.push(ConflictReport {
                        entity_id: change.entity.id.clone(),
                        local_version: change.entity.version.clone(),
                        remote_version: String::new(),
                        kind: reason.kind().to_string(),
                        resolution: None,
                    });
                    tracing::warn!(entity_id = %change.entity.id, %reason, "rejected change");
                }
            }
        }

        for merge in &merge_changes {
            self.store.put_version(merge.entity.clone(), &self.device_id).await.map_err(AppError::from)?;
        }

        let mut response_changes = match request.sync_type {
            SyncType::Full => self.full_delta().await?,
            SyncType::Delta => self.delta_since(&request.vector_clock).await?,
        };
        response_changes.extend(merge_changes);

        // Bump our own counter for every processed request, not just ones
        // that wrote a merge version (§3.4: "the responder's own counter
        // bumped by one"). This shares the same persisted counter
        // `put_version` assigns `device_seq` from, so a merge version
        // written under `self.device_id` always gets a `device_seq`
        // consistent with whatever value a prior response already handed
        // a client — no drift between an advertised clock and what
        // `since()` can actually find.
        self.store.advance_device_clock(&self.device_id).await.map_err(AppError::from)?;
        let server_clock = self.store.device_clock().await.map_err(AppError::from)?;
        let response_clock = server_clock.merge(&request.vector_clock);

        Ok(SyncResponse {
            protocol_version: PROTOCOL_VERSION.to_string(),
            vector_clock: response_clock,
            changes: response_changes,
            conflicts,
            sync_stats: stats,
            sync_type: request.sync_type,
        })
    }

    /// Applies one incoming change. Returns `Ok(Some(report))` when the
    /// insertion revealed a conflict needing resolution, `Ok(None)` for a
    /// clean apply, and `Err` for a per-entity rejection that should be
    /// folded into `conflicts` without aborting the rest of the batch.
    async fn apply_change(&self, change: &Change, device_id: &str) -> Result<Option<ConflictReport>, InbetweeniesError> {
        if let Some(ts) = EntityVersion::version_timestamp(&change.entity.version) {
            let skew = chrono::Utc::now().signed_duration_since(ts);
            if skew.num_seconds() < -self.config.max_clock_skew_secs {
                return Err(InbetweeniesError::FutureTimestamp(change.entity.version.clone()));
            }
        }

        let entity = if change.change_type == ChangeType::Delete {
            tombstone(&change.entity)
        } else {
            change.entity.clone()
        };

        match self.store.put_version(entity.clone(), device_id).await {
            Ok(PutOutcome::Inserted) | Ok(PutOutcome::AlreadyApplied) => {}
            Err(e) => return Err(e),
        }

        if let Some(relationships) = &change.relationships {
            for relationship in relationships {
                self.store.put_relationship(relationship.clone()).await?;
            }
        }

        match self.store.get_current(&entity.id).await? {
            CurrentState::Conflicting(leaves) if leaves.len() >= 2 => {
                let mut versions = Vec::with_capacity(leaves.len());
                for leaf in &leaves {
                    if let Some(v) = self.store.get_version(&entity.id, leaf).await? {
                        versions.push(v);
                    }
                }
                versions.sort_by(|a, b| a.version.cmp(&b.version));
                let (a, b) = (&versions[0], &versions[1]);
                Ok(Some(conflict::resolve(self.config.conflict_policy, a, b)))
            }
            _ => Ok(None),
        }
    }

    async fn full_delta(&self) -> AppResult<Vec<Change>> {
        let current = self.store.list_current(None).await.map_err(AppError::from)?;
        let mut changes = Vec::with_capacity(current.len());
        for entity in current {
            let relationships = self
                .store
                .get_relationships_for(&entity.id, &entity.version)
                .await
                .map_err(AppError::from)?;
            changes.push(Change {
                change_type: ChangeType::Update,
                entity,
                relationships: if relationships.is_empty() { None } else { Some(relationships) },
            });
        }
        Ok(changes)
    }

    async fn delta_since(&self, known: &inbetweenies::VectorClock) -> AppResult<Vec<Change>> {
        let versions = self.store.since(known).await.map_err(AppError::from)?;
        let mut changes = Vec::with_capacity(versions.len());
        for entity in versions {
            let relationships = self
                .store
                .get_relationships_for(&entity.id, &entity.version)
                .await
                .map_err(AppError::from)?;
            changes.push(Change {
                change_type: ChangeType::Update,
                entity,
                relationships: if relationships.is_empty() { None } else { Some(relationships) },
            });
        }
        Ok(changes)
    }
}

/// Builds a tombstone version for a `delete` change (§9): a new version
/// with `content.deleted = true` rather than removing any row.
fn tombstone(entity: &EntityVersion) -> EntityVersion {
    let mut content = entity.content.clone();
    if let Some(obj) = content.as_object_mut() {
        obj.insert("deleted".to_string(), serde_json::Value::Bool(true));
    } else {
        content = serde_json::json!({"deleted": true});
    }
    EntityVersion {
        content,
        source_type: SourceType::Generated,
        ..entity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbetweenies::model::tests_support::make_version;
    use inbetweenies::{SqliteVersionedStore, VectorClock};

    async fn engine() -> ServerSyncEngine {
        let store = Arc::new(SqliteVersionedStore::connect_in_memory().await.unwrap());
        ServerSyncEngine::new(store, SyncConfig::default(), "funkygibbon-server".into())
    }

    fn request(sync_type: SyncType, changes: Vec<Change>) -> SyncRequest {
        SyncRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            device_id: "device-1".into(),
            user_id: "alice".into(),
            sync_type,
            vector_clock: VectorClock::new(),
            changes,
        }
    }

    #[tokio::test]
    async fn rejects_unsupported_protocol() {
        let engine = engine().await;
        let mut req = request(SyncType::Full, vec![]);
        req.protocol_version = "v1".into();
        let err = engine.handle_sync(req).await.unwrap_err();
        matches!(err, AppError::UnsupportedProtocol(_));
    }

    #[tokio::test]
    async fn fresh_client_full_sync_returns_current_versions() {
        let engine = engine().await;
        let home = make_version("home-1", "v1-alice", vec![], "alice", serde_json::json!({"name": "My Home"}));
        engine
            .store
            .put_version(home.clone(), "funkygibbon-server")
            .await
            .unwrap();

        let response = engine.handle_sync(request(SyncType::Full, vec![])).await.unwrap();
        assert_eq!(response.changes.len(), 1);
        assert_eq!(response.changes[0].entity, home);
    }

    #[tokio::test]
    async fn simple_delta_create_is_applied() {
        let engine = engine().await;
        let device = make_version(
            "device-001",
            "2025-01-01T00:00:00.000Z-alice",
            vec![],
            "alice",
            serde_json::json!({}),
        );
        let change = Change { change_type: ChangeType::Create, entity: device, relationships: None };
        let response = engine.handle_sync(request(SyncType::Delta, vec![change])).await.unwrap();
        assert_eq!(response.sync_stats.applied, 1);
        assert_eq!(response.sync_stats.conflicts, 0);
    }

    #[tokio::test]
    async fn concurrent_updates_produce_last_write_wins_merge() {
        let engine = engine().await;
        let root = make_version("device-001", "v0", vec![], "alice", serde_json::json!({}));
        engine.store.put_version(root, "funkygibbon-server").await.unwrap();

        let a = make_version(
            "device-001",
            "2025-01-01T00:00:01.000Z-alice",
            vec!["v0".into()],
            "alice",
            serde_json::json!({"state": "on"}),
        );
        let b = make_version(
            "device-001",
            "2025-01-01T00:00:02.000Z-bob",
            vec!["v0".into()],
            "bob",
            serde_json::json!({"state": "off"}),
        );

        let resp_a = engine
            .handle_sync(request(SyncType::Delta, vec![Change { change_type: ChangeType::Update, entity: a, relationships: None }]))
            .await
            .unwrap();
        assert_eq!(resp_a.sync_stats.conflicts, 0);

        let resp_b = engine
            .handle_sync(request(SyncType::Delta, vec![Change { change_type: ChangeType::Update, entity: b, relationships: None }]))
            .await
            .unwrap();
        assert_eq!(resp_b.sync_stats.conflicts, 1);

        match engine.store.get_current("device-001").await.unwrap() {
            CurrentState::Single(version) => {
                let current = engine.store.get_version("device-001", &version).await.unwrap().unwrap();
                assert_eq!(current.content["state"], "off");
                assert_eq!(current.source_type, SourceType::Generated);
            }
            other => panic!("expected a single merged current version, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parent_missing_rejects_only_that_entity() {
        let engine = engine().await;
        let good = make_version("home-1", "v1-alice", vec![], "alice", serde_json::json!({}));
        let bad = make_version("device-1", "v2-alice", vec!["v-unknown".into()], "alice", serde_json::json!({}));

        let response = engine
            .handle_sync(request(
                SyncType::Delta,
                vec![
                    Change { change_type: ChangeType::Create, entity: good, relationships: None },
                    Change { change_type: ChangeType::Update, entity: bad, relationships: None },
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.sync_stats.applied, 1);
        assert_eq!(response.sync_stats.rejected, 1);
    }

    #[tokio::test]
    async fn delete_writes_tombstone_rather_than_removing_row() {
        let engine = engine().await;
        let device = make_version("device-1", "v1-alice", vec![], "alice", serde_json::json!({"name": "Lamp"}));
        engine.store.put_version(device.clone(), "funkygibbon-server").await.unwrap();

        let delete_req = make_version("device-1", "v2-alice", vec!["v1-alice".into()], "alice", serde_json::json!({}));
        let response = engine
            .handle_sync(request(
                SyncType::Delta,
                vec![Change { change_type: ChangeType::Delete, entity: delete_req, relationships: None }],
            ))
            .await
            .unwrap();
        assert_eq!(response.sync_stats.applied, 1);

        match engine.store.get_current("device-1").await.unwrap() {
            CurrentState::Single(version) => {
                let current = engine.store.get_version("device-1", &version).await.unwrap().unwrap();
                assert!(current.is_tombstone());
            }
            other => panic!("expected tombstone to become current, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replaying_same_request_is_idempotent() {
        let engine = engine().await;
        let device = make_version(
            "device-001",
            "2025-01-01T00:00:00.000Z-alice",
            vec![],
            "alice",
            serde_json::json!({}),
        );
        let req = request(
            SyncType::Delta,
            vec![Change { change_type: ChangeType::Create, entity: device, relationships: None }],
        );

        let first = engine.handle_sync(req.clone()).await.unwrap();
        let second = engine.handle_sync(req).await.unwrap();

        assert_eq!(first.sync_stats.applied, 1);
        assert_eq!(second.sync_stats.applied, 1);
        assert_eq!(second.sync_stats.rejected, 0);
    }
}
