//! The client-facing facade: one local replica combining the versioned
//! store, change tracker, sync state, and sync engine behind the handful
//! of operations a caller (CLI or embedding application) actually needs.

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::state::SyncState;
use crate::sync_engine::{ClientSyncEngine, SyncOutcome};
use crate::tracker::{ChangeTracker, Operation, TrackerRow};
use crate::transport::SyncTransport;
use inbetweenies::store::{CurrentState, VersionedStore};
use inbetweenies::{EntityType, EntityVersion, Relationship, SourceType, SqliteVersionedStore, VectorClock};
use std::sync::Arc;

pub struct Replica {
    store: Arc<dyn VersionedStore>,
    tracker: Arc<ChangeTracker>,
    state: Arc<SyncState>,
    sync_engine: ClientSyncEngine,
    config: Config,
}

impl Replica {
    pub async fn open(config: Config, token: Option<String>) -> anyhow::Result<Self> {
        let store: Arc<dyn VersionedStore> = Arc::new(SqliteVersionedStore::connect(&config.database.url).await?);

        let tracker_pool = sqlx::sqlite::SqlitePool::connect(&config.database.url).await?;
        let tracker = Arc::new(ChangeTracker::new(tracker_pool));
        tracker.migrate().await?;

        let state_pool = sqlx::sqlite::SqlitePool::connect(&config.database.url).await?;
        let state = Arc::new(SyncState::new(state_pool));
        state.migrate().await?;

        let transport = SyncTransport::new(&config.server.base_url, config.server.request_timeout_secs, token)?;
        let sync_engine = ClientSyncEngine::new(store.clone(), tracker.clone(), state.clone(), transport, config.sync.clone());

        Ok(Self { store, tracker, state, sync_engine, config })
    }

    /// Writes a brand-new entity (parent_versions empty) and records it as
    /// `pending` in the tracker (§3.5, §4.7).
    pub async fn create_entity(
        &self,
        id: &str,
        entity_type: EntityType,
        name: &str,
        content: serde_json::Value,
    ) -> ClientResult<EntityVersion> {
        let version = EntityVersion {
            id: id.to_string(),
            version: EntityVersion::make_version(chrono::Utc::now(), &self.config.sync.user_id),
            entity_type,
            name: name.to_string(),
            content,
            source_type: SourceType::Manual,
            user_id: self.config.sync.user_id.clone(),
            parent_versions: vec![],
            created_at: chrono::Utc::now(),
        };
        self.store.put_version(version.clone(), &self.config.sync.device_id).await?;
        self.tracker.record(id, entity_type, Operation::Create).await?;
        Ok(version)
    }

    /// Writes a linear update on top of the entity's current version.
    pub async fn update_entity(&self, id: &str, content: serde_json::Value) -> ClientResult<EntityVersion> {
        let current = self.require_current(id).await?;
        let parent = current.version.clone();

        let version = EntityVersion {
            version: EntityVersion::make_version(chrono::Utc::now(), &self.config.sync.user_id),
            content,
            source_type: SourceType::Manual,
            user_id: self.config.sync.user_id.clone(),
            parent_versions: vec![parent.clone()],
            created_at: chrono::Utc::now(),
            ..current
        };
        self.store.put_version(version.clone(), &self.config.sync.device_id).await?;
        self.repin_relationships(id, &parent, &version.version).await?;
        self.tracker.record(id, version.entity_type, Operation::Update).await?;
        Ok(version)
    }

    /// Writes a tombstone version rather than removing any row (§9).
    pub async fn delete_entity(&self, id: &str) -> ClientResult<EntityVersion> {
        let current = self.require_current(id).await?;
        let parent = current.version.clone();

        let mut content = current.content.clone();
        if let Some(obj) = content.as_object_mut() {
            obj.insert("deleted".to_string(), serde_json::Value::Bool(true));
        } else {
            content = serde_json::json!({"deleted": true});
        }

        let version = EntityVersion {
            version: EntityVersion::make_version(chrono::Utc::now(), &self.config.sync.user_id),
            content,
            source_type: SourceType::Manual,
            user_id: self.config.sync.user_id.clone(),
            parent_versions: vec![parent.clone()],
            created_at: chrono::Utc::now(),
            ..current
        };
        self.store.put_version(version.clone(), &self.config.sync.device_id).await?;
        self.repin_relationships(id, &parent, &version.version).await?;
        self.tracker.record(id, version.entity_type, Operation::Delete).await?;
        Ok(version)
    }

    pub async fn entity(&self, id: &str) -> ClientResult<Option<EntityVersion>> {
        match self.store.get_current(id).await? {
            CurrentState::Single(version) => self.store.get_version(id, &version).await,
            _ => Ok(None),
        }
    }

    /// Relationships pinned to `id`'s current version, on either endpoint.
    pub async fn relationships(&self, id: &str) -> ClientResult<Vec<Relationship>> {
        match self.store.get_current(id).await? {
            CurrentState::Single(version) => Ok(self.store.get_relationships_for(id, &version).await?),
            _ => Ok(Vec::new()),
        }
    }

    /// Attaches a relationship between the current versions of `from_id`
    /// and `to_id` (§3.2) and marks `from_id` pending so it rides along on
    /// the next sync's `Change` for that entity.
    pub async fn relate(
        &self,
        relationship_id: &str,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
        properties: serde_json::Value,
    ) -> ClientResult<Relationship> {
        let from = self.require_current(from_id).await?;
        let to = self.require_current(to_id).await?;
        let relationship = Relationship {
            id: relationship_id.to_string(),
            from_entity_id: from_id.to_string(),
            from_entity_version: from.version,
            to_entity_id: to_id.to_string(),
            to_entity_version: to.version,
            relationship_type: relationship_type.to_string(),
            properties,
        };
        self.store.put_relationship(relationship.clone()).await?;
        self.tracker.record(from_id, from.entity_type, Operation::Update).await?;
        Ok(relationship)
    }

    async fn require_current(&self, id: &str) -> ClientResult<EntityVersion> {
        let CurrentState::Single(version) = self.store.get_current(id).await? else {
            return Err(ClientError::Internal(format!("{id}: no single current version (absent or in conflict)")));
        };
        self.store
            .get_version(id, &version)
            .await?
            .ok_or_else(|| ClientError::Internal(format!("current version {version} vanished")))
    }

    /// Re-pins every relationship attached to `old_version` onto
    /// `new_version` under a derived id, leaving the original row in
    /// place (§3.2: "re-emitted when either endpoint advances"; §8
    /// scenario 5 expects both the old and the newly-pinned row to
    /// survive).
    async fn repin_relationships(&self, entity_id: &str, old_version: &str, new_version: &str) -> ClientResult<()> {
        for existing in self.store.get_relationships_for(entity_id, old_version).await? {
            let repinned = Relationship {
                id: format!("{}@{new_version}", existing.id),
                from_entity_version: if existing.from_entity_id == entity_id {
                    new_version.to_string()
                } else {
                    existing.from_entity_version.clone()
                },
                to_entity_version: if existing.to_entity_id == entity_id {
                    new_version.to_string()
                } else {
                    existing.to_entity_version.clone()
                },
                ..existing
            };
            self.store.put_relationship(repinned).await?;
        }
        Ok(())
    }

    pub async fn sync(&self) -> ClientResult<SyncOutcome> {
        self.sync_engine.sync().await
    }

    pub async fn pending(&self) -> ClientResult<Vec<TrackerRow>> {
        self.tracker.get_pending().await
    }

    pub async fn conflicts(&self) -> ClientResult<Vec<TrackerRow>> {
        self.tracker.get_conflicts().await
    }

    pub async fn vector_clock(&self) -> ClientResult<VectorClock> {
        self.state.vector_clock().await
    }

    pub async fn last_sync(&self) -> ClientResult<Option<chrono::DateTime<chrono::Utc>>> {
        self.state.last_sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientSyncConfig, DatabaseConfig, RemoteServerConfig};

    async fn replica() -> Replica {
        let config = Config {
            database: DatabaseConfig { url: "sqlite::memory:".to_string() },
            server: RemoteServerConfig { base_url: "http://127.0.0.1:1".to_string(), request_timeout_secs: 1 },
            sync: ClientSyncConfig::default(),
        };
        Replica::open(config, None).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let replica = replica().await;
        let created = replica
            .create_entity("device-1", EntityType::Device, "Lamp", serde_json::json!({"state": "on"}))
            .await
            .unwrap();
        let fetched = replica.entity("device-1").await.unwrap().unwrap();
        assert_eq!(fetched, created);

        let pending = replica.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, "device-1");
    }

    #[tokio::test]
    async fn update_extends_the_current_version() {
        let replica = replica().await;
        let created = replica.create_entity("device-1", EntityType::Device, "Lamp", serde_json::json!({})).await.unwrap();
        let updated = replica.update_entity("device-1", serde_json::json!({"state": "on"})).await.unwrap();

        assert_eq!(updated.parent_versions, vec![created.version]);
        assert_eq!(replica.entity("device-1").await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn delete_writes_tombstone() {
        let replica = replica().await;
        replica.create_entity("device-1", EntityType::Device, "Lamp", serde_json::json!({})).await.unwrap();
        let deleted = replica.delete_entity("device-1").await.unwrap();
        assert!(deleted.is_tombstone());
    }

    #[tokio::test]
    async fn relate_marks_the_from_entity_pending() {
        let replica = replica().await;
        let device = replica.create_entity("device-1", EntityType::Device, "Lamp", serde_json::json!({})).await.unwrap();
        let room = replica.create_entity("room-1", EntityType::Room, "Kitchen", serde_json::json!({})).await.unwrap();
        replica.tracker.mark_synced("device-1").await.unwrap();
        replica.tracker.mark_synced("room-1").await.unwrap();

        let relationship = replica
            .relate("rel-1", "device-1", "room-1", "located_in", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(relationship.from_entity_version, device.version);
        assert_eq!(relationship.to_entity_version, room.version);

        let pending = replica.pending().await.unwrap();
        assert!(pending.iter().any(|row| row.entity_id == "device-1"));
    }

    #[tokio::test]
    async fn update_repins_existing_relationships_onto_the_new_version() {
        let replica = replica().await;
        let device = replica.create_entity("device-1", EntityType::Device, "Lamp", serde_json::json!({})).await.unwrap();
        replica.create_entity("room-1", EntityType::Room, "Kitchen", serde_json::json!({})).await.unwrap();
        replica.relate("rel-1", "device-1", "room-1", "located_in", serde_json::json!({})).await.unwrap();

        let updated = replica.update_entity("device-1", serde_json::json!({"state": "on"})).await.unwrap();

        let pinned_to_old = replica.store.get_relationships_for("device-1", &device.version).await.unwrap();
        assert_eq!(pinned_to_old.len(), 1, "original pin stays in place, preserving history");
        assert_eq!(pinned_to_old[0].id, "rel-1");

        let pinned_to_new = replica.store.get_relationships_for("device-1", &updated.version).await.unwrap();
        assert_eq!(pinned_to_new.len(), 1);
        assert_eq!(pinned_to_new[0].from_entity_version, updated.version);
        assert_eq!(pinned_to_new[0].to_entity_id, "room-1");
        assert_ne!(pinned_to_new[0].id, pinned_to_old[0].id);
    }
}
