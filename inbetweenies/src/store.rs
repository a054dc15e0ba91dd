//! The Versioned Store (§4.1): an append-only log of entity and
//! relationship versions, shared verbatim between `funkygibbon` (server)
//! and `blowing-off` (client) — each points it at its own SQLite file.
//!
//! Grounded on `romilpunetha-tao/src/infrastructure/sqlite_database.rs`:
//! an `async_trait` interface backed by a `sqlx::SqlitePool`, table
//! creation issued as raw `sqlx::query` DDL, errors mapped through a
//! crate-local `AppError`-style enum.

use crate::error::{InbetweeniesError, InbetweeniesResult};
use crate::model::{EntityType, EntityVersion, Relationship, SourceType};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::BTreeSet;

/// Outcome of a single `put_version` call, distinguishing a fresh insert
/// from the idempotent replay of an already-applied identical version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyApplied,
}

/// Whether an entity currently has exactly one leaf, or several (§4.1
/// "Current-version recomputation").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentState {
    Single(String),
    Conflicting(Vec<String>),
    Absent,
}

#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Appends a version written by `device_id`. Returns `ParentMissing` if
    /// any declared parent is absent, `DuplicateVersion` if `(id, version)`
    /// exists with a different payload, and `AlreadyApplied` (success) if
    /// the identical payload was already stored.
    async fn put_version(&self, version: EntityVersion, device_id: &str) -> InbetweeniesResult<PutOutcome>;

    async fn get_version(&self, id: &str, version: &str) -> InbetweeniesResult<Option<EntityVersion>>;

    async fn get_current(&self, id: &str) -> InbetweeniesResult<CurrentState>;

    /// Every entity id that has at least one version, regardless of
    /// whether it currently has a single current version or is in
    /// conflict — used by the conflicts-listing endpoint (§6.1).
    async fn all_entity_ids(&self) -> InbetweeniesResult<Vec<String>>;

    /// Versions that list `version` as a parent.
    async fn get_children(&self, id: &str, version: &str) -> InbetweeniesResult<Vec<EntityVersion>>;

    /// All versions known for `id`, oldest first.
    async fn get_all_versions(&self, id: &str) -> InbetweeniesResult<Vec<EntityVersion>>;

    /// Versions whose writing device's counter exceeds the corresponding
    /// entry in `known` (§4.1, used by `since()` / delta sync).
    async fn since(&self, known: &crate::vector_clock::VectorClock) -> InbetweeniesResult<Vec<EntityVersion>>;

    /// Current version of every entity, optionally filtered by type (§4.1,
    /// used by full sync and by data-seeding tooling).
    async fn list_current(&self, entity_type: Option<EntityType>) -> InbetweeniesResult<Vec<EntityVersion>>;

    async fn put_relationship(&self, relationship: Relationship) -> InbetweeniesResult<()>;

    /// Relationships pinned to either side of `(entity_id, entity_version)`.
    async fn get_relationships_for(&self, entity_id: &str, entity_version: &str) -> InbetweeniesResult<Vec<Relationship>>;

    /// The store's own view of how many versions each device has
    /// contributed — the server (or client) half of the vector clock.
    async fn device_clock(&self) -> InbetweeniesResult<crate::vector_clock::VectorClock>;

    /// Bumps `device_id`'s counter by one without writing an entity
    /// version, so a device's vector-clock entry can advance on every
    /// processed sync request (§3.4: "the responder's own counter bumped
    /// by one") even when that request produced no server-authored
    /// version. Shares the same persisted counter `put_version` reads, so
    /// a later version actually written under `device_id` (e.g. a merge)
    /// is assigned a `device_seq` consistent with whatever counter value
    /// was already handed out in a prior response's vector clock.
    async fn advance_device_clock(&self, device_id: &str) -> InbetweeniesResult<u64>;
}

/// SQLite-backed `VersionedStore`. One instance is owned by the server
/// (all entities) and one by each client replica (its own copy).
pub struct SqliteVersionedStore {
    pool: SqlitePool,
}

impl SqliteVersionedStore {
    pub async fn connect(url: &str) -> InbetweeniesResult<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| InbetweeniesError::Storage(format!("failed to connect to {url}: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn connect_in_memory() -> InbetweeniesResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> InbetweeniesResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_versions (
                id TEXT NOT NULL,
                version TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                name TEXT NOT NULL,
                content_json TEXT NOT NULL,
                source_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                parent_versions_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                written_by_device TEXT NOT NULL,
                device_seq INTEGER NOT NULL,
                PRIMARY KEY (id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entity_versions_id ON entity_versions(id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                id TEXT NOT NULL PRIMARY KEY,
                from_id TEXT NOT NULL,
                from_version TEXT NOT NULL,
                to_id TEXT NOT NULL,
                to_version TEXT NOT NULL,
                type TEXT NOT NULL,
                properties_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_id, from_version)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_id, to_version)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_clocks (
                device_id TEXT PRIMARY KEY,
                counter INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> InbetweeniesResult<EntityVersion> {
        let entity_type_str: String = row.get("entity_type");
        let source_type_str: String = row.get("source_type");
        let parent_versions_json: String = row.get("parent_versions_json");
        let content_json: String = row.get("content_json");
        let created_at_str: String = row.get("created_at");

        Ok(EntityVersion {
            id: row.get("id"),
            version: row.get("version"),
            entity_type: parse_entity_type(&entity_type_str)?,
            name: row.get("name"),
            content: serde_json::from_str(&content_json)
                .map_err(|e| InbetweeniesError::Internal(format!("corrupt content_json: {e}")))?,
            source_type: parse_source_type(&source_type_str)?,
            user_id: row.get("user_id"),
            parent_versions: serde_json::from_str(&parent_versions_json)
                .map_err(|e| InbetweeniesError::Internal(format!("corrupt parent_versions_json: {e}")))?,
            created_at: created_at_str
                .parse()
                .map_err(|e| InbetweeniesError::Internal(format!("corrupt created_at: {e}")))?,
        })
    }
}

fn parse_entity_type(s: &str) -> InbetweeniesResult<EntityType> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| InbetweeniesError::Internal(format!("unknown entity_type {s}: {e}")))
}

fn parse_source_type(s: &str) -> InbetweeniesResult<SourceType> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| InbetweeniesError::Internal(format!("unknown source_type {s}: {e}")))
}

fn entity_type_tag(t: EntityType) -> String {
    serde_json::to_value(t).unwrap().as_str().unwrap().to_string()
}

fn source_type_tag(t: SourceType) -> String {
    serde_json::to_value(t).unwrap().as_str().unwrap().to_string()
}

#[async_trait]
impl VersionedStore for SqliteVersionedStore {
    async fn put_version(&self, version: EntityVersion, device_id: &str) -> InbetweeniesResult<PutOutcome> {
        if let Some(existing) = self.get_version(&version.id, &version.version).await? {
            return if existing == version {
                Ok(PutOutcome::AlreadyApplied)
            } else {
                Err(InbetweeniesError::DuplicateVersion(version.version.clone()))
            };
        }

        for parent in &version.parent_versions {
            if self.get_version(&version.id, parent).await?.is_none() {
                return Err(InbetweeniesError::ParentMissing(version.id.clone()));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| InbetweeniesError::Storage(format!("begin transaction: {e}")))?;

        let row = sqlx::query("SELECT counter FROM device_clocks WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .await?;
        let next_seq: i64 = row.map(|r| r.get::<i64, _>("counter")).unwrap_or(0) + 1;

        sqlx::query(
            r#"
            INSERT INTO device_clocks (device_id, counter) VALUES (?, ?)
            ON CONFLICT(device_id) DO UPDATE SET counter = excluded.counter
            "#,
        )
        .bind(device_id)
        .bind(next_seq)
        .execute(&mut *tx)
        .await?;

        let content_json = serde_json::to_string(&version.content)
            .map_err(|e| InbetweeniesError::Internal(format!("serialize content: {e}")))?;
        let parent_versions_json = serde_json::to_string(&version.parent_versions)
            .map_err(|e| InbetweeniesError::Internal(format!("serialize parents: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO entity_versions
                (id, version, entity_type, name, content_json, source_type, user_id,
                 parent_versions_json, created_at, written_by_device, device_seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.id)
        .bind(&version.version)
        .bind(entity_type_tag(version.entity_type))
        .bind(&version.name)
        .bind(content_json)
        .bind(source_type_tag(version.source_type))
        .bind(&version.user_id)
        .bind(parent_versions_json)
        .bind(version.created_at.to_rfc3339())
        .bind(device_id)
        .bind(next_seq)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| InbetweeniesError::Storage(format!("commit transaction: {e}")))?;

        Ok(PutOutcome::Inserted)
    }

    async fn get_version(&self, id: &str, version: &str) -> InbetweeniesResult<Option<EntityVersion>> {
        let row = sqlx::query(
            "SELECT id, version, entity_type, name, content_json, source_type, user_id, \
             parent_versions_json, created_at FROM entity_versions WHERE id = ? AND version = ?",
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_version(&r)).transpose()
    }

    async fn get_current(&self, id: &str) -> InbetweeniesResult<CurrentState> {
        let all = self.get_all_versions(id).await?;
        if all.is_empty() {
            return Ok(CurrentState::Absent);
        }

        let all_versions: BTreeSet<&str> = all.iter().map(|v| v.version.as_str()).collect();
        let referenced_as_parent: BTreeSet<&str> = all
            .iter()
            .flat_map(|v| v.parent_versions.iter().map(String::as_str))
            .collect();
        let leaves: Vec<&str> = all_versions.difference(&referenced_as_parent).copied().collect();

        match leaves.len() {
            1 => Ok(CurrentState::Single(leaves[0].to_string())),
            _ => Ok(CurrentState::Conflicting(leaves.into_iter().map(String::from).collect())),
        }
    }

    async fn get_children(&self, id: &str, version: &str) -> InbetweeniesResult<Vec<EntityVersion>> {
        let all = self.get_all_versions(id).await?;
        Ok(all.into_iter().filter(|v| v.extends(version)).collect())
    }

    async fn get_all_versions(&self, id: &str) -> InbetweeniesResult<Vec<EntityVersion>> {
        let rows = sqlx::query(
            "SELECT id, version, entity_type, name, content_json, source_type, user_id, \
             parent_versions_json, created_at FROM entity_versions WHERE id = ? ORDER BY created_at ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_version).collect()
    }

    async fn since(&self, known: &crate::vector_clock::VectorClock) -> InbetweeniesResult<Vec<EntityVersion>> {
        let rows = sqlx::query(
            "SELECT id, version, entity_type, name, content_json, source_type, user_id, \
             parent_versions_json, created_at, written_by_device, device_seq FROM entity_versions",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in &rows {
            let written_by_device: String = row.get("written_by_device");
            let device_seq: i64 = row.get("device_seq");
            if device_seq as u64 > known.get(&written_by_device) {
                out.push(Self::row_to_version(row)?);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn all_entity_ids(&self) -> InbetweeniesResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT id FROM entity_versions").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("id")).collect())
    }

    async fn list_current(&self, entity_type: Option<EntityType>) -> InbetweeniesResult<Vec<EntityVersion>> {
        let ids = self.all_entity_ids().await?;

        let mut out = Vec::new();
        for id in ids {
            if let CurrentState::Single(version) = self.get_current(&id).await? {
                if let Some(ev) = self.get_version(&id, &version).await? {
                    if entity_type.is_none_or_eq(ev.entity_type) {
                        out.push(ev);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn put_relationship(&self, relationship: Relationship) -> InbetweeniesResult<()> {
        let properties_json = serde_json::to_string(&relationship.properties)
            .map_err(|e| InbetweeniesError::Internal(format!("serialize properties: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO relationships (id, from_id, from_version, to_id, to_version, type, properties_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                from_id = excluded.from_id, from_version = excluded.from_version,
                to_id = excluded.to_id, to_version = excluded.to_version,
                type = excluded.type, properties_json = excluded.properties_json
            "#,
        )
        .bind(&relationship.id)
        .bind(&relationship.from_entity_id)
        .bind(&relationship.from_entity_version)
        .bind(&relationship.to_entity_id)
        .bind(&relationship.to_entity_version)
        .bind(&relationship.relationship_type)
        .bind(properties_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_relationships_for(&self, entity_id: &str, entity_version: &str) -> InbetweeniesResult<Vec<Relationship>> {
        let rows = sqlx::query(
            "SELECT id, from_id, from_version, to_id, to_version, type, properties_json FROM relationships \
             WHERE (from_id = ? AND from_version = ?) OR (to_id = ? AND to_version = ?)",
        )
        .bind(entity_id)
        .bind(entity_version)
        .bind(entity_id)
        .bind(entity_version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let properties_json: String = row.get("properties_json");
                Ok(Relationship {
                    id: row.get("id"),
                    from_entity_id: row.get("from_id"),
                    from_entity_version: row.get("from_version"),
                    to_entity_id: row.get("to_id"),
                    to_entity_version: row.get("to_version"),
                    relationship_type: row.get("type"),
                    properties: serde_json::from_str(&properties_json)
                        .map_err(|e| InbetweeniesError::Internal(format!("corrupt properties_json: {e}")))?,
                })
            })
            .collect()
    }

    async fn device_clock(&self) -> InbetweeniesResult<crate::vector_clock::VectorClock> {
        let rows = sqlx::query("SELECT device_id, counter FROM device_clocks")
            .fetch_all(&self.pool)
            .await?;

        let mut clock = crate::vector_clock::VectorClock::new();
        for row in rows {
            let device_id: String = row.get("device_id");
            let counter: i64 = row.get("counter");
            clock.clocks.insert(device_id, counter as u64);
        }
        Ok(clock)
    }

    async fn advance_device_clock(&self, device_id: &str) -> InbetweeniesResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| InbetweeniesError::Storage(format!("begin transaction: {e}")))?;

        let row = sqlx::query("SELECT counter FROM device_clocks WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .await?;
        let next: i64 = row.map(|r| r.get::<i64, _>("counter")).unwrap_or(0) + 1;

        sqlx::query(
            r#"
            INSERT INTO device_clocks (device_id, counter) VALUES (?, ?)
            ON CONFLICT(device_id) DO UPDATE SET counter = excluded.counter
            "#,
        )
        .bind(device_id)
        .bind(next)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| InbetweeniesError::Storage(format!("commit transaction: {e}")))?;
        Ok(next as u64)
    }
}

/// Small helper so `list_current`'s filter reads as a sentence.
trait OptionEq<T> {
    fn is_none_or_eq(&self, other: T) -> bool;
}

impl<T: PartialEq> OptionEq<T> for Option<T> {
    fn is_none_or_eq(&self, other: T) -> bool {
        match self {
            None => true,
            Some(v) => *v == other,
        }
    }
}
