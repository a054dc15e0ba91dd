//! Client-side change tracker (§3.3, §4.7): one row per locally-touched
//! entity, tagging its sync status and the operation that produced it.
//!
//! Grounded on `original_source/blowing-off/tests/unit/test_sync_tracking.py`:
//! `create` marks `pending`, `mark_synced` clears `conflict_reason` and
//! resets `retry_count`, `mark_conflict` sets `conflict` and increments
//! `retry_count`, and `get_pending`/`get_conflicts` are plain filtered
//! queries over the same table.

use crate::error::ClientResult;
use inbetweenies::EntityType;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerRow {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub sync_status: SyncStatus,
    pub operation: Operation,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub conflict_reason: Option<String>,
    pub retry_count: u32,
}

/// Client-local change tracker, backed by the `sync_tracker` table (§6.3).
pub struct ChangeTracker {
    pool: SqlitePool,
}

impl ChangeTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> ClientResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_tracker (
                entity_id TEXT NOT NULL PRIMARY KEY,
                entity_type TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                operation TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                conflict_reason TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a local mutation. Creation and update both mark `pending`
    /// (§4.7: `synced → pending` on local mutation); a fresh row is
    /// inserted on first touch, otherwise the existing row is overwritten.
    pub async fn record(&self, entity_id: &str, entity_type: EntityType, operation: Operation) -> ClientResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_tracker (entity_id, entity_type, sync_status, operation, last_modified, conflict_reason, retry_count)
            VALUES (?, ?, 'pending', ?, ?, NULL, 0)
            ON CONFLICT(entity_id) DO UPDATE SET
                sync_status = 'pending',
                operation = excluded.operation,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(entity_id)
        .bind(entity_type_tag(entity_type))
        .bind(operation_tag(operation))
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears conflict state and resets `retry_count` (§3.3 invariant).
    /// Idempotent: calling twice in a row is equivalent to calling once.
    pub async fn mark_synced(&self, entity_id: &str) -> ClientResult<()> {
        sqlx::query(
            "UPDATE sync_tracker SET sync_status = 'synced', conflict_reason = NULL, retry_count = 0 WHERE entity_id = ?",
        )
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sets `conflict` and increments `retry_count` (§3.3 invariant).
    pub async fn mark_conflict(&self, entity_id: &str, reason: &str) -> ClientResult<()> {
        sqlx::query(
            "UPDATE sync_tracker SET sync_status = 'conflict', conflict_reason = ?, retry_count = retry_count + 1 WHERE entity_id = ?",
        )
        .bind(reason)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records one sync *cycle* that failed at the transport layer for this
    /// row (§4.5 step 2, §9). A row stays `pending` with its `retry_count`
    /// bumped unless that crosses `ceiling`, in which case it is force-marked
    /// `conflict` with reason `retry_exhausted` instead — distinct from
    /// `mark_conflict`'s counting, which tracks resolver conflicts rather
    /// than consecutive transport failures across cycles.
    pub async fn record_transport_failure(&self, entity_id: &str, ceiling: u32) -> ClientResult<()> {
        let current = self.get(entity_id).await?.map(|row| row.retry_count).unwrap_or(0);
        let next = current + 1;
        if next >= ceiling {
            self.mark_conflict(entity_id, "retry_exhausted").await
        } else {
            sqlx::query("UPDATE sync_tracker SET retry_count = ? WHERE entity_id = ?")
                .bind(next as i64)
                .bind(entity_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    /// Removes a tracker row once its delete has been acknowledged by the
    /// server (§4.7 "Terminal state on delete").
    pub async fn remove(&self, entity_id: &str) -> ClientResult<()> {
        sqlx::query("DELETE FROM sync_tracker WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_pending(&self) -> ClientResult<Vec<TrackerRow>> {
        self.get_by_status("pending").await
    }

    pub async fn get_conflicts(&self) -> ClientResult<Vec<TrackerRow>> {
        self.get_by_status("conflict").await
    }

    async fn get_by_status(&self, status: &str) -> ClientResult<Vec<TrackerRow>> {
        let rows = sqlx::query(
            "SELECT entity_id, entity_type, sync_status, operation, last_modified, conflict_reason, retry_count \
             FROM sync_tracker WHERE sync_status = ? ORDER BY last_modified ASC",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_tracker_row).collect()
    }

    pub async fn get(&self, entity_id: &str) -> ClientResult<Option<TrackerRow>> {
        let row = sqlx::query(
            "SELECT entity_id, entity_type, sync_status, operation, last_modified, conflict_reason, retry_count \
             FROM sync_tracker WHERE entity_id = ?",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_tracker_row).transpose()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies a batch of post-sync transitions inside a single transaction,
    /// so a sync that is cancelled mid-flight leaves either all of its
    /// pushed rows cleared or none of them (§4.5 "Cancellation").
    pub async fn apply_outcomes(&self, outcomes: &[(String, TrackerOutcome)]) -> ClientResult<()> {
        let mut tx = self.pool.begin().await?;
        for (entity_id, outcome) in outcomes {
            match outcome {
                TrackerOutcome::Synced => {
                    sqlx::query(
                        "UPDATE sync_tracker SET sync_status = 'synced', conflict_reason = NULL, retry_count = 0 WHERE entity_id = ?",
                    )
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await?;
                }
                TrackerOutcome::Conflict(reason) => {
                    sqlx::query(
                        "UPDATE sync_tracker SET sync_status = 'conflict', conflict_reason = ?, retry_count = retry_count + 1 WHERE entity_id = ?",
                    )
                    .bind(reason)
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await?;
                }
                TrackerOutcome::Remove => {
                    sqlx::query("DELETE FROM sync_tracker WHERE entity_id = ?")
                        .bind(entity_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

/// One tracker-row transition produced by a sync round-trip (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    Synced,
    Conflict(String),
    Remove,
}

fn row_to_tracker_row(row: &sqlx::sqlite::SqliteRow) -> ClientResult<TrackerRow> {
    let entity_type_str: String = row.get("entity_type");
    let sync_status_str: String = row.get("sync_status");
    let operation_str: String = row.get("operation");
    let last_modified_str: String = row.get("last_modified");

    Ok(TrackerRow {
        entity_id: row.get("entity_id"),
        entity_type: parse_entity_type(&entity_type_str)?,
        sync_status: parse_sync_status(&sync_status_str)?,
        operation: parse_operation(&operation_str)?,
        last_modified: last_modified_str
            .parse()
            .map_err(|e| crate::error::ClientError::Storage(format!("corrupt last_modified: {e}")))?,
        conflict_reason: row.get("conflict_reason"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
    })
}

fn entity_type_tag(t: EntityType) -> String {
    serde_json::to_value(t).unwrap().as_str().unwrap().to_string()
}

fn parse_entity_type(s: &str) -> ClientResult<EntityType> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| crate::error::ClientError::Storage(format!("unknown entity_type {s}: {e}")))
}

fn operation_tag(op: Operation) -> String {
    serde_json::to_value(op).unwrap().as_str().unwrap().to_string()
}

fn parse_operation(s: &str) -> ClientResult<Operation> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| crate::error::ClientError::Storage(format!("unknown operation {s}: {e}")))
}

fn parse_sync_status(s: &str) -> ClientResult<SyncStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| crate::error::ClientError::Storage(format!("unknown sync_status {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> ChangeTracker {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let tracker = ChangeTracker::new(pool);
        tracker.migrate().await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn create_marks_pending() {
        let tracker = tracker().await;
        tracker.record("home-1", EntityType::Home, Operation::Create).await.unwrap();
        let row = tracker.get("home-1").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert_eq!(row.operation, Operation::Create);
    }

    #[tokio::test]
    async fn mark_synced_then_update_returns_to_pending() {
        let tracker = tracker().await;
        tracker.record("home-2", EntityType::Home, Operation::Create).await.unwrap();
        tracker.mark_synced("home-2").await.unwrap();
        assert_eq!(tracker.get("home-2").await.unwrap().unwrap().sync_status, SyncStatus::Synced);

        tracker.record("home-2", EntityType::Home, Operation::Update).await.unwrap();
        let row = tracker.get("home-2").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert_eq!(row.operation, Operation::Update);
    }

    #[tokio::test]
    async fn get_pending_excludes_synced() {
        let tracker = tracker().await;
        tracker.record("home-1", EntityType::Home, Operation::Create).await.unwrap();
        tracker.record("home-2", EntityType::Home, Operation::Create).await.unwrap();
        tracker.record("home-3", EntityType::Home, Operation::Create).await.unwrap();
        tracker.mark_synced("home-2").await.unwrap();

        let pending = tracker.get_pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"home-1"));
        assert!(ids.contains(&"home-3"));
    }

    #[tokio::test]
    async fn mark_conflict_increments_retry_count() {
        let tracker = tracker().await;
        tracker.record("acc-1", EntityType::Device, Operation::Create).await.unwrap();
        tracker.mark_conflict("acc-1", "server version is newer").await.unwrap();

        let row = tracker.get("acc-1").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Conflict);
        assert_eq!(row.conflict_reason.as_deref(), Some("server version is newer"));
        assert_eq!(row.retry_count, 1);
    }

    #[tokio::test]
    async fn record_transport_failure_stays_pending_below_ceiling() {
        let tracker = tracker().await;
        tracker.record("device-1", EntityType::Device, Operation::Create).await.unwrap();

        tracker.record_transport_failure("device-1", 3).await.unwrap();
        let row = tracker.get("device-1").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert_eq!(row.retry_count, 1);

        tracker.record_transport_failure("device-1", 3).await.unwrap();
        let row = tracker.get("device-1").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert_eq!(row.retry_count, 2);
    }

    #[tokio::test]
    async fn record_transport_failure_exhausts_at_ceiling() {
        let tracker = tracker().await;
        tracker.record("device-1", EntityType::Device, Operation::Create).await.unwrap();
        tracker.record_transport_failure("device-1", 2).await.unwrap();
        tracker.record_transport_failure("device-1", 2).await.unwrap();

        let row = tracker.get("device-1").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Conflict);
        assert_eq!(row.conflict_reason.as_deref(), Some("retry_exhausted"));
    }

    #[tokio::test]
    async fn get_conflicts_filters_by_status() {
        let tracker = tracker().await;
        tracker.record("room-1", EntityType::Room, Operation::Create).await.unwrap();
        tracker.record("room-2", EntityType::Room, Operation::Create).await.unwrap();
        tracker.mark_conflict("room-1", "timestamp conflict").await.unwrap();

        let conflicts = tracker.get_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_id, "room-1");
    }

    #[tokio::test]
    async fn mark_synced_clears_conflict_state() {
        let tracker = tracker().await;
        tracker.record("home-conflict", EntityType::Home, Operation::Create).await.unwrap();
        tracker.mark_conflict("home-conflict", "test conflict").await.unwrap();
        assert_eq!(tracker.get("home-conflict").await.unwrap().unwrap().retry_count, 1);

        tracker.mark_synced("home-conflict").await.unwrap();
        let row = tracker.get("home-conflict").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.conflict_reason, None);
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn mark_synced_is_idempotent() {
        let tracker = tracker().await;
        tracker.record("home-1", EntityType::Home, Operation::Create).await.unwrap();
        tracker.mark_synced("home-1").await.unwrap();
        tracker.mark_synced("home-1").await.unwrap();
        assert_eq!(tracker.get("home-1").await.unwrap().unwrap().sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn apply_outcomes_applies_all_transitions_together() {
        let tracker = tracker().await;
        tracker.record("home-1", EntityType::Home, Operation::Create).await.unwrap();
        tracker.record("home-2", EntityType::Home, Operation::Create).await.unwrap();
        tracker.record("home-3", EntityType::Home, Operation::Delete).await.unwrap();

        tracker
            .apply_outcomes(&[
                ("home-1".to_string(), TrackerOutcome::Synced),
                ("home-2".to_string(), TrackerOutcome::Conflict("server version is newer".to_string())),
                ("home-3".to_string(), TrackerOutcome::Remove),
            ])
            .await
            .unwrap();

        assert_eq!(tracker.get("home-1").await.unwrap().unwrap().sync_status, SyncStatus::Synced);
        assert_eq!(tracker.get("home-2").await.unwrap().unwrap().sync_status, SyncStatus::Conflict);
        assert!(tracker.get("home-3").await.unwrap().is_none());
    }
}
