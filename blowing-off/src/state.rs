//! Client-local `sync_state` table (§6.3): the single source of truth for
//! this replica's `device_id`, last-known server `vector_clock`, and the
//! timestamp of its last completed sync round-trip.

use crate::error::ClientResult;
use inbetweenies::VectorClock;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub struct SyncState {
    pool: SqlitePool,
}

impl SyncState {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> ClientResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS sync_state (key TEXT NOT NULL PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        sqlx::query(
            "INSERT INTO sync_state (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// This replica's stable device identifier. Seeded from `configured`
    /// (the `ClientSyncConfig::device_id` in effect) on first run and
    /// persisted from then on, so later changes to the configured default
    /// don't silently shift an already-enrolled replica's identity.
    pub async fn device_id(&self, configured: &str) -> ClientResult<String> {
        if let Some(id) = self.get("device_id").await? {
            return Ok(id);
        }
        self.set("device_id", configured).await?;
        Ok(configured.to_string())
    }

    pub async fn set_device_id(&self, device_id: &str) -> ClientResult<()> {
        self.set("device_id", device_id).await
    }

    /// The last `vector_clock` returned by the server, or an empty clock
    /// before the replica's first sync (triggering a full sync).
    pub async fn vector_clock(&self) -> ClientResult<VectorClock> {
        match self.get("vector_clock").await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| crate::error::ClientError::Storage(format!("corrupt vector_clock: {e}"))),
            None => Ok(VectorClock::new()),
        }
    }

    pub async fn set_vector_clock(&self, clock: &VectorClock) -> ClientResult<()> {
        let json = serde_json::to_string(clock)
            .map_err(|e| crate::error::ClientError::Storage(format!("serialize vector_clock: {e}")))?;
        self.set("vector_clock", &json).await
    }

    pub async fn last_sync(&self) -> ClientResult<Option<chrono::DateTime<chrono::Utc>>> {
        match self.get("last_sync").await? {
            Some(ts) => Ok(ts.parse().ok()),
            None => Ok(None),
        }
    }

    pub async fn set_last_sync(&self, at: chrono::DateTime<chrono::Utc>) -> ClientResult<()> {
        self.set("last_sync", &at.to_rfc3339()).await
    }
}
