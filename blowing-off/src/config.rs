//! Client startup configuration, mirroring `funkygibbon::config::Config`'s
//! `from_env` shape (itself grounded on `romilpunetha-tao/src/config.rs`).

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: RemoteServerConfig,
    pub sync: ClientSyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// §4.5/§9 retry and batching knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSyncConfig {
    pub device_id: String,
    pub user_id: String,
    pub max_batch_size: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Consecutive sync *cycles* (not in-call retry attempts) that may fail
    /// at the transport layer before a row is force-marked `conflict` with
    /// reason `retry_exhausted` (§9). Independent of `max_retries`, which
    /// only bounds the backoff loop within a single cycle.
    pub retry_exhausted_after: u32,
}

impl Default for ClientSyncConfig {
    fn default() -> Self {
        Self {
            device_id: "blowing-off-client".to_string(),
            user_id: "blowing-off-cli".to_string(),
            max_batch_size: 1_000,
            max_retries: 5,
            initial_backoff_ms: 200,
            retry_exhausted_after: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("BLOWING_OFF_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/blowing-off.db".to_string()),
            },
            server: RemoteServerConfig {
                base_url: env::var("FUNKYGIBBON_URL").unwrap_or_else(|_| "http://localhost:8000".to_string()),
                request_timeout_secs: env::var("SYNC_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            sync: ClientSyncConfig {
                device_id: env::var("CLIENT_DEVICE_ID").unwrap_or_else(|_| "blowing-off-client".to_string()),
                user_id: env::var("CLIENT_USER_ID").unwrap_or_else(|_| "blowing-off-cli".to_string()),
                max_batch_size: env::var("MAX_BATCH_SIZE")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1_000),
                max_retries: env::var("MAX_RETRIES").unwrap_or_else(|_| "5".to_string()).parse().unwrap_or(5),
                initial_backoff_ms: env::var("INITIAL_BACKOFF_MS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .unwrap_or(200),
                retry_exhausted_after: env::var("RETRY_EXHAUSTED_AFTER")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
        })
    }
}
