//! Startup configuration, following `romilpunetha-tao/src/config.rs`'s
//! `Config::from_env` shape.

use inbetweenies::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub device_id: String,
    pub request_timeout_secs: u64,
}

/// §4.3 resolution policy and §9 clock-skew/batch-size knobs, all
/// configurable at startup per the spec's Open Questions resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub conflict_policy: ConflictPolicy,
    pub max_batch_size: usize,
    pub max_clock_skew_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::LastWriteWins,
            max_batch_size: 1_000,
            max_clock_skew_secs: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/funkygibbon.db".to_string()),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .unwrap_or(8000),
                device_id: env::var("SERVER_DEVICE_ID").unwrap_or_else(|_| "funkygibbon-server".to_string()),
                request_timeout_secs: env::var("SYNC_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            sync: SyncConfig {
                conflict_policy: match env::var("CONFLICT_POLICY").as_deref() {
                    Ok("manual") => ConflictPolicy::Manual,
                    Ok("field_merge") => ConflictPolicy::FieldMerge,
                    _ => ConflictPolicy::LastWriteWins,
                },
                max_batch_size: env::var("MAX_BATCH_SIZE")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1_000),
                max_clock_skew_secs: env::var("MAX_CLOCK_SKEW_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300),
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
