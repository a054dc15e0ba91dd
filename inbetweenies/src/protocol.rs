//! Inbetweenies wire protocol shapes (§6.2).

use crate::conflict::ConflictReport;
use crate::model::{EntityVersion, Relationship};
use crate::vector_clock::VectorClock;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "inbetweenies-v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,
    pub entity: EntityVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<Relationship>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub protocol_version: String,
    pub device_id: String,
    pub user_id: String,
    pub sync_type: SyncType,
    pub vector_clock: VectorClock,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub received: usize,
    pub applied: usize,
    pub rejected: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub protocol_version: String,
    pub vector_clock: VectorClock,
    pub changes: Vec<Change>,
    pub conflicts: Vec<ConflictReport>,
    pub sync_stats: SyncStats,
    pub sync_type: SyncType,
}
