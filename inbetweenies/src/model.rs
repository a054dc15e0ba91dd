//! The versioned graph's data model: entities, relationships, and the
//! closed-set tags attached to them (§3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// `entity_type` tag, closed set per §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Home,
    Room,
    Device,
    User,
    Characteristic,
    Service,
    Procedure,
    Manual,
    Note,
    Schedule,
    Automation,
    Zone,
}

/// `source_type` tag, provenance of a version, closed set per §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Imported,
    Generated,
    Synced,
}

/// A relationship tag. The original domain's vocabulary is open-ended
/// (new automations invent new verbs), so unlike `EntityType` this is
/// carried as a string rather than a closed enum.
pub type RelationshipType = String;

/// One immutable row describing an entity at a point in its history,
/// keyed by `(id, version)` (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub id: String,
    pub version: String,
    pub entity_type: EntityType,
    pub name: String,
    pub content: serde_json::Value,
    pub source_type: SourceType,
    pub user_id: String,
    pub parent_versions: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EntityVersion {
    /// Parses the ISO-8601 timestamp embedded in `version` (`<ts>Z-<user_id>`).
    ///
    /// Versions are formatted as `<ISO-8601 UTC timestamp>Z-<user_id>`; since
    /// `user_id` may itself contain hyphens, the timestamp is recovered by
    /// splitting on the last `Z-` rather than the first `-`.
    pub fn version_timestamp(version: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let idx = version.rfind("Z-")?;
        let ts = &version[..idx + 1];
        chrono::DateTime::parse_from_rfc3339(ts)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }

    /// The writer embedded in `version` (the part after the last `Z-`).
    pub fn version_user_id(version: &str) -> Option<&str> {
        version.rfind("Z-").map(|idx| &version[idx + 2..])
    }

    /// Builds the canonical `<ISO-8601 UTC timestamp>Z-<user_id>` version string.
    pub fn make_version(timestamp: chrono::DateTime<chrono::Utc>, user_id: &str) -> String {
        format!("{}Z-{}", timestamp.format("%Y-%m-%dT%H:%M:%S%.f"), user_id)
    }

    /// True iff `content.deleted == true` — a tombstone version (§9).
    pub fn is_tombstone(&self) -> bool {
        self.content
            .get("deleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Whether `self` lists `other` as one of its parents.
    pub fn extends(&self, other_version: &str) -> bool {
        self.parent_versions.iter().any(|p| p == other_version)
    }

    pub fn parent_set(&self) -> BTreeSet<&str> {
        self.parent_versions.iter().map(String::as_str).collect()
    }
}

/// An edge between two pinned entity versions (§3.2). Relationships are
/// re-emitted (not mutated) whenever either endpoint advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_entity_id: String,
    pub from_entity_version: String,
    pub to_entity_id: String,
    pub to_entity_version: String,
    pub relationship_type: RelationshipType,
    pub properties: serde_json::Value,
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub fn make_version(
        id: &str,
        version: &str,
        parent_versions: Vec<String>,
        user_id: &str,
        content: serde_json::Value,
    ) -> EntityVersion {
        EntityVersion {
            id: id.to_string(),
            version: version.to_string(),
            entity_type: EntityType::Device,
            name: "Test Entity".to_string(),
            content,
            source_type: SourceType::Manual,
            user_id: user_id.to_string(),
            parent_versions,
            created_at: chrono::Utc::now(),
        }
    }
}
