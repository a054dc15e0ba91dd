//! Conflict classification and resolution policy (§4.3).
//!
//! Grounded on `original_source/funkygibbon/tests/unit/test_conflict_resolution.py`:
//! ties on timestamp are broken by comparing the writer id lexicographically
//! (`test_identical_timestamps`), and a later timestamp wins even when it
//! arrived from a clock-skewed device (`test_clock_skew_handling`).

use crate::model::{EntityVersion, SourceType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    LastWriteWins,
    Manual,
    FieldMerge,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::LastWriteWins
    }
}

/// Outcome of classifying two sibling versions of the same entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// `descendant` lists `ancestor.version` as a parent; no conflict.
    LinearExtension { descendant: String, ancestor: String },
    /// Neither version descends from the other.
    Concurrent,
}

/// Classifies two sibling versions sharing at least one parent (§4.3 step 1-2).
pub fn classify(a: &EntityVersion, b: &EntityVersion) -> Classification {
    if a.extends(&b.version) {
        return Classification::LinearExtension {
            descendant: a.version.clone(),
            ancestor: b.version.clone(),
        };
    }
    if b.extends(&a.version) {
        return Classification::LinearExtension {
            descendant: b.version.clone(),
            ancestor: a.version.clone(),
        };
    }
    Classification::Concurrent
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResolution {
    pub strategy: ConflictPolicy,
    pub winner_version: Option<String>,
    pub merge_version: EntityVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub entity_id: String,
    pub local_version: String,
    pub remote_version: String,
    /// Wire `error_kind` tag (§6.4): `"Conflict"` for a genuine concurrent
    /// write, or the rejecting error kind (e.g. `"ParentMissing"`) for a
    /// per-entity rejection folded into this same list (§4.4).
    pub kind: String,
    pub resolution: Option<MergeResolution>,
}

/// Picks the winner of two concurrent versions by `(timestamp, user_id)`,
/// lexicographically, larger wins (§4.3 step 3, last_write_wins).
fn last_write_wins_order<'a>(a: &'a EntityVersion, b: &'a EntityVersion) -> (&'a EntityVersion, &'a EntityVersion) {
    let a_key = (EntityVersion::version_timestamp(&a.version), &a.user_id);
    let b_key = (EntityVersion::version_timestamp(&b.version), &b.user_id);
    if a_key >= b_key {
        (a, b)
    } else {
        (b, a)
    }
}

/// Applies the configured policy to two concurrent versions, producing a
/// `ConflictReport`. For `last_write_wins` and `field_merge`, a synthetic
/// merge version is written; for `manual`, no merge version is produced and
/// the caller must surface both leaves.
pub fn resolve(
    policy: ConflictPolicy,
    a: &EntityVersion,
    b: &EntityVersion,
) -> ConflictReport {
    match policy {
        ConflictPolicy::LastWriteWins => {
            let (winner, loser) = last_write_wins_order(a, b);
            let merge = merge_version(winner, loser, winner.content.clone());
            ConflictReport {
                entity_id: winner.id.clone(),
                local_version: a.version.clone(),
                remote_version: b.version.clone(),
                kind: "Conflict".to_string(),
                resolution: Some(MergeResolution {
                    strategy: policy,
                    winner_version: Some(winner.version.clone()),
                    merge_version: merge,
                }),
            }
        }
        ConflictPolicy::FieldMerge => {
            let (newer, older) = last_write_wins_order(a, b);
            let content = field_merge_content(older, newer);
            let merge = merge_version(newer, older, content);
            ConflictReport {
                entity_id: newer.id.clone(),
                local_version: a.version.clone(),
                remote_version: b.version.clone(),
                kind: "Conflict".to_string(),
                resolution: Some(MergeResolution {
                    strategy: policy,
                    winner_version: None,
                    merge_version: merge,
                }),
            }
        }
        ConflictPolicy::Manual => ConflictReport {
            entity_id: a.id.clone(),
            local_version: a.version.clone(),
            remote_version: b.version.clone(),
            kind: "Conflict".to_string(),
            resolution: None,
        },
    }
}

/// Builds the synthetic merge `EntityVersion` whose `parent_versions` covers
/// both leaves (§4.3 step 3).
fn merge_version(primary: &EntityVersion, other: &EntityVersion, content: serde_json::Value) -> EntityVersion {
    let now = chrono::Utc::now();
    let mut parents = vec![primary.version.clone(), other.version.clone()];
    parents.sort();
    EntityVersion {
        id: primary.id.clone(),
        version: EntityVersion::make_version(now, &primary.user_id),
        entity_type: primary.entity_type,
        name: primary.name.clone(),
        content,
        source_type: SourceType::Generated,
        user_id: primary.user_id.clone(),
        parent_versions: parents,
        created_at: now,
    }
}

/// Per-key last-write-wins over `content`, using each version's embedded
/// timestamp as the per-field stamp (§4.3, field_merge).
fn field_merge_content(older: &EntityVersion, newer: &EntityVersion) -> serde_json::Value {
    let mut merged = older.content.clone();
    if let (Some(merged_obj), Some(newer_obj)) = (merged.as_object_mut(), newer.content.as_object()) {
        for (key, value) in newer_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    } else {
        return newer.content.clone();
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests_support::make_version;

    #[test]
    fn linear_extension_detected() {
        let parent = make_version("e1", "v0-alice", vec![], "alice", serde_json::json!({}));
        let child = make_version("e1", "v1-alice", vec!["v0-alice".into()], "alice", serde_json::json!({}));
        assert_eq!(
            classify(&child, &parent),
            Classification::LinearExtension {
                descendant: "v1-alice".into(),
                ancestor: "v0-alice".into()
            }
        );
    }

    #[test]
    fn siblings_are_concurrent() {
        let a = make_version("e1", "v1-alice", vec!["v0".into()], "alice", serde_json::json!({}));
        let b = make_version("e1", "v1-bob", vec!["v0".into()], "bob", serde_json::json!({}));
        assert_eq!(classify(&a, &b), Classification::Concurrent);
    }

    #[test]
    fn last_write_wins_picks_later_timestamp() {
        let t0 = chrono::Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let a = make_version(
            "device-001",
            &EntityVersion::make_version(t0, "alice"),
            vec!["v0".into()],
            "alice",
            serde_json::json!({"state": "on"}),
        );
        let b = make_version(
            "device-001",
            &EntityVersion::make_version(t1, "bob"),
            vec!["v0".into()],
            "bob",
            serde_json::json!({"state": "off"}),
        );

        let report = resolve(ConflictPolicy::LastWriteWins, &a, &b);
        let resolution = report.resolution.unwrap();
        assert_eq!(resolution.winner_version, Some(b.version.clone()));
        assert_eq!(resolution.merge_version.content, serde_json::json!({"state": "off"}));
        assert_eq!(resolution.merge_version.source_type, SourceType::Generated);
        let mut expected_parents = vec![a.version.clone(), b.version.clone()];
        expected_parents.sort();
        assert_eq!(resolution.merge_version.parent_versions, expected_parents);
    }

    #[test]
    fn identical_timestamps_break_tie_on_user_id() {
        let t = chrono::Utc::now();
        let a = make_version(
            "e1",
            &EntityVersion::make_version(t, "device-a"),
            vec!["v0".into()],
            "device-a",
            serde_json::json!({"state": "on"}),
        );
        let b = make_version(
            "e1",
            &EntityVersion::make_version(t, "device-b"),
            vec!["v0".into()],
            "device-b",
            serde_json::json!({"state": "off"}),
        );

        let report = resolve(ConflictPolicy::LastWriteWins, &a, &b);
        assert_eq!(report.resolution.unwrap().winner_version, Some(b.version));
    }

    #[test]
    fn manual_policy_produces_no_merge_version() {
        let a = make_version("e1", "v1-alice", vec!["v0".into()], "alice", serde_json::json!({}));
        let b = make_version("e1", "v1-bob", vec!["v0".into()], "bob", serde_json::json!({}));
        let report = resolve(ConflictPolicy::Manual, &a, &b);
        assert!(report.resolution.is_none());
    }

    #[test]
    fn field_merge_combines_keys_from_both_sides() {
        let t0 = chrono::Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let a = make_version(
            "e1",
            &EntityVersion::make_version(t0, "alice"),
            vec!["v0".into()],
            "alice",
            serde_json::json!({"brightness": 50, "color": "white"}),
        );
        let b = make_version(
            "e1",
            &EntityVersion::make_version(t1, "bob"),
            vec!["v0".into()],
            "bob",
            serde_json::json!({"state": "off"}),
        );

        let report = resolve(ConflictPolicy::FieldMerge, &a, &b);
        let merged = report.resolution.unwrap().merge_version.content;
        assert_eq!(merged["brightness"], 50);
        assert_eq!(merged["color"], "white");
        assert_eq!(merged["state"], "off");
    }
}
