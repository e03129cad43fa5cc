//! # Reconciliation
//!
//! Merges edits the user made while a request was in flight onto the fresh
//! item the server returned.
//!
//! ## Flow
//! ```text
//!   snapshot ──────── diff ────────► current        (edits made while waiting)
//!                       │
//!                       ▼
//!   fresh (server) ── apply ──► reconciled
//!                       ▲
//!   keyed fields ───────┘  merged by key identity instead of by index
//! ```
//!
//! Positional patches are wrong for collections the server also appends to
//! (history logs, tagged records): an index taken against the snapshot can
//! point at a different entry in the fresh item. Fields listed in the
//! [`MergePolicy`] are merged by a key field instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{apply_one, diff};
use crate::error::PatchError;
use crate::types::ItemType;

/// Wildcard entry in a [`MergePolicy`] that applies to every type.
pub const ANY_TYPE: &str = "*";

/// A top-level array field whose entries are identified by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedField {
    pub field: String,
    pub key: String,
}

/// Per-type table of keyed collection fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergePolicy {
    #[serde(default)]
    pub keyed: BTreeMap<String, Vec<KeyedField>>,
}

impl MergePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `field` of `item_type` (or `"*"`) as merged by `key`.
    pub fn keyed(mut self, item_type: &str, field: &str, key: &str) -> Self {
        self.keyed
            .entry(item_type.to_string())
            .or_default()
            .push(KeyedField {
                field: field.to_string(),
                key: key.to_string(),
            });
        self
    }

    /// Keyed fields for a type, type-specific entries first.
    pub fn fields_for(&self, item_type: &ItemType) -> Vec<&KeyedField> {
        let specific = self.keyed.get(item_type.as_str()).into_iter().flatten();
        let wildcard = self.keyed.get(ANY_TYPE).into_iter().flatten();
        let mut seen = BTreeSet::new();
        specific
            .chain(wildcard)
            .filter(|kf| seen.insert(kf.field.as_str()))
            .collect()
    }
}

/// Replay `snapshot -> current` edits onto `fresh`.
///
/// With no edits the fresh item is returned unchanged.
pub fn reconcile(
    item_type: &ItemType,
    snapshot: &Value,
    current: &Value,
    fresh: &Value,
    policy: &MergePolicy,
) -> Result<Value, PatchError> {
    let edits = diff(snapshot, current);
    if edits.is_empty() {
        return Ok(fresh.clone());
    }

    let keyed = policy.fields_for(item_type);
    let mut out = fresh.clone();
    let mut touched: Vec<&KeyedField> = Vec::new();

    for op in &edits {
        let segments = op.segments()?;
        let field = segments.first().map(String::as_str);
        match keyed.iter().find(|kf| Some(kf.field.as_str()) == field) {
            Some(kf) => {
                if !touched.iter().any(|t| t.field == kf.field) {
                    touched.push(*kf);
                }
            }
            None => apply_one(&mut out, op)?,
        }
    }

    for kf in touched {
        merge_keyed(&mut out, kf, snapshot.get(&kf.field), current.get(&kf.field))?;
    }
    Ok(out)
}

fn entries(value: Option<&Value>, field: &str) -> Result<Vec<Value>, PatchError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(PatchError::TypeMismatch {
            path: format!("/{field}"),
            expected: "array".into(),
        }),
    }
}

fn merge_keyed(
    out: &mut Value,
    kf: &KeyedField,
    snapshot: Option<&Value>,
    current: Option<&Value>,
) -> Result<(), PatchError> {
    let key_of = |entry: &Value| entry.get(&kf.key).cloned();

    let before = entries(snapshot, &kf.field)?;
    let after = entries(current, &kf.field)?;

    let removed: Vec<Value> = before
        .iter()
        .filter_map(key_of)
        .filter(|k| !after.iter().any(|e| key_of(e).as_ref() == Some(k)))
        .collect();
    let upserts: Vec<&Value> = after
        .iter()
        .filter(|entry| !before.contains(entry))
        .collect();

    let Some(map) = out.as_object_mut() else {
        return Err(PatchError::NotAContainer(String::new()));
    };
    let mut target = entries(map.get(&kf.field), &kf.field)?;

    target.retain(|e| key_of(e).map_or(true, |k| !removed.contains(&k)));
    for entry in upserts {
        let existing = key_of(entry)
            .and_then(|k| target.iter().position(|e| key_of(e).as_ref() == Some(&k)));
        match existing {
            Some(pos) => target[pos] = entry.clone(),
            None if !target.contains(entry) => target.push(entry.clone()),
            None => {}
        }
    }

    map.insert(kf.field.clone(), Value::Array(target));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_edits_returns_fresh() {
        let snap = json!({"id": "x7", "name": "a"});
        let fresh = json!({"id": "x7", "name": "a", "updated": "now"});
        let out = reconcile(&ItemType::Advert, &snap, &snap, &fresh, &MergePolicy::new()).unwrap();
        assert_eq!(out, fresh);
    }

    #[test]
    fn test_edits_during_flight_survive() {
        let snap = json!({"id": "x7", "name": "a", "blurb": "old"});
        let current = json!({"id": "x7", "name": "a", "blurb": "typed while saving"});
        let fresh = json!({"id": "x7", "name": "a", "blurb": "old", "lastModified": 42});
        let out = reconcile(&ItemType::Advert, &snap, &current, &fresh, &MergePolicy::new()).unwrap();
        assert_eq!(
            out,
            json!({"id": "x7", "name": "a", "blurb": "typed while saving", "lastModified": 42})
        );
    }

    #[test]
    fn test_keyed_merge_survives_server_prepend() {
        let policy = MergePolicy::new().keyed("Advert", "history", "id");
        let snap = json!({"history": [{"id": 1, "n": "a"}, {"id": 2, "n": "b"}]});
        // user deleted entry 1 and renamed entry 2 while the save ran
        let current = json!({"history": [{"id": 2, "n": "B"}]});
        // server prepended entry 0
        let fresh = json!({"history": [{"id": 0, "n": "z"}, {"id": 1, "n": "a"}, {"id": 2, "n": "b"}]});

        let out = reconcile(&ItemType::Advert, &snap, &current, &fresh, &policy).unwrap();
        assert_eq!(out, json!({"history": [{"id": 0, "n": "z"}, {"id": 2, "n": "B"}]}));
    }

    #[test]
    fn test_keyed_merge_appends_new_entries() {
        let policy = MergePolicy::new().keyed("*", "notes", "key");
        let snap = json!({"notes": []});
        let current = json!({"notes": [{"key": "k2", "text": "mine"}]});
        let fresh = json!({"notes": [{"key": "k1", "text": "theirs"}]});
        let out = reconcile(&ItemType::Campaign, &snap, &current, &fresh, &policy).unwrap();
        assert_eq!(
            out["notes"],
            json!([{"key": "k1", "text": "theirs"}, {"key": "k2", "text": "mine"}])
        );
    }

    #[test]
    fn test_keyed_field_of_wrong_shape_is_conflict() {
        let policy = MergePolicy::new().keyed("Advert", "history", "id");
        let snap = json!({"history": []});
        let current = json!({"history": [{"id": 1}]});
        let fresh = json!({"history": "corrupt"});
        let err = reconcile(&ItemType::Advert, &snap, &current, &fresh, &policy).unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));
    }

    #[test]
    fn test_positional_conflict_is_reported() {
        let snap = json!({"list": [1, 2, 3]});
        let current = json!({"list": [1, 2, 9]});
        let fresh = json!({"list": [1]});
        let err = reconcile(&ItemType::Advert, &snap, &current, &fresh, &MergePolicy::new())
            .unwrap_err();
        assert!(matches!(err, PatchError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn test_fields_for_prefers_specific_entries() {
        let policy = MergePolicy::new()
            .keyed("*", "history", "ts")
            .keyed("Advert", "history", "id")
            .keyed("*", "notes", "key");
        let fields = policy.fields_for(&ItemType::Advert);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "id");
        assert_eq!(policy.fields_for(&ItemType::Person)[0].key, "ts");
    }
}
