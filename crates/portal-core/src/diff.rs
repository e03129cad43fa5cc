//! # Structural Diff / Patch
//!
//! An ordered list of `{op, path, value?}` operations between two JSON
//! trees, with JSON-pointer paths (`/fields/0/name`, `~0` for `~`, `~1`
//! for `/`).
//!
//! ## Semantics
//! ```text
//! objects  compared key by key
//! arrays   positional: common prefix diffed, extra tail added in order,
//!          surplus tail removed from the back
//! scalars  replaced when unequal
//! ```
//!
//! [`apply`] is lenient where an edit can land on a tree that has moved on
//! (replace on a missing object key inserts it, removing a missing key is a
//! no-op) and strict on arrays, where a bad index means the tree no longer
//! has the shape the diff was taken against.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::PatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    /// JSON pointer into the target tree.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Remove,
            path: path.into(),
            value: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    /// Unescaped pointer segments.
    pub fn segments(&self) -> Result<Vec<String>, PatchError> {
        parse_pointer(&self.path)
    }
}

/// Build a pointer from raw segments.
pub fn pointer<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| format!("/{}", escape(s.as_ref())))
        .collect()
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::MalformedPointer(path.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect())
}

// =============================================================================
// Diff
// =============================================================================

/// Operations turning `from` into `to`.
pub fn diff(from: &Value, to: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_into(from, to, String::new(), &mut ops);
    ops
}

fn diff_into(from: &Value, to: &Value, path: String, ops: &mut Vec<PatchOp>) {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, av) in a {
                let child = format!("{path}/{}", escape(key));
                match b.get(key) {
                    Some(bv) => diff_into(av, bv, child, ops),
                    None => ops.push(PatchOp::remove(child)),
                }
            }
            for (key, bv) in b {
                if !a.contains_key(key) {
                    ops.push(PatchOp::add(format!("{path}/{}", escape(key)), bv.clone()));
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_into(&a[i], &b[i], format!("{path}/{i}"), ops);
            }
            for (i, bv) in b.iter().enumerate().skip(common) {
                ops.push(PatchOp::add(format!("{path}/{i}"), bv.clone()));
            }
            for i in (common..a.len()).rev() {
                ops.push(PatchOp::remove(format!("{path}/{i}")));
            }
        }
        (a, b) if a == b => {}
        (_, b) => ops.push(PatchOp::replace(path, b.clone())),
    }
}

// =============================================================================
// Apply
// =============================================================================

/// Apply `ops` to `doc` in order. Stops at the first failing operation.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

pub fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let segments = op.segments()?;
    let value = || {
        op.value
            .clone()
            .ok_or_else(|| PatchError::MissingValue(op.path.clone()))
    };

    let Some((last, parents)) = segments.split_last() else {
        *doc = match op.op {
            PatchOpKind::Remove => Value::Null,
            PatchOpKind::Add | PatchOpKind::Replace => value()?,
        };
        return Ok(());
    };

    let mut node = doc;
    for segment in parents {
        node = match node {
            Value::Object(map) => map
                .get_mut(segment)
                .ok_or_else(|| PatchError::PathNotFound(op.path.clone()))?,
            Value::Array(items) => {
                let len = items.len();
                let index = parse_index(segment, &op.path)?;
                items.get_mut(index).ok_or_else(|| PatchError::IndexOutOfBounds {
                    path: op.path.clone(),
                    index,
                    len,
                })?
            }
            _ => return Err(PatchError::NotAContainer(op.path.clone())),
        };
    }

    match node {
        Value::Object(map) => {
            match op.op {
                PatchOpKind::Add | PatchOpKind::Replace => {
                    map.insert(last.clone(), value()?);
                }
                PatchOpKind::Remove => {
                    map.remove(last);
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            let len = items.len();
            if op.op == PatchOpKind::Add && last == "-" {
                items.push(value()?);
                return Ok(());
            }
            let index = parse_index(last, &op.path)?;
            let out_of_bounds = || PatchError::IndexOutOfBounds {
                path: op.path.clone(),
                index,
                len,
            };
            match op.op {
                PatchOpKind::Add if index <= len => items.insert(index, value()?),
                PatchOpKind::Replace if index < len => items[index] = value()?,
                PatchOpKind::Remove if index < len => {
                    items.remove(index);
                }
                _ => return Err(out_of_bounds()),
            }
            Ok(())
        }
        _ => Err(PatchError::NotAContainer(op.path.clone())),
    }
}

fn parse_index(segment: &str, path: &str) -> Result<usize, PatchError> {
    segment
        .parse()
        .map_err(|_| PatchError::PathNotFound(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_then_apply_reaches_target() {
        let from = json!({
            "name": "Old",
            "tags": ["a", "b", "c"],
            "meta": {"x": 1, "drop": true},
            "links": [{"url": "u1"}]
        });
        let to = json!({
            "name": "New",
            "tags": ["a", "z"],
            "meta": {"x": 1, "y": 2},
            "links": [{"url": "u1"}, {"url": "u2"}]
        });
        let ops = diff(&from, &to);
        let mut doc = from.clone();
        apply(&mut doc, &ops).unwrap();
        assert_eq!(doc, to);
    }

    #[test]
    fn test_diff_of_equal_trees_is_empty() {
        let v = json!({"a": [1, {"b": null}]});
        assert!(diff(&v, &v).is_empty());
    }

    #[test]
    fn test_diff_shapes() {
        let ops = diff(&json!({"a": 1}), &json!({"a": 2, "b/c": 3}));
        assert_eq!(
            ops,
            vec![
                PatchOp::replace("/a", json!(2)),
                PatchOp::add("/b~1c", json!(3)),
            ]
        );

        let ops = diff(&json!([1, 2, 3]), &json!([1]));
        assert_eq!(ops, vec![PatchOp::remove("/2"), PatchOp::remove("/1")]);
    }

    #[test]
    fn test_apply_is_lenient_on_objects() {
        let mut doc = json!({"a": 1});
        apply(&mut doc, &[PatchOp::replace("/b", json!(2)), PatchOp::remove("/zz")]).unwrap();
        assert_eq!(doc, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_apply_is_strict_on_arrays() {
        let mut doc = json!({"list": [1]});
        let err = apply_one(&mut doc, &PatchOp::replace("/list/3", json!(0))).unwrap_err();
        assert_eq!(
            err,
            PatchError::IndexOutOfBounds {
                path: "/list/3".into(),
                index: 3,
                len: 1
            }
        );
        apply_one(&mut doc, &PatchOp::add("/list/-", json!(2))).unwrap();
        assert_eq!(doc, json!({"list": [1, 2]}));
    }

    #[test]
    fn test_apply_errors() {
        let mut doc = json!({"a": 1});
        assert_eq!(
            apply_one(&mut doc, &PatchOp::add("a", json!(1))),
            Err(PatchError::MalformedPointer("a".into()))
        );
        assert_eq!(
            apply_one(&mut doc, &PatchOp::add("/missing/x", json!(1))),
            Err(PatchError::PathNotFound("/missing/x".into()))
        );
        assert_eq!(
            apply_one(&mut doc, &PatchOp::add("/a/x", json!(1))),
            Err(PatchError::NotAContainer("/a/x".into()))
        );
        let no_value = PatchOp {
            op: PatchOpKind::Replace,
            path: "/a".into(),
            value: None,
        };
        assert_eq!(
            apply_one(&mut doc, &no_value),
            Err(PatchError::MissingValue("/a".into()))
        );
    }

    #[test]
    fn test_root_pointer_replaces_document() {
        let mut doc = json!({"a": 1});
        apply_one(&mut doc, &PatchOp::replace("", json!([1]))).unwrap();
        assert_eq!(doc, json!([1]));
    }

    #[test]
    fn test_pointer_escaping() {
        assert_eq!(pointer(&["a/b", "c~d"]), "/a~1b/c~0d");
        let op = PatchOp::remove("/a~1b/c~0d");
        assert_eq!(op.segments().unwrap(), vec!["a/b", "c~d"]);
    }
}
