//! # Result Pages
//!
//! A [`ResultPage`] is one cursor-paginated batch of item references as the
//! server returns it, plus the cursors already merged into it.
//!
//! ## Merge Flow
//! ```text
//! page {hits:[a,b], next:"c2", consumedCursors:[]}
//!   │
//!   │ extend(batch {hits:[c,d], after:"c2", next:"c4"})
//!   ▼
//! page {hits:[a,b,c,d], next:"c4", consumedCursors:["c2"]}
//!   │
//!   │ extend(same batch again)        ← duplicate delivery
//!   ▼
//! unchanged (cursor "c2" already consumed)
//! ```
//!
//! The store keeps pages as plain JSON inside its data tree, so the
//! recursive helpers at the bottom of this file work on `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::query::{set_prop_or, QueryExpr};
use crate::types::{Item, ItemType, Status};

// =============================================================================
// Item Reference
// =============================================================================

/// One hit in a result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Whatever summary fields the server included.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemRef {
    pub fn new(item_type: ItemType, id: impl Into<String>) -> Self {
        Self {
            item_type: Some(item_type),
            id: id.into(),
            status: None,
            extra: Map::new(),
        }
    }

    pub fn from_item(item: &Item) -> Self {
        Self {
            item_type: Some(item.item_type.clone()),
            id: item.id.clone(),
            status: item.status,
            extra: item.fields.clone(),
        }
    }

    fn matches(&self, item_type: Option<&ItemType>, id: &str) -> bool {
        self.id == id
            && match (item_type, &self.item_type) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            }
    }
}

// =============================================================================
// Result Page
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
    #[serde(default)]
    pub hits: Vec<ItemRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Server's estimate when `total` is sampled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<u64>,

    /// Cursor for the next batch, if there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Cursor this batch was fetched with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    #[serde(default)]
    pub consumed_cursors: Vec<String>,
}

impl ResultPage {
    pub fn new(hits: Vec<ItemRef>) -> Self {
        let total = Some(hits.len() as u64);
        Self {
            hits,
            total,
            ..Default::default()
        }
    }

    /// Insert a reference at `index` (clamped), or at the end.
    pub fn add(&mut self, item: ItemRef, index: Option<usize>) {
        match index {
            Some(i) => {
                let i = i.min(self.hits.len());
                self.hits.insert(i, item);
            }
            None => self.hits.push(item),
        }
        if let Some(total) = self.total.as_mut() {
            *total += 1;
        }
    }

    /// Remove the hit with this id. Returns false when it was not present.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.hits.iter().position(|hit| hit.id == id) {
            Some(pos) => {
                self.hits.remove(pos);
                if let Some(total) = self.total.as_mut() {
                    *total = total.saturating_sub(1);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.hits.iter().any(|hit| hit.id == id)
    }

    /// Append a continuation batch.
    ///
    /// Returns false, leaving the page untouched, when the batch's `after`
    /// cursor was already merged.
    pub fn extend(&mut self, more: ResultPage) -> bool {
        if let Some(after) = &more.after {
            if self.consumed_cursors.contains(after) {
                return false;
            }
            self.consumed_cursors.push(after.clone());
        }
        self.hits.extend(more.hits);
        self.next = more.next;

        // servers under-report total when sampling
        let count = self.hits.len() as u64;
        if self.total.is_some_and(|t| count > t) {
            self.total = Some(count);
        }
        if self.estimate.is_some_and(|e| count > e) {
            self.estimate = Some(count);
        }
        true
    }

    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        if !is_page(&value) {
            return Err(CoreError::InvalidPage {
                reason: "missing hits array".into(),
            });
        }
        serde_json::from_value(value).map_err(|e| CoreError::InvalidPage {
            reason: e.to_string(),
        })
    }

    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::InvalidPage {
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// List Parameters
// =============================================================================

/// Everything that identifies one list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    pub item_type: ItemType,
    pub status: Status,
    pub query: Option<QueryExpr>,
    /// Restrict to these ids (folded into the query as `id:a OR id:b`).
    pub ids: Vec<String>,
    pub sort: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub domain: Option<String>,
}

impl ListParams {
    pub fn new(item_type: ItemType, status: Status) -> Self {
        Self {
            item_type,
            status,
            query: None,
            ids: Vec::new(),
            sort: None,
            start: None,
            end: None,
            domain: None,
        }
    }

    pub fn query(mut self, query: QueryExpr) -> Self {
        self.query = Some(query);
        self
    }

    pub fn ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn range(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// The query actually sent: `query` with the id restriction merged in.
    pub fn effective_query(&self) -> Option<QueryExpr> {
        if self.ids.is_empty() {
            return self.query.clone().filter(|q| !q.is_empty());
        }
        Some(set_prop_or(self.query.as_ref(), "id", &self.ids))
    }
}

// =============================================================================
// Tree Helpers
// =============================================================================

/// Does this JSON value look like a result page (an object with a `hits` array)?
pub fn is_page(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|map| map.get("hits"))
        .is_some_and(Value::is_array)
}

/// Visit every result page inside `tree`, passing its key path relative to `tree`.
///
/// Pages are not descended into.
pub fn for_each_page_mut<F>(tree: &mut Value, f: &mut F)
where
    F: FnMut(&[String], &mut Value),
{
    fn walk<F>(node: &mut Value, keys: &mut Vec<String>, f: &mut F)
    where
        F: FnMut(&[String], &mut Value),
    {
        if is_page(node) {
            f(keys, node);
            return;
        }
        match node {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    keys.push(key.clone());
                    walk(child, keys, f);
                    keys.pop();
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter_mut().enumerate() {
                    keys.push(i.to_string());
                    walk(child, keys, f);
                    keys.pop();
                }
            }
            _ => {}
        }
    }

    let mut keys = Vec::new();
    walk(tree, &mut keys, f);
}

/// Remove an item from every result page reachable inside `tree`.
///
/// Returns how many hits were removed in total. A `None` type matches any
/// hit with the id.
pub fn prune_item(tree: &mut Value, item_type: Option<&ItemType>, id: &str) -> usize {
    let mut removed = 0;
    for_each_page_mut(tree, &mut |_, page| {
        let Some(map) = page.as_object_mut() else {
            return;
        };
        let mut dropped = 0u64;
        if let Some(Value::Array(hits)) = map.get_mut("hits") {
            hits.retain(|hit| {
                let doomed = serde_json::from_value::<ItemRef>(hit.clone())
                    .map(|r| r.matches(item_type, id))
                    .unwrap_or(false);
                if doomed {
                    dropped += 1;
                }
                !doomed
            });
        }
        let total = map.get("total").and_then(Value::as_u64);
        if let (true, Some(total)) = (dropped > 0, total) {
            map.insert("total".into(), Value::from(total.saturating_sub(dropped)));
        }
        removed += dropped as usize;
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(ids: &[&str]) -> ResultPage {
        ResultPage::new(
            ids.iter()
                .map(|id| ItemRef::new(ItemType::Advert, *id))
                .collect(),
        )
    }

    fn ids(page: &ResultPage) -> Vec<&str> {
        page.hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn test_add_and_remove() {
        let mut p = page(&["a", "b"]);
        p.add(ItemRef::new(ItemType::Advert, "z"), Some(0));
        assert_eq!(ids(&p), vec!["z", "a", "b"]);
        assert_eq!(p.total, Some(3));

        p.add(ItemRef::new(ItemType::Advert, "y"), Some(99));
        assert_eq!(ids(&p), vec!["z", "a", "b", "y"]);

        assert!(p.remove("a"));
        assert!(!p.remove("missing"));
        assert_eq!(p.total, Some(3));
    }

    #[test]
    fn test_extend_is_idempotent_per_cursor() {
        let mut p = page(&["a", "b"]);
        p.next = Some("c2".into());

        let mut batch = page(&["c", "d"]);
        batch.after = Some("c2".into());
        batch.next = Some("c4".into());

        assert!(p.extend(batch.clone()));
        assert_eq!(ids(&p), vec!["a", "b", "c", "d"]);
        assert_eq!(p.next.as_deref(), Some("c4"));
        assert_eq!(p.consumed_cursors, vec!["c2".to_string()]);

        assert!(!p.extend(batch));
        assert_eq!(ids(&p), vec!["a", "b", "c", "d"]);
        assert_eq!(p.consumed_cursors.len(), 1);
    }

    #[test]
    fn test_extend_raises_under_reported_total() {
        let mut p = page(&["a"]);
        p.total = Some(1);
        p.estimate = Some(1);
        let mut batch = page(&["b", "c"]);
        batch.after = Some("x".into());
        p.extend(batch);
        assert_eq!(p.total, Some(3));
        assert_eq!(p.estimate, Some(3));
    }

    #[test]
    fn test_page_wire_format() {
        let value = json!({
            "hits": [{"@type": "Advert", "id": "x7", "vertiser": "acme"}],
            "total": 1,
            "consumedCursors": ["c1"]
        });
        let p = ResultPage::from_value(value.clone()).unwrap();
        assert_eq!(p.hits[0].extra.get("vertiser"), Some(&json!("acme")));
        assert_eq!(p.to_value().unwrap(), value);
        assert!(ResultPage::from_value(json!({"total": 3})).is_err());
    }

    #[test]
    fn test_prune_reaches_every_nested_page() {
        let mut tree = json!({
            "Advert": {
                "PUBLISHED": {"all": {"hits": [{"id": "x7"}, {"id": "k1"}], "total": 2}},
                "DRAFT": {"all": {"hits": [{"id": "x7"}], "total": 1}},
                "PUB_OR_DRAFT": {"vertiser:acme": {"hits": [{"@type": "Advert", "id": "x7"}]}}
            },
            "other": {"hits": [{"id": "k2"}]},
            "scalar": 4
        });
        let removed = prune_item(&mut tree, Some(&ItemType::Advert), "x7");
        assert_eq!(removed, 3);
        assert_eq!(tree["Advert"]["PUBLISHED"]["all"]["hits"], json!([{"id": "k1"}]));
        assert_eq!(tree["Advert"]["PUBLISHED"]["all"]["total"], json!(1));
        assert_eq!(tree["Advert"]["DRAFT"]["all"]["total"], json!(0));
        assert_eq!(tree["other"]["hits"], json!([{"id": "k2"}]));
    }

    #[test]
    fn test_prune_respects_type() {
        let mut tree = json!({"hits": [{"@type": "Campaign", "id": "x7"}]});
        assert_eq!(prune_item(&mut tree, Some(&ItemType::Advert), "x7"), 0);
        assert_eq!(prune_item(&mut tree, None, "x7"), 1);
    }

    #[test]
    fn test_for_each_page_reports_keys() {
        let mut tree = json!({"a": {"b": {"hits": []}}, "c": [{"hits": []}]});
        let mut seen = Vec::new();
        for_each_page_mut(&mut tree, &mut |keys, _| seen.push(keys.join("/")));
        seen.sort();
        assert_eq!(seen, vec!["a/b", "c/0"]);
    }

    #[test]
    fn test_effective_query_folds_ids() {
        let params = ListParams::new(ItemType::Advert, Status::Published).ids(["a", "b"]);
        let q = params.effective_query().unwrap();
        assert_eq!(q.values("id"), vec!["a", "b"]);
        assert!(ListParams::new(ItemType::Advert, Status::Draft)
            .effective_query()
            .is_none());
    }
}
