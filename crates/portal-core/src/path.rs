//! # Cache Paths
//!
//! A [`Path`] addresses exactly one slot of the store's data tree. Paths are
//! derived deterministically so that two requests for the same logical item
//! or list meet at the same slot, which is what makes fetch deduplication
//! work.
//!
//! ## Layout
//! ```text
//! data      / STATUS / Type / domain / id            one item copy
//! list      / Type / STATUS / domain / query / sort / range
//! transient / localStatus / Type / id                clean|dirty|saving|saveerror
//! transient / error / Type / id / action             display-safe message
//! transient / more / <list segments> / cursor        one continuation batch
//! focus     / Type                                   id being edited
//! location  / params / ...                           mirrored to the URL
//! misc      / messages / <uuid>                      user notifications
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::page::ListParams;
use crate::types::{Action, ItemType, Status};
use crate::NO_DOMAIN;

/// An ordered key sequence into the store's data tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(segments.into_iter().map(Into::into).collect())
    }

    /// The empty path, addressing the whole tree.
    pub fn root() -> Self {
        Path(Vec::new())
    }

    // =========================================================================
    // Derived Paths
    // =========================================================================

    /// `data / STATUS / Type / domain / id`
    ///
    /// The domain sits before the id and is spelled `nodomain` when absent, so
    /// no item copy is ever a prefix of another.
    pub fn item(status: Status, item_type: &ItemType, id: &str, domain: Option<&str>) -> Self {
        Path(vec![
            "data".to_string(),
            status.as_str().to_string(),
            item_type.to_string(),
            domain.unwrap_or(NO_DOMAIN).to_string(),
            id.to_string(),
        ])
    }

    /// `list / Type / STATUS / domain / query / sort / range`
    ///
    /// Missing parts are spelled out (`nodomain`, `all`, `unsorted`,
    /// `whenever`) so the segment count is fixed.
    pub fn list(params: &ListParams) -> Self {
        let mut segments = vec!["list".to_string()];
        segments.extend(Self::list_segments(params));
        Path(segments)
    }

    /// `list / Type`: every cached list of one type.
    pub fn lists_of(item_type: &ItemType) -> Self {
        Path::new(["list".to_string(), item_type.to_string()])
    }

    /// `transient / more / <list segments> / cursor`
    pub fn more(params: &ListParams, cursor: &str) -> Self {
        let mut segments = vec!["transient".to_string(), "more".to_string()];
        segments.extend(Self::list_segments(params));
        segments.push(cursor.to_string());
        Path(segments)
    }

    pub fn local_status(item_type: &ItemType, id: &str) -> Self {
        Path::new([
            "transient".to_string(),
            "localStatus".to_string(),
            item_type.to_string(),
            id.to_string(),
        ])
    }

    pub fn error(item_type: &ItemType, id: &str, action: Action) -> Self {
        Path::new([
            "transient".to_string(),
            "error".to_string(),
            item_type.to_string(),
            id.to_string(),
            action.as_str().to_string(),
        ])
    }

    pub fn focus(item_type: &ItemType) -> Self {
        Path::new(["focus".to_string(), item_type.to_string()])
    }

    pub fn location_params() -> Self {
        Path::new(["location", "params"])
    }

    pub fn messages() -> Self {
        Path::new(["misc", "messages"])
    }

    fn list_segments(params: &ListParams) -> Vec<String> {
        let query = params
            .effective_query()
            .map(|q| q.to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| "all".to_string());
        let range = match (&params.start, &params.end) {
            (None, None) => "whenever".to_string(),
            (start, end) => format!(
                "{}-{}",
                start.as_deref().unwrap_or(""),
                end.as_deref().unwrap_or("")
            ),
        };
        vec![
            params.item_type.to_string(),
            params.status.as_str().to_string(),
            params.domain.clone().unwrap_or_else(|| NO_DOMAIN.to_string()),
            query,
            params.sort.clone().unwrap_or_else(|| "unsorted".to_string()),
            range,
        ]
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Either path is a prefix of the other (the subtrees overlap).
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    pub fn is_location_param(&self) -> bool {
        self.starts_with(&Path::location_params())
    }

    /// Key used by durable local storage: the JSON array form of the path.
    ///
    /// ```rust
    /// use portal_core::Path;
    ///
    /// assert_eq!(Path::new(["data", "DRAFT"]).storage_key(), r#"["data","DRAFT"]"#);
    /// ```
    pub fn storage_key(&self) -> String {
        Value::Array(self.0.iter().cloned().map(Value::String).collect()).to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

// =============================================================================
// Item Key
// =============================================================================

/// Identifies one status copy of one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub item_type: ItemType,
    pub id: String,
    pub status: Status,
    pub domain: Option<String>,
}

impl ItemKey {
    pub fn new(item_type: ItemType, id: impl Into<String>, status: Status) -> Self {
        Self {
            item_type,
            id: id.into(),
            status,
            domain: None,
        }
    }

    pub fn domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn path(&self) -> Path {
        Path::item(self.status, &self.item_type, &self.id, self.domain.as_deref())
    }
}
