//! # Domain Types
//!
//! The closed vocabularies of the data core and the item envelope.
//!
//! ## Status / Action Table
//! ```text
//! ┌────────────────┬──────────────────┬──────────────────┐
//! │ Action         │ start status     │ server status    │
//! ├────────────────┼──────────────────┼──────────────────┤
//! │ new            │ DRAFT            │ DRAFT            │
//! │ getornew       │ DRAFT            │ DRAFT            │
//! │ get            │ PUBLISHED        │ PUBLISHED        │
//! │ save           │ DRAFT            │ DRAFT            │
//! │ copy           │ DRAFT            │ DRAFT            │
//! │ publish        │ DRAFT            │ PUBLISHED        │
//! │ unpublish      │ PUBLISHED        │ DRAFT            │
//! │ discardEdits   │ DRAFT            │ DRAFT            │
//! │ delete         │ DRAFT            │ PUBLISHED        │
//! │ archive        │ PUBLISHED        │ ARCHIVED         │
//! │ export         │ PUBLISHED        │ PUBLISHED        │
//! └────────────────┴──────────────────┴──────────────────┘
//! ```
//!
//! The start status picks which cached copy an action reads; the server
//! status picks which copy is sent and which cache slot the response lands in.
//!
//! ## Item Envelope
//! ```text
//! {
//!   "@type": "Advert",        ← ItemType (closed set + Other fallback)
//!   "id": "x7",
//!   "status": "DRAFT",        ← optional, never a composite
//!   "vertiser": "acme", ...   ← free-form domain fields
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Status
// =============================================================================

/// Versioning tag of an item.
///
/// `MODIFIED` is only ever set by the server. The three composites are
/// query filters and never an item's own stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Draft,
    Published,
    Modified,
    RequestPublish,
    Pending,
    Archived,
    Trash,
    AllBarTrash,
    PubOrArc,
    PubOrDraft,
}

impl Status {
    /// Every status, stored and composite.
    pub const ALL: [Status; 10] = [
        Status::Draft,
        Status::Published,
        Status::Modified,
        Status::RequestPublish,
        Status::Pending,
        Status::Archived,
        Status::Trash,
        Status::AllBarTrash,
        Status::PubOrArc,
        Status::PubOrDraft,
    ];

    /// True for the composite filters that are only valid in list queries.
    pub fn is_query_only(self) -> bool {
        matches!(self, Status::AllBarTrash | Status::PubOrArc | Status::PubOrDraft)
    }

    /// Would a list filtered by `self` contain an item stored as `other`?
    ///
    /// ```rust
    /// use portal_core::Status;
    ///
    /// assert!(Status::PubOrDraft.includes(Status::Draft));
    /// assert!(Status::Published.includes(Status::Modified));
    /// assert!(!Status::AllBarTrash.includes(Status::Trash));
    /// ```
    pub fn includes(self, other: Status) -> bool {
        if self == other {
            return true;
        }
        match self {
            Status::Published => other == Status::Modified,
            Status::PubOrArc => matches!(
                other,
                Status::Published | Status::Modified | Status::Archived
            ),
            Status::PubOrDraft => matches!(
                other,
                Status::Published | Status::Modified | Status::Draft
            ),
            Status::AllBarTrash => !other.is_query_only() && other != Status::Trash,
            _ => false,
        }
    }

    /// Wire form, e.g. `"REQUEST_PUBLISH"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "DRAFT",
            Status::Published => "PUBLISHED",
            Status::Modified => "MODIFIED",
            Status::RequestPublish => "REQUEST_PUBLISH",
            Status::Pending => "PENDING",
            Status::Archived => "ARCHIVED",
            Status::Trash => "TRASH",
            Status::AllBarTrash => "ALL_BAR_TRASH",
            Status::PubOrArc => "PUB_OR_ARC",
            Status::PubOrDraft => "PUB_OR_DRAFT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

// =============================================================================
// Action
// =============================================================================

/// A named CRUD-plus-workflow operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum Action {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "getornew")]
    GetOrNew,
    #[serde(rename = "get")]
    Get,
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "copy")]
    Copy,
    #[serde(rename = "publish")]
    Publish,
    #[serde(rename = "unpublish")]
    Unpublish,
    #[serde(rename = "discardEdits")]
    DiscardEdits,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "archive")]
    Archive,
    #[serde(rename = "export")]
    Export,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::New,
        Action::GetOrNew,
        Action::Get,
        Action::Save,
        Action::Copy,
        Action::Publish,
        Action::Unpublish,
        Action::DiscardEdits,
        Action::Delete,
        Action::Archive,
        Action::Export,
    ];

    /// Which cached copy the action reads before calling the server.
    pub fn start_status(self) -> Status {
        match self {
            Action::New
            | Action::GetOrNew
            | Action::Save
            | Action::Copy
            | Action::Publish
            | Action::DiscardEdits
            | Action::Delete => Status::Draft,
            Action::Get | Action::Unpublish | Action::Archive | Action::Export => {
                Status::Published
            }
        }
    }

    /// Which copy is transmitted to, and expected back from, the server.
    pub fn server_status(self) -> Status {
        match self {
            Action::New
            | Action::GetOrNew
            | Action::Save
            | Action::Copy
            | Action::Unpublish
            | Action::DiscardEdits => Status::Draft,
            Action::Get | Action::Publish | Action::Delete | Action::Export => {
                Status::Published
            }
            Action::Archive => Status::Archived,
        }
    }

    /// Read actions that go through the store's fetch deduplication.
    pub fn is_get_class(self) -> bool {
        matches!(self, Action::Get | Action::GetOrNew)
    }

    /// May the engine synthesize a blank stub when nothing is cached?
    pub fn allows_stub(self) -> bool {
        matches!(
            self,
            Action::Delete | Action::Get | Action::New | Action::GetOrNew
        )
    }

    /// Wire form, e.g. `"discardEdits"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::New => "new",
            Action::GetOrNew => "getornew",
            Action::Get => "get",
            Action::Save => "save",
            Action::Copy => "copy",
            Action::Publish => "publish",
            Action::Unpublish => "unpublish",
            Action::DiscardEdits => "discardEdits",
            Action::Delete => "delete",
            Action::Archive => "archive",
            Action::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CoreError::UnknownAction(s.to_string()))
    }
}

// =============================================================================
// Local Status
// =============================================================================

/// Client-only save feedback for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    #[default]
    Clean,
    Dirty,
    Saving,
    SaveError,
}

// =============================================================================
// Item Type
// =============================================================================

/// The `@type` discriminant of an item.
///
/// Known business types get their own variant; anything else the server
/// sends is kept verbatim in [`ItemType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    Advert,
    Advertiser,
    Agency,
    Campaign,
    Ngo,
    Person,
    Other(String),
}

impl ItemType {
    pub fn as_str(&self) -> &str {
        match self {
            ItemType::Advert => "Advert",
            ItemType::Advertiser => "Advertiser",
            ItemType::Agency => "Agency",
            ItemType::Campaign => "Campaign",
            ItemType::Ngo => "NGO",
            ItemType::Person => "Person",
            ItemType::Other(name) => name,
        }
    }

    /// Lowercase form used in endpoint URLs.
    pub fn slug(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl From<String> for ItemType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Advert" => ItemType::Advert,
            "Advertiser" => ItemType::Advertiser,
            "Agency" => ItemType::Agency,
            "Campaign" => ItemType::Campaign,
            "NGO" => ItemType::Ngo,
            "Person" => ItemType::Person,
            _ => ItemType::Other(name),
        }
    }
}

impl From<&str> for ItemType {
    fn from(name: &str) -> Self {
        ItemType::from(name.to_string())
    }
}

impl From<ItemType> for String {
    fn from(item_type: ItemType) -> Self {
        match item_type {
            ItemType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Item
// =============================================================================

/// A cached record: typed envelope around free-form JSON fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "@type")]
    pub item_type: ItemType,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Item {
    pub fn new(item_type: ItemType, id: impl Into<String>) -> Self {
        Self {
            item_type,
            id: id.into(),
            status: None,
            fields: Map::new(),
        }
    }

    /// Minimal transient item used when nothing is cached yet.
    pub fn stub(item_type: ItemType, id: impl Into<String>, status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::new(item_type, id)
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Does the item still carry the placeholder id?
    pub fn is_new(&self) -> bool {
        self.id == crate::NEW_ID
    }

    /// Plain JSON form, as stored in the cache tree.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("@type".into(), Value::String(self.item_type.to_string()));
        map.insert("id".into(), Value::String(self.id.clone()));
        if let Some(status) = self.status {
            map.insert("status".into(), Value::String(status.as_str().into()));
        }
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        if !value.is_object() {
            return Err(CoreError::InvalidItem {
                reason: "not a JSON object".into(),
            });
        }
        serde_json::from_value(value).map_err(|e| CoreError::InvalidItem {
            reason: e.to_string(),
        })
    }

    /// Like [`Item::from_value`], filling in `@type` when the value lacks one.
    pub fn from_value_typed(mut value: Value, item_type: &ItemType) -> Result<Self, CoreError> {
        if let Some(map) = value.as_object_mut() {
            map.entry("@type")
                .or_insert_with(|| Value::String(item_type.to_string()));
        }
        Self::from_value(value)
    }
}
