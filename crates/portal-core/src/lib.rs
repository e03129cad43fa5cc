//! # portal-core: Pure Data Logic for the Portal Data Core
//!
//! This crate holds everything about portal items that can be decided
//! without touching the network, a database or a clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Portal Data Core Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 UI collaborators (forms, lists)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Store / SyncEngine                     │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 portal-sync (Cell, Store, Engine)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ portal-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  types   │ │  query   │ │   page   │ │ diff / reconcile │  │   │
//! │  │   │ Status   │ │ QueryExpr│ │ResultPage│ │ PatchOp          │  │   │
//! │  │   │ Action   │ │ set_prop │ │ extend   │ │ MergePolicy      │  │   │
//! │  │   │ Item     │ │ and / or │ │ prune    │ │                  │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Status, Action, LocalStatus, ItemType and the Item envelope
//! - [`path`] - Deterministic cache paths for items and lists
//! - [`query`] - The `field:value AND/OR` query expression language
//! - [`page`] - Cursor-paginated result pages and recursive pruning
//! - [`diff`] - Structural diff and patch application
//! - [`reconcile`] - Merging in-flight edits onto fresh server items
//! - [`validation`] - Client-side checks run before anything is sent
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use portal_core::{Action, Status};
//! use portal_core::query::set_prop_or;
//!
//! assert_eq!(Action::Publish.start_status(), Status::Draft);
//! assert_eq!(Action::Publish.server_status(), Status::Published);
//!
//! let q = set_prop_or(None, "vert", &["a", "b c"]);
//! assert_eq!(q.to_string(), "vert:a OR vert:\"b c\"");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod diff;
pub mod error;
pub mod page;
pub mod path;
pub mod query;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use diff::{PatchOp, PatchOpKind};
pub use error::{CoreError, CoreResult, PatchError, QueryError, ValidationError};
pub use page::{ItemRef, ListParams, ResultPage};
pub use path::{ItemKey, Path};
pub use query::QueryExpr;
pub use reconcile::{KeyedField, MergePolicy};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Placeholder id carried by an item that the server has not assigned an id to yet.
///
/// A successful `new`/`save` of such an item adopts the server id as the
/// current focus.
pub const NEW_ID: &str = "new";

/// Domain segment used in list paths when no domain is set.
pub const NO_DOMAIN: &str = "nodomain";

/// Maximum length of an item id accepted by validation.
pub const MAX_ID_LENGTH: usize = 200;
