//! # Error Types
//!
//! Domain-specific error types for portal-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  portal-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  ├── QueryError       - Query expression parse failures                │
//! │  ├── PatchError       - Structural patch application failures          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  portal-db errors (separate crate)                                     │
//! │  └── DbError          - Local cache failures                           │
//! │                                                                         │
//! │  portal-sync errors (separate crate)                                   │
//! │  └── SyncError        - What the UI sees inside a failed Cell          │
//! │                                                                         │
//! │  Flow: PatchError → CoreError → SyncError → stored error message       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All of these are `Clone + PartialEq` so they can be stored inside shared
//! cells and compared in tests.

use thiserror::Error;

/// Result alias for portal-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// General domain errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A status string that is not part of the closed status set.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// An action string that is not part of the closed action set.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A JSON value could not be read as an item.
    ///
    /// ## When This Occurs
    /// - Server cargo without an `id`
    /// - Cargo that is not a JSON object
    #[error("Invalid item: {reason}")]
    InvalidItem { reason: String },

    /// A JSON value could not be read as a result page.
    #[error("Invalid result page: {reason}")]
    InvalidPage { reason: String },

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Query Error
// =============================================================================

/// Failures while parsing a query expression string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// A `(` without a matching `)`, or a stray `)`.
    #[error("Unbalanced bracket at position {position}")]
    UnbalancedBracket { position: usize },

    /// A `"` that is never closed.
    #[error("Unterminated quote starting at position {position}")]
    UnterminatedQuote { position: usize },
}

// =============================================================================
// Patch Error
// =============================================================================

/// Failures while applying a structural patch.
///
/// During reconciliation any of these makes the current save fail with a
/// reconcile conflict. The rest of the store is untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// Pointer does not start with `/` and is not the empty root pointer.
    #[error("Malformed JSON pointer: {0}")]
    MalformedPointer(String),

    /// An intermediate segment of the pointer does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// The parent of the target is a scalar.
    #[error("Not a container at {0}")]
    NotAContainer(String),

    #[error("Index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds { path: String, index: usize, len: usize },

    /// `add`/`replace` without a value.
    #[error("Operation at {0} is missing its value")]
    MissingValue(String),

    /// Keyed merge found something other than an array of objects.
    #[error("Type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: String },
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is sent to the server.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g. a `/` inside an id).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is well-formed but not permitted here.
    #[error("{field} does not allow {value}")]
    NotAllowed { field: String, value: String },
}
