//! # Sync Error Types
//!
//! Error types for store and sync engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Server              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Rejected (success=    │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │    false + messages)    │ │
//! │  │  ConfigLoad/Save│  │  Http / 401     │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Client-side   │  │  Reconcile      │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  Conflict       │  │  LocalStore             │ │
//! │  │  MissingItem    │  │  (patch failed) │  │  Abandoned              │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `SyncError` is `Clone`: a failed fetch is stored inside a shared
//! [`Cell`](crate::cell::Cell) and every holder reads the same failure.

use portal_core::{CoreError, PatchError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all store and engine failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid URL (base URL, endpoint or location).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to reach the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timeout.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Non-success HTTP status other than 401.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The session is no longer valid (HTTP 401).
    #[error("Not authorized: session expired")]
    Unauthorized,

    // =========================================================================
    // Server / Protocol Errors
    // =========================================================================
    /// The server answered `success: false`.
    #[error("Server rejected the request: {}", messages.join("; "))]
    Rejected { messages: Vec<String> },

    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to decode a response.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Client-side Errors
    // =========================================================================
    /// Client-side validation failed before sending.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The action needs an item that is neither supplied nor cached.
    #[error("No {item_type} {id} available to {action}")]
    MissingItem {
        item_type: String,
        id: String,
        action: String,
    },

    /// Local edits could not be replayed onto the server's item.
    #[error("Could not merge local edits: {0}")]
    ReconcileConflict(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Durable local cache failure.
    #[error("Local store error: {0}")]
    LocalStore(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The task producing a value stopped without settling it.
    #[error("Request abandoned before completion")]
    Abandoned,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => SyncError::Validation(e),
            CoreError::Patch(e) => SyncError::from(e),
            CoreError::InvalidItem { .. } | CoreError::InvalidPage { .. } => {
                SyncError::DeserializationFailed(err.to_string())
            }
            other => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<PatchError> for SyncError {
    fn from(err: PatchError) -> Self {
        SyncError::ReconcileConflict(err.to_string())
    }
}

impl From<portal_db::DbError> for SyncError {
    fn from(err: portal_db::DbError) -> Self {
        SyncError::LocalStore(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SyncError::DeserializationFailed(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 401 => SyncError::Unauthorized,
            Some(status) => SyncError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => SyncError::ConnectionFailed(err.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the request may succeed when simply sent again.
    ///
    /// ## Retryable Errors
    /// - Connection failures
    /// - Timeouts
    /// - 5xx responses
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => true,
            SyncError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the session must be re-validated.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Unauthorized)
    }

    /// Returns true if the failure was detected before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_) | SyncError::MissingItem { .. }
        )
    }

    /// Text that is safe to show to the user.
    pub fn display_message(&self) -> String {
        match self {
            SyncError::Unauthorized => {
                "Your session has expired. Please log in again.".to_string()
            }
            SyncError::Rejected { messages } if !messages.is_empty() => messages.join(" "),
            SyncError::Rejected { .. } => "The server rejected the request.".to_string(),
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            SyncError::Http { status, .. } => {
                format!("The server returned an error ({status}).")
            }
            SyncError::Validation(e) => e.to_string(),
            SyncError::MissingItem {
                item_type,
                id,
                action,
            } => format!("Cannot {action} {item_type} {id}: it is not loaded."),
            SyncError::ReconcileConflict(_) => {
                "Your latest edits could not be merged with the saved version.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}
