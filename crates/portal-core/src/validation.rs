//! # Validation Module
//!
//! Client-side checks the sync engine runs before it touches the network.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI collaborators                                             │
//! │  └── Field-level feedback while typing                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: SyncEngine::run                                              │
//! │  └── THIS MODULE: ids, types and statuses are addressable              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Server                                                       │
//! │  └── Business rules (not the client's job)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use portal_core::validation::{validate_item_id, validate_item_status};
//! use portal_core::Status;
//!
//! assert!(validate_item_id("x7").is_ok());
//! assert!(validate_item_status(Status::PubOrDraft).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::{ItemType, Status};
use crate::MAX_ID_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an item id.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most [`MAX_ID_LENGTH`] characters
/// - No `/` (ids become URL path segments)
pub fn validate_item_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    if id.chars().count() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max: MAX_ID_LENGTH,
        });
    }

    if id.contains('/') {
        return Err(ValidationError::InvalidFormat {
            field: "id".to_string(),
            reason: "must not contain '/'".to_string(),
        });
    }

    Ok(())
}

/// Validates a type name for use in paths and endpoints.
pub fn validate_type_name(item_type: &ItemType) -> ValidationResult<()> {
    let name = item_type.as_str();

    if name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "@type".to_string(),
        });
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: "@type".to_string(),
            reason: "must contain only letters, digits and underscores".to_string(),
        });
    }

    Ok(())
}

/// Composite statuses are query filters, never an item's stored status.
pub fn validate_item_status(status: Status) -> ValidationResult<()> {
    if status.is_query_only() {
        return Err(ValidationError::NotAllowed {
            field: "status".to_string(),
            value: status.to_string(),
        });
    }
    Ok(())
}
