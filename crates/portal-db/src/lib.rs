//! # portal-db: Durable Local Item Cache
//!
//! SQLite storage for the last known copy of items, addressed by the JSON
//! form of their cache path.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Portal Data Core Data Flow                          │
//! │                                                                         │
//! │  SyncEngine::run(get, PUBLISHED)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LocalStore::load(path)  (portal-sync trait, implemented for Database) │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    portal-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────────┐  ┌─────────────┐  │   │
//! │  │   │   Database    │    │   Repositories    │  │ Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ LocalItemRepo     │  │ (embedded)  │  │   │
//! │  │   └───────────────┘    └───────────────────┘  └─────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file  (local_items: key → JSON payload)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portal_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("portal.db")).await?;
//! db.local_items().save(&path, &item_json).await?;
//! let cached = db.local_items().load(&path).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::local_item::{LocalItemRecord, LocalItemRepository};
