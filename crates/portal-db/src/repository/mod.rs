//! # Repository Module
//!
//! Database repository implementations for the local cache.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LocalStore (portal-sync)                                              │
//! │       │                                                                 │
//! │       │  db.local_items().load(&path)                                  │
//! │       ▼                                                                 │
//! │  LocalItemRepository                                                   │
//! │  ├── save(&self, path, item)                                           │
//! │  ├── load(&self, path)                                                 │
//! │  ├── remove(&self, path)                                               │
//! │  └── count(&self)                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod local_item;
