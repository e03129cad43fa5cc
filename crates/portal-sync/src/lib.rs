//! # portal-sync: Store and Sync Engine for the Portal Data Core
//!
//! This crate keeps a client-side cache of server items consistent with the
//! server: deduplicated fetches, optimistic saves and publishes, and result
//! page maintenance after mutations.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncEngine (orchestrator)                    │  │
//! │  │                                                                  │  │
//! │  │  run(action) ─► Cell<Item>      list / more ─► Cell<ResultPage>  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │     Store      │  │   Transport    │  │  LocalStore            │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Path tree of   │  │ reqwest JSON   │  │ Published items kept   │    │
//! │  │ JSON values    │  │ with backoff   │  │ in SQLite (portal-db)  │    │
//! │  │ Fetch dedup    │  │ on connection  │  │ or memory              │    │
//! │  │ URL mirroring  │  │ failures       │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │     Cell       │  │  Endpoints     │  │  Notifier /            │    │
//! │  │                │  │                │  │  SessionGuard          │    │
//! │  │ pending with   │  │ item and list  │  │                        │    │
//! │  │ interim value, │  │ URLs for a     │  │ user notices, login    │    │
//! │  │ resolved or    │  │ type / status  │  │ re-check after 401     │    │
//! │  │ failed         │  │ / domain       │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`cell`] - Async result cell with an interim value
//! - [`store`] - Path-addressed cache, fetch dedup, change signal
//! - [`engine`] - Status-aware actions, lists and pagination
//! - [`transport`] - Request/response envelope and the HTTP client
//! - [`endpoint`] - URL scheme for items and lists
//! - [`local`] - Durable local cache of published items
//! - [`notify`] - User notices and session re-validation hooks
//! - [`config`] - TOML configuration with env overrides
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portal_core::{Action, ItemType};
//! use portal_sync::{PortalConfig, RunRequest, Store, SyncEngineBuilder};
//!
//! portal_sync::init_tracing();
//! let config = PortalConfig::load_or_default(None);
//!
//! let store = Store::new();
//! let engine = SyncEngineBuilder::from_config(store.clone(), &config)?.build()?;
//!
//! let advert = engine
//!     .run(RunRequest::new(ItemType::Advert, "x7", Action::Publish))
//!     .settled()
//!     .await?;
//! println!("Published {}", advert.id);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cell;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod local;
pub mod notify;
pub mod store;
pub mod telemetry;
pub mod transport;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cell::Cell;
pub use config::{ApiConfig, CacheConfig, ClientConfig, PortalConfig};
pub use endpoint::{EndpointResolver, RestEndpoints};
pub use engine::{EngineSettings, RunRequest, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use local::{LocalStore, MemoryLocalStore, NoLocalStore};
pub use notify::{
    NoOpNotifier, NoSessionGuard, Notice, NoticeLevel, Notifier, SessionGuard, StoreNotifier,
};
pub use store::{FetchOptions, Store};
pub use telemetry::{init_tracing, try_init_tracing};
pub use transport::{
    HttpTransport, Message, Method, RequestBody, Response, SendOptions, Transport,
    TransportConfig,
};
