//! # Notifications and Session
//!
//! Outbound hooks the engine calls when something goes wrong: a
//! [`Notifier`] for user-facing notices and a [`SessionGuard`] for
//! re-checking the login after a 401.
//!
//! Both follow the same shape: a trait object held as `Arc<dyn ...>`, with a
//! do-nothing default so the engine runs headless in tests and tools.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use portal_core::Path;

use crate::error::SyncResult;
use crate::store::Store;

// =============================================================================
// Notices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// One dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: Uuid,
    pub level: NoticeLevel,
    pub text: String,
    pub dismissible: bool,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            text: text.into(),
            dismissible: true,
            created_at: Utc::now(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text)
    }
}

/// Receives user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);

    fn dismiss(&self, id: Uuid);
}

/// Drops every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, _notice: Notice) {}
    fn dismiss(&self, _id: Uuid) {}
}

/// Publishes notices into the store at `misc.messages.<id>`.
#[derive(Debug, Clone)]
pub struct StoreNotifier {
    store: Store,
}

impl StoreNotifier {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl Notifier for StoreNotifier {
    fn notify(&self, notice: Notice) {
        let path = Path::messages().child(notice.id.to_string());
        match serde_json::to_value(&notice) {
            Ok(value) => self.store.set(&path, value),
            Err(e) => debug!(error = %e, "Could not encode notice"),
        }
    }

    fn dismiss(&self, id: Uuid) {
        self.store
            .set(&Path::messages().child(id.to_string()), serde_json::Value::Null);
    }
}

// =============================================================================
// Session Guard
// =============================================================================

/// Re-validates the login after the server answers 401.
#[async_trait]
pub trait SessionGuard: Send + Sync {
    async fn revalidate(&self) -> SyncResult<()>;
}

/// Treats every session as valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessionGuard;

#[async_trait]
impl SessionGuard for NoSessionGuard {
    async fn revalidate(&self) -> SyncResult<()> {
        Ok(())
    }
}
