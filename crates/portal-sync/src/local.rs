//! # Local Store
//!
//! Durable cache of published items, used as a fast path before the server
//! answers. Entries are keyed by the JSON array form of their store path
//! (`["data","PUBLISHED","Advert","nodomain","x7"]`).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use portal_core::Path;
use portal_db::Database;

use crate::error::SyncResult;

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn save(&self, path: &Path, item: &Value) -> SyncResult<()>;

    async fn load(&self, path: &Path) -> SyncResult<Option<Value>>;

    async fn remove(&self, path: &Path) -> SyncResult<()>;
}

/// Keeps nothing; every load misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalStore;

#[async_trait]
impl LocalStore for NoLocalStore {
    async fn save(&self, _path: &Path, _item: &Value) -> SyncResult<()> {
        Ok(())
    }

    async fn load(&self, _path: &Path) -> SyncResult<Option<Value>> {
        Ok(None)
    }

    async fn remove(&self, _path: &Path) -> SyncResult<()> {
        Ok(())
    }
}

/// Process-lifetime local store.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn save(&self, path: &Path, item: &Value) -> SyncResult<()> {
        self.entries
            .write()
            .await
            .insert(path.storage_key(), item.clone());
        Ok(())
    }

    async fn load(&self, path: &Path) -> SyncResult<Option<Value>> {
        Ok(self.entries.read().await.get(&path.storage_key()).cloned())
    }

    async fn remove(&self, path: &Path) -> SyncResult<()> {
        self.entries.write().await.remove(&path.storage_key());
        Ok(())
    }
}

/// SQLite-backed local store.
#[async_trait]
impl LocalStore for Database {
    async fn save(&self, path: &Path, item: &Value) -> SyncResult<()> {
        self.local_items().save(path, item).await?;
        Ok(())
    }

    async fn load(&self, path: &Path) -> SyncResult<Option<Value>> {
        Ok(self.local_items().load(path).await?)
    }

    async fn remove(&self, path: &Path) -> SyncResult<()> {
        self.local_items().remove(path).await?;
        Ok(())
    }
}
