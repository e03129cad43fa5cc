//! # Local Item Repository
//!
//! Key/value rows of `(storage key, JSON payload, saved_at)`.
//!
//! The storage key is [`Path::storage_key`], the JSON array form of an
//! item path, so one row exists per `(status, type, id, domain)`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use portal_core::Path;

/// A stored item with its save time.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalItemRecord {
    pub key: String,
    pub payload: Value,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LocalItemRow {
    key: String,
    payload: String,
    saved_at: DateTime<Utc>,
}

impl TryFrom<LocalItemRow> for LocalItemRecord {
    type Error = DbError;

    fn try_from(row: LocalItemRow) -> Result<Self, Self::Error> {
        let payload =
            serde_json::from_str(&row.payload).map_err(|e| DbError::payload(&row.key, e))?;
        Ok(LocalItemRecord {
            key: row.key,
            payload,
            saved_at: row.saved_at,
        })
    }
}

/// Repository for locally cached items.
#[derive(Debug, Clone)]
pub struct LocalItemRepository {
    pool: SqlitePool,
}

impl LocalItemRepository {
    /// Creates a new LocalItemRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LocalItemRepository { pool }
    }

    /// Stores `item` under `path`, replacing any previous copy.
    pub async fn save(&self, path: &Path, item: &Value) -> DbResult<()> {
        let key = path.storage_key();
        let payload = serde_json::to_string(item).map_err(|e| DbError::payload(&key, e))?;
        let now = Utc::now();

        debug!(%path, "Saving local item");

        sqlx::query(
            r#"
            INSERT INTO local_items (key, payload, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(&key)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Loads the item stored under `path`, if any.
    pub async fn load(&self, path: &Path) -> DbResult<Option<Value>> {
        Ok(self.load_record(path).await?.map(|record| record.payload))
    }

    /// Loads the item stored under `path` together with its save time.
    pub async fn load_record(&self, path: &Path) -> DbResult<Option<LocalItemRecord>> {
        let row = sqlx::query_as::<_, LocalItemRow>(
            "SELECT key, payload, saved_at FROM local_items WHERE key = ?1",
        )
        .bind(path.storage_key())
        .fetch_optional(&self.pool)
        .await?;

        row.map(LocalItemRecord::try_from).transpose()
    }

    /// Deletes the item stored under `path`. Returns whether a row existed.
    pub async fn remove(&self, path: &Path) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM local_items WHERE key = ?1")
            .bind(path.storage_key())
            .execute(&self.pool)
            .await?;

        debug!(%path, removed = result.rows_affected(), "Removed local item");
        Ok(result.rows_affected() > 0)
    }

    /// Number of stored items.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM local_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
