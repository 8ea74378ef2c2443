//! SQLite-backed store so the session and permission cache survive restarts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError};

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-backed scoped key/value store.
///
/// Cheap to clone; clones share one lazily opened pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    location: Location,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    /// Store backed by the database file at `path` (created on first use).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_location(Location::File(path.into()))
    }

    /// Store backed by the default per-user data file,
    /// `{data_dir}/codegrade/client.db`.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::open(default_db_path()?))
    }

    /// Private in-memory database; contents vanish with the last clone.
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    fn with_location(location: Location) -> Self {
        Self {
            location,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the pool and create the table (called lazily on first use).
    async fn get_pool(&self) -> anyhow::Result<SqlitePool> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create store directory at {:?}", parent)
                    })?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .with_context(|| format!("failed to open SQLite store at {:?}", path))?
            }
            // A single connection that never idles out: every new
            // connection would otherwise see its own empty database.
            Location::Memory => SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(SqliteConnectOptions::new().in_memory(true))
                .await
                .context("failed to open in-memory SQLite store")?,
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                scope      TEXT NOT NULL,
                key        TEXT NOT NULL,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv_entries table")?;

        *pool_guard = Some(pool.clone());
        Ok(pool)
    }

    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.get_pool().await.map_err(backend)
    }
}

fn backend(err: impl Into<anyhow::Error>) -> StoreError {
    StoreError::Backend(format!("{:#}", err.into()))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let pool = self.pool().await?;

        let row = sqlx::query(
            r#"
            SELECT data
            FROM kv_entries
            WHERE scope = ?1
              AND key = ?2
            "#,
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&pool)
        .await
        .context("failed to fetch entry from store")
        .map_err(backend)?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let data: String = row.try_get("data").map_err(backend)?;
        let value = serde_json::from_str(&data).map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(Some(value))
    }

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let payload = serde_json::to_string(&value).map_err(|e| StoreError::Codec(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO kv_entries (scope, key, data, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(scope, key)
            DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(&payload)
        .bind(&now)
        .execute(&pool)
        .await
        .context("failed to upsert entry in store")
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, scope: &str, key: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            DELETE FROM kv_entries
            WHERE scope = ?1
              AND key = ?2
            "#,
        )
        .bind(scope)
        .bind(key)
        .execute(&pool)
        .await
        .context("failed to remove entry from store")
        .map_err(backend)?;

        Ok(())
    }

    async fn clear(&self, scope: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            DELETE FROM kv_entries
            WHERE scope = ?1
            "#,
        )
        .bind(scope)
        .execute(&pool)
        .await
        .context("failed to clear store scope")
        .map_err(backend)?;

        tracing::debug!(scope, "cleared store scope");
        Ok(())
    }
}

/// Resolve the path to the SQLite store:
/// `{app_data_dir}/codegrade/client.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory (tried data_dir and ~/.local/share)")?;

    let mut path = base;
    path.push("codegrade");
    path.push("client.db");
    Ok(path)
}
