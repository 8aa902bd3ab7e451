/// Persistence facade. A key/value abstraction over whatever store the
/// deployment provides; the pipeline treats it as best-effort and must stay
/// fully functional with the in-memory backend.
use crate::errors::ApiResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> ApiResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> ApiResult<()>;
    /// Append to a collection, evicting oldest entries beyond `max_size`.
    async fn append(&self, collection: &str, item: Value, max_size: usize) -> ApiResult<()>;
    async fn list(&self, collection: &str) -> ApiResult<Vec<Value>>;
}

/// In-memory backend. Always available; entries expire lazily on read.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Value, Option<Instant>)>>,
    collections: Mutex<HashMap<String, VecDeque<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> ApiResult<Option<Value>> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        if let Some((_, Some(expires_at))) = entries.get(key) {
            if Instant::now() >= *expires_at {
                entries.remove(key);
                return Ok(None);
            }
        }
        Ok(entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> ApiResult<()> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn append(&self, collection: &str, item: Value, max_size: usize) -> ApiResult<()> {
        let mut collections = self.collections.lock().expect("store lock poisoned");
        let items = collections.entry(collection.to_string()).or_default();
        items.push_back(item);
        while items.len() > max_size {
            items.pop_front();
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> ApiResult<Vec<Value>> {
        let collections = self.collections.lock().expect("store lock poisoned");
        Ok(collections
            .get(collection)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Postgres backend
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> ApiResult<Option<Value>> {
        let row = sqlx::query_as::<_, (Value,)>(
            "SELECT payload FROM kv_entries
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(payload,)| payload))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> ApiResult<()> {
        let expires_at: Option<DateTime<Utc>> =
            ttl.map(|t| Utc::now() + chrono::Duration::from_std(t).unwrap_or_default());

        sqlx::query(
            "INSERT INTO kv_entries(key, payload, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE
             SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at,
                 updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append(&self, collection: &str, item: Value, max_size: usize) -> ApiResult<()> {
        sqlx::query("INSERT INTO kv_collections(collection, payload) VALUES ($1, $2)")
            .bind(collection)
            .bind(item)
            .execute(&self.pool)
            .await?;

        // Evict oldest entries beyond the cap (insertion order, not access).
        sqlx::query(
            "DELETE FROM kv_collections
             WHERE collection = $1 AND id NOT IN (
                 SELECT id FROM kv_collections
                 WHERE collection = $1 ORDER BY id DESC LIMIT $2
             )",
        )
        .bind(collection)
        .bind(max_size as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> ApiResult<Vec<Value>> {
        let rows = sqlx::query_as::<_, (Value,)>(
            "SELECT payload FROM kv_collections WHERE collection = $1 ORDER BY id ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(payload,)| payload).collect())
    }
}

/// Initialize database tables
pub async fn init_db(pool: &PgPool) -> ApiResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS kv_entries(
            key TEXT PRIMARY KEY,
            payload JSONB NOT NULL,
            expires_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS kv_collections(
            id BIGSERIAL PRIMARY KEY,
            collection TEXT NOT NULL,
            payload JSONB NOT NULL,
            inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_kv_collections_collection
         ON kv_collections(collection, id DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_get_set_roundtrip() {
        let store = MemoryStore::new();
        store.set("a", json!({"x": 1}), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("short", json!(1), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_append_evicts_oldest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append("log", json!(i), 3).await.unwrap();
        }

        let items = store.list("log").await.unwrap();
        assert_eq!(items, vec![json!(2), json!(3), json!(4)]);
    }
}
