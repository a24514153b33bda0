//! TTL Cache
//!
//! An embedded, single-file key/value store with per-entry expiry, backed
//! by turso (the Rust rewrite of SQLite). One table:
//!
//! ```sql
//! CREATE TABLE cache (key TEXT PRIMARY KEY, value TEXT NOT NULL, expiry INTEGER NOT NULL)
//! ```
//!
//! Expiry is enforced lazily on read: a row past its expiry is treated as a
//! miss and deleted on the spot. No background sweep runs.
//!
//! # Failure Policy
//!
//! The cache is an optimization, never a correctness dependency. Every
//! failure (I/O error, lock timeout, corrupt payload) is caught at this
//! boundary and degrades to a miss for `get` and a no-op for `set`, logged
//! at warn level and never raised to the caller.
//!
//! # Concurrency
//!
//! All operations serialize on one connection behind a short-lived async
//! mutex held only for the single statement, with a bounded acquisition
//! timeout so a wedged store fails loudly instead of hanging callers.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

/// Cache-internal errors. Always swallowed before reaching callers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Could not acquire the store connection within the bounded timeout.
    #[error("timed out waiting for cache connection")]
    LockTimeout,

    /// The underlying store failed.
    #[error("cache store error: {0}")]
    Store(#[from] turso::Error),

    /// A stored payload could not be (de)serialized.
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A row held something other than the expected column types.
    #[error("unexpected cache row shape")]
    RowShape,
}

/// Concurrency-safe TTL cache over a single-file store.
pub struct TtlCache {
    // The Database handle must outlive every connection made from it.
    _db: turso::Database,
    conn: Mutex<turso::Connection>,
    lock_timeout: Duration,
}

impl TtlCache {
    /// Open (or create) the cache database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created. Callers may treat that as "run without a cache".
    pub async fn open(path: &str, lock_timeout: Duration) -> Result<Self, CacheError> {
        let db = turso::Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expiry INTEGER NOT NULL
            )",
            (),
        )
        .await?;

        // Readers must not block writers; prefer write-ahead durability
        // where the store honors it.
        if let Err(e) = conn.execute("PRAGMA journal_mode = WAL", ()).await {
            tracing::debug!(error = %e, "cache store did not accept WAL pragma");
        }

        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
            lock_timeout,
        })
    }

    /// Look up `key`, returning the deserialized payload if present and
    /// unexpired. Any internal failure degrades to a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache get failed; treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`. Idempotent upsert. Any internal
    /// failure degrades to a silent no-op.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.try_set(key, value, ttl).await {
            tracing::warn!(key, error = %e, "cache set failed; skipping write");
        }
    }

    async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let conn = self.lock_conn().await?;

        let mut rows = conn
            .query(
                "SELECT value, expiry FROM cache WHERE key = ?1",
                (key.to_string(),),
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let payload = match row.get_value(0)? {
            turso::Value::Text(text) => text,
            _ => return Err(CacheError::RowShape),
        };
        let expiry = match row.get_value(1)? {
            turso::Value::Integer(secs) => secs,
            _ => return Err(CacheError::RowShape),
        };

        if expiry <= Utc::now().timestamp() {
            // Delete-on-read keeps the table tidy without a sweeper.
            conn.execute("DELETE FROM cache WHERE key = ?1", (key.to_string(),))
                .await?;
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn try_set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let expiry = Utc::now().timestamp() + ttl.as_secs() as i64;

        let conn = self.lock_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO cache (key, value, expiry) VALUES (?1, ?2, ?3)",
            (key.to_string(), payload, expiry),
        )
        .await?;

        Ok(())
    }

    /// Acquire the connection, failing loudly past the bounded timeout.
    async fn lock_conn(&self) -> Result<MutexGuard<'_, turso::Connection>, CacheError> {
        tokio::time::timeout(self.lock_timeout, self.conn.lock())
            .await
            .map_err(|_| CacheError::LockTimeout)
    }

    /// Whether a row for `key` physically exists, expired or not.
    #[cfg(test)]
    async fn row_exists(&self, key: &str) -> bool {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT 1 FROM cache WHERE key = ?1", (key.to_string(),))
            .await
            .unwrap();
        rows.next().await.unwrap().is_some()
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        price: f64,
        is_stale: bool,
    }

    async fn open_temp_cache() -> (TtlCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache = TtlCache::open(path.to_str().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        (cache, dir)
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let (cache, _dir) = open_temp_cache().await;

        let payload = Payload {
            price: 182.5,
            is_stale: false,
        };
        cache
            .set("price_AAPL", &payload, Duration::from_secs(60))
            .await;

        let read: Option<Payload> = cache.get("price_AAPL").await;
        assert_eq!(read, Some(payload));
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let (cache, _dir) = open_temp_cache().await;
        let read: Option<Payload> = cache.get("price_MISSING").await;
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn set_is_an_idempotent_upsert() {
        let (cache, _dir) = open_temp_cache().await;

        cache.set("hv_SPY", &10.0_f64, Duration::from_secs(60)).await;
        cache.set("hv_SPY", &20.0_f64, Duration::from_secs(60)).await;

        let read: Option<f64> = cache.get("hv_SPY").await;
        assert_eq!(read, Some(20.0));
    }

    #[tokio::test]
    async fn expired_entry_misses_and_row_is_deleted() {
        let (cache, _dir) = open_temp_cache().await;

        cache.set("iv_TSLA", &55.0_f64, Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let read: Option<f64> = cache.get("iv_TSLA").await;
        assert!(read.is_none());
        assert!(!cache.row_exists("iv_TSLA").await);
    }

    #[tokio::test]
    async fn corrupt_payload_degrades_to_miss() {
        let (cache, _dir) = open_temp_cache().await;

        cache.set("price_QQQ", &"not a payload", Duration::from_secs(60)).await;

        // Asking for a different shape than what was stored must not panic
        // or error; the boundary swallows the decode failure.
        let read: Option<Payload> = cache.get("price_QQQ").await;
        assert!(read.is_none());
    }
}
