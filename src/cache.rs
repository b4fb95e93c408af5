//! Persistent TTL cache backing the second geocoding level

use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fjall::Keyspace;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::task;
use tracing::{debug, instrument};

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    value: T,
    /// Unix seconds after which the entry is stale
    expires_at: u64,
}

/// Key-value cache with per-entry expiry, stored in one fjall keyspace.
///
/// Handles are cheap to clone and share the same keyspace.
#[derive(Clone)]
pub struct PersistentCache {
    store: Keyspace,
}

fn unix_seconds(at: SystemTime) -> Result<u64> {
    Ok(at.duration_since(UNIX_EPOCH)?.as_secs())
}

impl PersistentCache {
    pub fn new(store: Keyspace) -> Self {
        Self { store }
    }

    /// Store `value` under `key` for `ttl`
    #[instrument(name = "cache_put", level = "debug", skip(self))]
    pub async fn put<T: Serialize + Send + Debug + 'static>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<()> {
        let expires_at = SystemTime::now()
            .checked_add(ttl)
            .context("TTL overflow")
            .and_then(unix_seconds)?;
        let bytes = postcard::to_stdvec(&Entry { value, expires_at })?;

        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        task::spawn_blocking(move || store.insert(key, bytes)).await??;
        Ok(())
    }

    /// Fresh value under `key`; expired entries are dropped on the way
    #[instrument(name = "cache_get", level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Result<Option<T>> {
        let store = self.store.clone();
        let raw_key = key.as_bytes().to_vec();
        let stored = task::spawn_blocking(move || {
            store.get(raw_key).map(|found| found.map(|bytes| bytes.to_vec()))
        })
        .await??;

        let Some(bytes) = stored else {
            debug!("Cache miss");
            return Ok(None);
        };
        let entry: Entry<T> = postcard::from_bytes(&bytes)?;
        if unix_seconds(SystemTime::now())? < entry.expires_at {
            return Ok(Some(entry.value));
        }

        debug!("Cache entry expired");
        self.remove(key).await?;
        Ok(None)
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        task::spawn_blocking(move || store.remove(key)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_cache(dir: &TempDir) -> (fjall::Database, PersistentCache) {
        let db = fjall::Database::builder(dir.path()).open().unwrap();
        let keyspace = db
            .keyspace("cache", fjall::KeyspaceCreateOptions::default)
            .unwrap();
        (db, PersistentCache::new(keyspace))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let (_db, cache) = open_cache(&dir);

        cache
            .put("geocode:40:-73", "New York".to_string(), Duration::from_secs(3600))
            .await
            .unwrap();
        let value: Option<String> = cache.get("geocode:40:-73").await.unwrap();
        assert_eq!(value.as_deref(), Some("New York"));

        let missing: Option<String> = cache.get("geocode:0:0").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let dir = TempDir::new().unwrap();
        let (_db, cache) = open_cache(&dir);

        cache
            .put("short", "gone".to_string(), Duration::ZERO)
            .await
            .unwrap();
        let value: Option<String> = cache.get("short").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let (_db, cache) = open_cache(&dir);

        cache
            .put("key", 7u64, Duration::from_secs(60))
            .await
            .unwrap();
        cache.remove("key").await.unwrap();
        let value: Option<u64> = cache.get("key").await.unwrap();
        assert!(value.is_none());
    }
}
