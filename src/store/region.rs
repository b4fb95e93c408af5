//! Region store: the last settled map viewport, one JSON entry in a key-value keyspace

use fjall::Keyspace;
use tokio::task;
use tracing::{debug, instrument, warn};

use crate::models::MapRegion;
use crate::{Result, UrbanFixError};

pub const REGION_KEY: &str = "last_map_region";

#[derive(Clone)]
pub struct RegionStore {
    store: Keyspace,
}

impl RegionStore {
    pub fn new(store: Keyspace) -> Self {
        Self { store }
    }

    /// Persist the viewport, replacing whatever was saved before
    #[instrument(skip(self), level = "debug")]
    pub async fn save(&self, region: &MapRegion) -> Result<()> {
        region.validate()?;
        let bytes = serde_json::to_vec(region)
            .map_err(|e| UrbanFixError::general(format!("Failed to serialize region: {e}")))?;
        let store = self.store.clone();
        task::spawn_blocking(move || store.insert(REGION_KEY, bytes))
            .await
            .map_err(|e| UrbanFixError::storage_unavailable(e.to_string()))?
            .map_err(|e| UrbanFixError::storage_unavailable(e.to_string()))?;
        debug!("Saved region centred at {}", region.format_center());
        Ok(())
    }

    /// The last saved viewport; `None` if never saved, unreadable or unparsable
    pub async fn load(&self) -> Option<MapRegion> {
        let store = self.store.clone();
        let bytes = match task::spawn_blocking(move || store.get(REGION_KEY)).await {
            Ok(Ok(Some(bytes))) => bytes.to_vec(),
            Ok(Ok(None)) => {
                debug!("No saved region");
                return None;
            }
            Ok(Err(e)) => {
                warn!("Failed to read saved region: {}", e);
                return None;
            }
            Err(e) => {
                warn!("Region read task failed: {}", e);
                return None;
            }
        };

        match serde_json::from_slice::<MapRegion>(&bytes) {
            Ok(region) if region.validate().is_ok() => Some(region),
            Ok(region) => {
                warn!("Saved region is out of range, ignoring: {:?}", region);
                None
            }
            Err(e) => {
                warn!("Saved region is unparsable, ignoring: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> (fjall::Database, RegionStore) {
        let db = fjall::Database::builder(dir.path()).open().unwrap();
        let keyspace = db
            .keyspace("settings", fjall::KeyspaceCreateOptions::default)
            .unwrap();
        (db, RegionStore::new(keyspace))
    }

    #[tokio::test]
    async fn test_never_saved_is_absent() {
        let dir = TempDir::new().unwrap();
        let (_db, regions) = open(&dir);
        assert!(regions.load().await.is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let (_db, regions) = open(&dir);

        let first = MapRegion::new(40.0, -73.0, 0.5, 0.5);
        let second = MapRegion::new(45.07, 7.68, 0.02, 0.03);
        regions.save(&first).await.unwrap();
        regions.save(&second).await.unwrap();

        assert_eq!(regions.load().await, Some(second));
    }

    #[tokio::test]
    async fn test_invalid_region_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (_db, regions) = open(&dir);

        let result = regions.save(&MapRegion::new(40.0, -73.0, 0.0, 0.5)).await;
        assert!(matches!(result, Err(UrbanFixError::Validation { .. })));
        assert!(regions.load().await.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_entry_is_absent() {
        let dir = TempDir::new().unwrap();
        let (db, regions) = open(&dir);
        let keyspace = db
            .keyspace("settings", fjall::KeyspaceCreateOptions::default)
            .unwrap();
        keyspace.insert(REGION_KEY, "{not json").unwrap();

        assert!(regions.load().await.is_none());
    }
}
