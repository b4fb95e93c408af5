//! Local persistence for the map core.
//!
//! [`Storage`] is the single handle through which the marker file and the
//! key-value database are opened at startup and closed at shutdown. Components
//! receive their store handles from it instead of reaching for global paths.

pub mod markers;
pub mod region;

use std::path::{Path, PathBuf};

use fjall::Database;
use tokio::task;
use tracing::info;

use crate::cache::PersistentCache;
use crate::config::StorageConfig;
use crate::{Result, UrbanFixError};

pub use markers::{LoadOutcome, MarkerStore};
pub use region::RegionStore;

const SETTINGS_KEYSPACE: &str = "settings";
const GEOCODE_KEYSPACE: &str = "geocode";

/// Opened storage: marker collection, region entry and geocode cache
pub struct Storage {
    db: Database,
    markers: MarkerStore,
    regions: RegionStore,
    geocode_cache: PersistentCache,
}

impl Storage {
    /// Open storage under the configured data directory
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let data_dir = config.resolved_data_dir();
        Self::open_at(&data_dir, &config.markers_file).await
    }

    /// Open storage rooted at `data_dir`
    pub async fn open_at(data_dir: &Path, markers_file: &str) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            UrbanFixError::storage_unavailable(format!(
                "Failed to create data directory {}: {e}",
                data_dir.display()
            ))
        })?;

        let kv_path: PathBuf = data_dir.join("kv");
        let (db, settings, geocode) = task::spawn_blocking(move || {
            let db = Database::builder(&kv_path).open()?;
            let settings = db.keyspace(SETTINGS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
            let geocode = db.keyspace(GEOCODE_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
            Ok::<_, fjall::Error>((db, settings, geocode))
        })
        .await
        .map_err(|e| UrbanFixError::storage_unavailable(e.to_string()))?
        .map_err(|e| {
            UrbanFixError::storage_unavailable(format!("Failed to open key-value store: {e}"))
        })?;

        let markers = MarkerStore::open(data_dir.join(markers_file));
        info!("Storage opened at {}", data_dir.display());

        Ok(Self {
            db,
            markers,
            regions: RegionStore::new(settings),
            geocode_cache: PersistentCache::new(geocode),
        })
    }

    #[must_use]
    pub fn markers(&self) -> MarkerStore {
        self.markers.clone()
    }

    #[must_use]
    pub fn regions(&self) -> RegionStore {
        self.regions.clone()
    }

    #[must_use]
    pub fn geocode_cache(&self) -> PersistentCache {
        self.geocode_cache.clone()
    }

    /// Drain pending marker writes and release the database
    pub async fn close(self) {
        self.markers.close().await;
        drop(self.db);
        info!("Storage closed");
    }
}
