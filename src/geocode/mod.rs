//! Geocode Resolver
//!
//! Turns marker coordinates into human-readable place names. Lookups go through
//! an in-session map keyed by the exact coordinates, then an optional persistent
//! cache, and only then to the external reverse-geocoding capability. Failures
//! yield [`UNKNOWN_LOCATION`] and are never cached, so the next load retries.

pub mod nominatim;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::cache::PersistentCache;
use crate::models::ProblemReport;
use crate::{Result, UrbanFixError};

pub use nominatim::NominatimGeocoder;

/// Place name substituted when a lookup fails
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// One reverse-geocoding result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Placemark {
    pub city: Option<String>,
    pub subregion: Option<String>,
}

impl Placemark {
    /// City, falling back to the subregion; blank names count as missing
    #[must_use]
    pub fn place_name(&self) -> Option<&str> {
        [&self.city, &self.subregion]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
    }
}

/// External reverse-geocoding capability
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Vec<Placemark>>;
}

/// Cache key: the exact bit patterns of the coordinates, no rounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey {
    lat: u64,
    lon: u64,
}

impl CoordKey {
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat: lat.to_bits(),
            lon: lon.to_bits(),
        }
    }

    fn persistent_key(&self) -> String {
        format!(
            "geocode:{}:{}",
            f64::from_bits(self.lat),
            f64::from_bits(self.lon)
        )
    }
}

pub struct GeocodeResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    memory: RwLock<HashMap<CoordKey, String>>,
    persistent: Option<(PersistentCache, Duration)>,
}

impl GeocodeResolver {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            geocoder,
            memory: RwLock::new(HashMap::new()),
            persistent: None,
        }
    }

    /// Also keep resolved names across restarts for roughly `ttl`
    #[must_use]
    pub fn with_persistent_cache(mut self, cache: PersistentCache, ttl: Duration) -> Self {
        self.persistent = Some((cache, ttl));
        self
    }

    /// Number of names held in the session cache
    pub async fn cached_entries(&self) -> usize {
        self.memory.read().await.len()
    }

    /// Resolve one coordinate pair to a place name
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, lat: f64, lon: f64) -> String {
        let key = CoordKey::new(lat, lon);
        if let Some(name) = self.memory.read().await.get(&key) {
            return name.clone();
        }

        if let Some(name) = self.from_persistent(&key).await {
            self.memory.write().await.insert(key, name.clone());
            return name;
        }

        match self.lookup(lat, lon).await {
            Ok(name) => {
                self.memory.write().await.insert(key, name.clone());
                self.to_persistent(&key, &name).await;
                name
            }
            Err(e) => {
                warn!("Reverse geocoding ({:.4}, {:.4}) failed: {}", lat, lon, e);
                UNKNOWN_LOCATION.to_string()
            }
        }
    }

    /// Resolve every report concurrently; the result lines up with the input.
    ///
    /// Identical coordinates inside one batch share a single lookup.
    pub async fn resolve_all(&self, reports: &[ProblemReport]) -> Vec<String> {
        let mut slots: HashMap<CoordKey, usize> = HashMap::new();
        let mut unique: Vec<(f64, f64)> = Vec::new();
        for report in reports {
            slots
                .entry(CoordKey::new(report.lat, report.lon))
                .or_insert_with(|| {
                    unique.push((report.lat, report.lon));
                    unique.len() - 1
                });
        }
        debug!(
            "Resolving {} reports through {} distinct lookups",
            reports.len(),
            unique.len()
        );

        let names = join_all(unique.iter().map(|&(lat, lon)| self.resolve(lat, lon))).await;

        reports
            .iter()
            .map(|report| names[slots[&CoordKey::new(report.lat, report.lon)]].clone())
            .collect()
    }

    /// Fill `city` on every report
    pub async fn enrich(&self, reports: Vec<ProblemReport>) -> Vec<ProblemReport> {
        let names = self.resolve_all(&reports).await;
        reports
            .into_iter()
            .zip(names)
            .map(|(report, name)| report.with_city(name))
            .collect()
    }

    async fn lookup(&self, lat: f64, lon: f64) -> Result<String> {
        let placemarks = self.geocoder.reverse_geocode(lat, lon).await?;
        placemarks
            .first()
            .and_then(Placemark::place_name)
            .map(str::to_string)
            .ok_or_else(|| UrbanFixError::geocode("No place name in response"))
    }

    async fn from_persistent(&self, key: &CoordKey) -> Option<String> {
        let (cache, _) = self.persistent.as_ref()?;
        match cache.get::<String>(&key.persistent_key()).await {
            Ok(name) => name,
            Err(e) => {
                debug!("Geocode cache read failed: {}", e);
                None
            }
        }
    }

    async fn to_persistent(&self, key: &CoordKey, name: &str) {
        let Some((cache, ttl)) = &self.persistent else {
            return;
        };
        let jitter: f64 = rand::rng().random_range(0.9..1.1);
        let ttl = Duration::from_secs_f64(ttl.as_secs_f64() * jitter);
        if let Err(e) = cache
            .put(&key.persistent_key(), name.to_string(), ttl)
            .await
        {
            warn!("Failed to persist place name: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Geocoder answering from a fixed table and counting calls
    pub(crate) struct TableGeocoder {
        pub calls: AtomicUsize,
        pub fail: bool,
        pub delay_for: fn(f64) -> u64,
    }

    impl TableGeocoder {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay_for: |_| 0,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReverseGeocoder for TableGeocoder {
        async fn reverse_geocode(&self, lat: f64, _lon: f64) -> Result<Vec<Placemark>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = (self.delay_for)(lat);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail {
                return Err(UrbanFixError::geocode("service down"));
            }
            let city = match lat.round() as i64 {
                40 => Some("New York".to_string()),
                45 => Some("Turin".to_string()),
                51 => Some("London".to_string()),
                _ => None,
            };
            let subregion = (lat.round() as i64 == 10).then(|| "Somewhere County".to_string());
            Ok(vec![Placemark { city, subregion }])
        }
    }

    #[tokio::test]
    async fn test_identical_key_looks_up_once() {
        let geocoder = Arc::new(TableGeocoder::new());
        let resolver = GeocodeResolver::new(geocoder.clone());

        assert_eq!(resolver.resolve(40.0, -73.0).await, "New York");
        assert_eq!(resolver.resolve(40.0, -73.0).await, "New York");
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_look_up_twice() {
        let geocoder = Arc::new(TableGeocoder::new());
        let resolver = GeocodeResolver::new(geocoder.clone());

        resolver.resolve(40.0, -73.0).await;
        resolver.resolve(40.000_001, -73.0).await;
        assert_eq!(geocoder.calls(), 2);
        assert_eq!(resolver.cached_entries().await, 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let geocoder = Arc::new(TableGeocoder::failing());
        let resolver = GeocodeResolver::new(geocoder.clone());

        assert_eq!(resolver.resolve(40.0, -73.0).await, UNKNOWN_LOCATION);
        assert_eq!(resolver.resolve(40.0, -73.0).await, UNKNOWN_LOCATION);
        assert_eq!(geocoder.calls(), 2);
        assert_eq!(resolver.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_subregion_fallback_and_empty_result() {
        let geocoder = Arc::new(TableGeocoder::new());
        let resolver = GeocodeResolver::new(geocoder.clone());

        assert_eq!(resolver.resolve(10.0, 0.0).await, "Somewhere County");
        assert_eq!(resolver.resolve(-60.0, 0.0).await, UNKNOWN_LOCATION);
        assert_eq!(resolver.cached_entries().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_all_preserves_input_order() {
        let geocoder = Arc::new(TableGeocoder {
            // Earlier inputs finish last
            delay_for: |lat| if lat.round() as i64 == 40 { 30 } else { 1 },
            ..TableGeocoder::new()
        });
        let resolver = GeocodeResolver::new(geocoder.clone());
        let reports = vec![
            ProblemReport::new("pothole", 40.0, -73.0),
            ProblemReport::new("graffiti", 45.0, 7.6),
            ProblemReport::new("pothole", 51.0, 0.0),
            ProblemReport::new("pothole", 40.0, -73.0),
        ];

        let names = resolver.resolve_all(&reports).await;
        assert_eq!(names, vec!["New York", "Turin", "London", "New York"]);
        assert_eq!(geocoder.calls(), 3);
    }

    #[tokio::test]
    async fn test_persistent_cache_survives_new_resolver() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = fjall::Database::builder(dir.path()).open().unwrap();
        let keyspace = db
            .keyspace("geocode", fjall::KeyspaceCreateOptions::default)
            .unwrap();
        let cache = PersistentCache::new(keyspace);
        let geocoder = Arc::new(TableGeocoder::new());

        let first = GeocodeResolver::new(geocoder.clone())
            .with_persistent_cache(cache.clone(), Duration::from_secs(3600));
        assert_eq!(first.resolve(45.0, 7.6).await, "Turin");

        let second = GeocodeResolver::new(geocoder.clone())
            .with_persistent_cache(cache, Duration::from_secs(3600));
        assert_eq!(second.resolve(45.0, 7.6).await, "Turin");
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_enrich_fills_city() {
        let resolver = GeocodeResolver::new(Arc::new(TableGeocoder::new()));
        let enriched = resolver
            .enrich(vec![ProblemReport::new("pothole", 51.0, 0.0)])
            .await;
        assert_eq!(enriched[0].city.as_deref(), Some("London"));
    }
}
