//! Sync Controller
//!
//! Runs the per-visit load cycle of a marker-consuming screen and owns the
//! published view of markers and map region.
//!
//! Every focus event starts over: `Idle → Loading`, then a fresh store load,
//! city resolution for every record and finally `Ready` (or `Empty` when the
//! store holds nothing usable). Cycles are strictly sequential inside and never
//! publish once a newer cycle has started. Dropping the [`FocusGuard`] returned
//! by [`SyncController::on_focus`] cancels the cycle in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{ClusterProjector, Projection};
use crate::filter::{self, MarkerFilter, MarkerStats};
use crate::geocode::GeocodeResolver;
use crate::models::{DeviceFix, MapRegion, ProblemReport, ReportId};
use crate::store::{LoadOutcome, MarkerStore, RegionStore};
use crate::{Result, UrbanFixError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Loading,
    Ready,
    Empty,
}

/// What the presentation layer sees after a cycle step
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: SyncState,
    /// Cycle that produced this snapshot
    pub generation: u64,
    pub markers: Arc<Vec<ProblemReport>>,
    /// Distinct resolved cities, first appearance first
    pub cities: Arc<Vec<String>>,
}

impl Snapshot {
    fn bare(state: SyncState, generation: u64) -> Self {
        Self {
            state,
            generation,
            markers: Arc::new(Vec::new()),
            cities: Arc::new(Vec::new()),
        }
    }

    fn ready(generation: u64, markers: Vec<ProblemReport>) -> Self {
        let cities = filter::distinct_cities(&markers);
        Self {
            state: SyncState::Ready,
            generation,
            markers: Arc::new(markers),
            cities: Arc::new(cities),
        }
    }

    #[must_use]
    pub fn filtered(&self, filter: &MarkerFilter, now: DateTime<Utc>) -> Vec<ProblemReport> {
        filter.apply(&self.markers, now)
    }

    /// Counters for the markers passing `filter`
    #[must_use]
    pub fn stats(&self, filter: &MarkerFilter, now: DateTime<Utc>) -> MarkerStats {
        filter::stats(&self.filtered(filter, now), now)
    }

    #[must_use]
    pub fn project<'a>(
        &'a self,
        projector: &ClusterProjector,
        viewport: &MapRegion,
    ) -> Projection<'a> {
        projector.project(&self.markers, viewport)
    }
}

/// Live device position source
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_fix(&self) -> Result<DeviceFix>;
}

/// Location provider answering with a fixed, configured position
pub struct ConfiguredLocation {
    fix: Option<DeviceFix>,
}

impl ConfiguredLocation {
    #[must_use]
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        let fix = latitude
            .zip(longitude)
            .map(|(latitude, longitude)| DeviceFix {
                latitude,
                longitude,
            });
        Self { fix }
    }
}

#[async_trait]
impl LocationProvider for ConfiguredLocation {
    async fn current_fix(&self) -> Result<DeviceFix> {
        self.fix
            .ok_or_else(|| UrbanFixError::location("No device location configured"))
    }
}

struct Inner {
    markers: MarkerStore,
    regions: RegionStore,
    resolver: Arc<GeocodeResolver>,
    locator: Arc<dyn LocationProvider>,
    snapshots: watch::Sender<Snapshot>,
    region: watch::Sender<Option<MapRegion>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Inner>,
}

/// Scope of one focus-triggered cycle; dropping it cancels the cycle
/// and returns a still-loading view to `Idle`
pub struct FocusGuard {
    handle: Option<JoinHandle<Snapshot>>,
    inner: Arc<Inner>,
    generation: u64,
}

impl FocusGuard {
    /// Wait for the cycle to finish; `None` if it was cancelled or panicked
    pub async fn completed(mut self) -> Option<Snapshot> {
        let handle = self.handle.take()?;
        handle.await.ok()
    }
}

impl Drop for FocusGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        handle.abort();
        let generation = self.generation;
        let inner = &self.inner;
        inner.snapshots.send_if_modified(|current| {
            let stale = inner.generation.load(Ordering::SeqCst) != generation
                || current.generation != generation
                || current.state != SyncState::Loading;
            if stale {
                return false;
            }
            *current = Snapshot::bare(SyncState::Idle, generation);
            true
        });
    }
}

impl SyncController {
    pub fn new(
        markers: MarkerStore,
        regions: RegionStore,
        resolver: Arc<GeocodeResolver>,
        locator: Arc<dyn LocationProvider>,
    ) -> Self {
        let (snapshots, _) = watch::channel(Snapshot::bare(SyncState::Idle, 0));
        let (region, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                markers,
                regions,
                resolver,
                locator,
                snapshots,
                region,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn subscribe_region(&self) -> watch::Receiver<Option<MapRegion>> {
        self.inner.region.subscribe()
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Latest published region, `None` until one is restored or acquired
    #[must_use]
    pub fn region(&self) -> Option<MapRegion> {
        *self.inner.region.borrow()
    }

    /// Screen gained focus: start a fresh cycle in the background
    pub fn on_focus(&self) -> FocusGuard {
        let generation = self.begin_cycle();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { run_cycle(&inner, generation).await });
        FocusGuard {
            handle: Some(handle),
            inner: self.inner.clone(),
            generation,
        }
    }

    /// Run a fresh cycle to completion and return its snapshot
    pub async fn refresh(&self) -> Snapshot {
        let generation = self.begin_cycle();
        run_cycle(&self.inner, generation).await
    }

    /// Persist a new report, then reload so subscribers see it
    #[instrument(skip(self, report), fields(label = %report.label))]
    pub async fn record(&self, report: ProblemReport) -> Result<Snapshot> {
        self.inner.markers.append(report).await?;
        Ok(self.refresh().await)
    }

    /// Remove a report, then reload
    pub async fn remove(&self, id: &ReportId) -> Result<Snapshot> {
        self.inner.markers.delete(id).await?;
        Ok(self.refresh().await)
    }

    /// Last saved region, or a live location fix when nothing was saved
    #[instrument(skip(self))]
    pub async fn restore_region(&self) -> Result<MapRegion> {
        if let Some(region) = self.inner.regions.load().await {
            debug!("Restored region centred at {}", region.format_center());
            self.inner.region.send_replace(Some(region));
            return Ok(region);
        }
        info!("No saved region, requesting a location fix");
        self.relocate().await
    }

    /// Centre on the device's current position and remember it
    pub async fn relocate(&self) -> Result<MapRegion> {
        let fix = self.inner.locator.current_fix().await?;
        let region = MapRegion::from(fix);
        region
            .validate()
            .map_err(|e| UrbanFixError::location(format!("Unusable location fix: {e}")))?;
        self.inner.region.send_replace(Some(region));
        if let Err(e) = self.inner.regions.save(&region).await {
            warn!("Failed to save region: {}", e);
        }
        Ok(region)
    }

    /// Record a viewport the user settled on after a gesture
    pub async fn settle_region(&self, region: MapRegion) -> Result<()> {
        region.validate()?;
        self.inner.region.send_replace(Some(region));
        if let Err(e) = self.inner.regions.save(&region).await {
            warn!("Failed to save region: {}", e);
        }
        Ok(())
    }

    fn begin_cycle(&self) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .snapshots
            .send_replace(Snapshot::bare(SyncState::Idle, generation));
        self.inner
            .snapshots
            .send_replace(Snapshot::bare(SyncState::Loading, generation));
        generation
    }
}

async fn run_cycle(inner: &Inner, generation: u64) -> Snapshot {
    let snapshot = match inner.markers.load_outcome().await {
        LoadOutcome::Loaded(reports) if !reports.is_empty() => {
            let enriched = inner.resolver.enrich(reports).await;
            Snapshot::ready(generation, enriched)
        }
        LoadOutcome::Loaded(_) | LoadOutcome::Missing => {
            Snapshot::bare(SyncState::Empty, generation)
        }
        LoadOutcome::Unavailable { reason } => {
            warn!("Marker storage unavailable: {}", reason);
            Snapshot::bare(SyncState::Empty, generation)
        }
        LoadOutcome::Corrupt { reason } => {
            warn!("Marker storage corrupt: {}", reason);
            Snapshot::bare(SyncState::Empty, generation)
        }
    };

    let published = inner.snapshots.send_if_modified(|current| {
        if inner.generation.load(Ordering::SeqCst) == generation {
            *current = snapshot.clone();
            true
        } else {
            false
        }
    });
    if published {
        debug!(
            "Cycle {} finished {:?} with {} markers",
            generation,
            snapshot.state,
            snapshot.markers.len()
        );
    } else {
        debug!("Cycle {} superseded, not publishing", generation);
    }
    snapshot
}
