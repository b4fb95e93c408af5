use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use urbanfix::api::AppState;
use urbanfix::cluster::{ClusterProjector, ClusterSettings};
use urbanfix::services::{DetectionClient, ReportClient};
use urbanfix::{
    CaptureFlow, ConfiguredLocation, GeocodeResolver, NominatimGeocoder, Storage, SyncController,
    UrbanFixConfig, telemetry, web,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = UrbanFixConfig::load_from_path(std::env::args().nth(1).map(PathBuf::from))?;
    telemetry::init(&config.logging)?;
    info!("urbanfix {} starting", urbanfix::VERSION);

    let storage = Storage::open(&config.storage)
        .await
        .context("Failed to open local storage")?;

    let geocoder = NominatimGeocoder::new(&config.geocoding)?;
    let cache_ttl = Duration::from_secs(u64::from(config.geocoding.cache_ttl_hours) * 3600);
    let resolver = GeocodeResolver::new(Arc::new(geocoder))
        .with_persistent_cache(storage.geocode_cache(), cache_ttl);

    let locator = ConfiguredLocation::new(config.location.latitude, config.location.longitude);
    let controller = SyncController::new(
        storage.markers(),
        storage.regions(),
        Arc::new(resolver),
        Arc::new(locator),
    );

    let state = AppState {
        capture: CaptureFlow::new(
            Arc::new(DetectionClient::new(&config.services)?),
            controller.clone(),
        ),
        controller,
        projector: Arc::new(ClusterProjector::new(ClusterSettings::from(&config.map))),
        reports: Arc::new(ReportClient::new(&config.services)?),
    };

    let served = web::run(config.server.port, state).await;
    storage.close().await;
    served
}
