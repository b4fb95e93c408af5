//! `UrbanFix` - local marker store and map synchronization for urban issue reporting
//!
//! Persists geotagged problem reports, keeps the map viewport and marker set
//! consistent across restarts and screen visits, enriches reports with
//! resolved place names and serves filtered and clustered views.

pub mod api;
pub mod cache;
pub mod capture;
pub mod cluster;
pub mod config;
pub mod error;
pub mod filter;
pub mod geocode;
pub mod models;
pub mod services;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod web;

// Re-export core types for public API
pub use capture::{CaptureFlow, PendingReport};
pub use cluster::{ClusterProjector, ClusterSettings, RenderGroup};
pub use config::UrbanFixConfig;
pub use error::UrbanFixError;
pub use filter::{CityFilter, MarkerFilter, MarkerStats};
pub use geocode::{GeocodeResolver, NominatimGeocoder, Placemark, ReverseGeocoder};
pub use models::{DeviceFix, IssueCategory, MapRegion, ProblemReport, ReportId};
pub use store::{LoadOutcome, MarkerStore, RegionStore, Storage};
pub use sync::{ConfiguredLocation, FocusGuard, LocationProvider, Snapshot, SyncController, SyncState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, UrbanFixError>;
