//! HTTP surface for a presentation client
//!
//! Every marker read runs a fresh sync cycle, the same way a screen gaining
//! focus does.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::capture::{CaptureFlow, PendingReport};
use crate::cluster::{Cluster, ClusterProjector, RenderGroup};
use crate::filter::{CityFilter, MarkerFilter, MarkerStats};
use crate::models::{DeviceFix, MapRegion, ProblemReport, ReportId};
use crate::services::ReportClient;
use crate::sync::{SyncController, SyncState};
use crate::UrbanFixError;

#[derive(Clone)]
pub struct AppState {
    pub controller: SyncController,
    pub projector: Arc<ClusterProjector>,
    pub capture: CaptureFlow,
    pub reports: Arc<ReportClient>,
}

/// Error surfaced to HTTP clients as `{ "error": <user message> }`
pub struct ApiError(UrbanFixError);

impl From<UrbanFixError> for ApiError {
    fn from(error: UrbanFixError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            UrbanFixError::Validation { .. } => StatusCode::BAD_REQUEST,
            UrbanFixError::NotFound { .. } => StatusCode::NOT_FOUND,
            UrbanFixError::Location { .. } => StatusCode::SERVICE_UNAVAILABLE,
            UrbanFixError::RemoteService { .. } | UrbanFixError::GeocodeFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.user_message() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// One marker selection from the query string; at most one may be given
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    q: Option<String>,
    city: Option<String>,
    days: Option<f64>,
    newer: Option<bool>,
    lat: Option<f64>,
    lon: Option<f64>,
    radius_km: Option<f64>,
}

impl FilterQuery {
    fn into_filter(self) -> crate::Result<MarkerFilter> {
        let mut selections = Vec::new();

        if let Some(query) = self.q {
            selections.push(MarkerFilter::Text(query));
        }
        // `city=` with no value selects every city; any other value is a place name
        if let Some(city) = self.city {
            let city = if city.is_empty() {
                CityFilter::AllCities
            } else {
                CityFilter::Named(city)
            };
            selections.push(MarkerFilter::City(city));
        }
        match (self.days, self.newer) {
            (Some(days), newer) => {
                if !days.is_finite() || days < 0.0 {
                    return Err(UrbanFixError::validation("days must be a non-negative number"));
                }
                selections.push(MarkerFilter::Age {
                    days,
                    newer: newer.unwrap_or(false),
                });
            }
            (None, Some(_)) => return Err(UrbanFixError::validation("newer requires days")),
            (None, None) => {}
        }
        match (self.lat, self.lon, self.radius_km) {
            (Some(latitude), Some(longitude), Some(radius_km)) => {
                selections.push(MarkerFilter::Nearby {
                    latitude,
                    longitude,
                    radius_km,
                });
            }
            (None, None, None) => {}
            _ => {
                return Err(UrbanFixError::validation(
                    "lat, lon and radius_km must be given together",
                ));
            }
        }

        if selections.len() > 1 {
            return Err(UrbanFixError::validation("Only one filter may be applied at a time"));
        }
        Ok(selections.pop().unwrap_or(MarkerFilter::All))
    }
}

#[derive(Serialize)]
struct MarkerView {
    #[serde(flatten)]
    report: ProblemReport,
    category: &'static str,
    color: &'static str,
}

impl From<ProblemReport> for MarkerView {
    fn from(report: ProblemReport) -> Self {
        let category = report.category();
        Self {
            report,
            category: category.as_str(),
            color: category.color(),
        }
    }
}

#[derive(Serialize)]
struct MarkersResponse {
    state: SyncState,
    markers: Vec<MarkerView>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum GroupView {
    Single { index: usize, marker: MarkerView },
    Cluster(Cluster),
}

#[derive(Serialize)]
struct ClustersResponse {
    zoom: i32,
    clustering: bool,
    groups: Vec<GroupView>,
}

#[derive(Deserialize)]
struct NewMarker {
    label: String,
    latitude: f64,
    longitude: f64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/markers", get(list_markers).post(create_marker))
        .route("/markers/{id}", delete(delete_marker))
        .route("/cities", get(list_cities))
        .route("/stats", get(marker_stats))
        .route("/clusters", get(clusters))
        .route("/region", get(get_region).put(put_region))
        .route("/region/relocate", post(relocate))
        .route("/analyze", post(analyze))
        .route("/report", post(generate_report))
        .with_state(state)
}

async fn list_markers(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> ApiResult<Json<MarkersResponse>> {
    let filter = query.into_filter()?;
    let snapshot = state.controller.refresh().await;
    let markers = snapshot
        .filtered(&filter, Utc::now())
        .into_iter()
        .map(MarkerView::from)
        .collect();
    Ok(Json(MarkersResponse {
        state: snapshot.state,
        markers,
    }))
}

async fn create_marker(
    State(state): State<AppState>,
    Json(marker): Json<NewMarker>,
) -> ApiResult<(StatusCode, Json<MarkersResponse>)> {
    let fix = DeviceFix {
        latitude: marker.latitude,
        longitude: marker.longitude,
    };
    let snapshot = state.capture.report(marker.label, fix).await?;
    let markers = snapshot
        .markers
        .iter()
        .cloned()
        .map(MarkerView::from)
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(MarkersResponse {
            state: snapshot.state,
            markers,
        }),
    ))
}

async fn delete_marker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.controller.remove(&ReportId::from(id.as_str())).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_cities(State(state): State<AppState>) -> Json<Vec<String>> {
    let snapshot = state.controller.refresh().await;
    Json(snapshot.cities.as_ref().clone())
}

async fn marker_stats(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> ApiResult<Json<MarkerStats>> {
    let filter = query.into_filter()?;
    let snapshot = state.controller.refresh().await;
    Ok(Json(snapshot.stats(&filter, Utc::now())))
}

async fn clusters(
    State(state): State<AppState>,
    Query(viewport): Query<MapRegion>,
) -> ApiResult<Json<ClustersResponse>> {
    viewport.validate()?;
    let snapshot = state.controller.refresh().await;
    let projection = snapshot.project(&state.projector, &viewport);
    let groups = projection
        .groups()
        .map(|group| match group {
            RenderGroup::Single { index, marker } => GroupView::Single {
                index,
                marker: MarkerView::from(marker.clone()),
            },
            RenderGroup::Cluster(cluster) => GroupView::Cluster(cluster),
        })
        .collect();
    Ok(Json(ClustersResponse {
        zoom: projection.zoom(),
        clustering: projection.is_clustering(),
        groups,
    }))
}

async fn get_region(State(state): State<AppState>) -> ApiResult<Json<MapRegion>> {
    Ok(Json(state.controller.restore_region().await?))
}

async fn put_region(
    State(state): State<AppState>,
    Json(region): Json<MapRegion>,
) -> ApiResult<StatusCode> {
    state.controller.settle_region(region).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn relocate(State(state): State<AppState>) -> ApiResult<Json<MapRegion>> {
    Ok(Json(state.controller.relocate().await?))
}

/// Multipart upload with `image`, `lat` and `lon`; returns the detection awaiting confirmation
async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<PendingReport>> {
    let mut image = None;
    let mut latitude = None;
    let mut longitude = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UrbanFixError::validation(format!("Malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| UrbanFixError::validation(format!("Unreadable image: {e}")))?;
                image = Some(bytes.to_vec());
            }
            "lat" => latitude = Some(coordinate(&name, field.text().await)?),
            "lon" => longitude = Some(coordinate(&name, field.text().await)?),
            other => debug!("Ignoring upload field {}", other),
        }
    }

    let (Some(image), Some(latitude), Some(longitude)) = (image, latitude, longitude) else {
        return Err(UrbanFixError::validation("image, lat and lon are required").into());
    };
    let pending = state
        .capture
        .analyze(
            image,
            DeviceFix {
                latitude,
                longitude,
            },
        )
        .await?;
    Ok(Json(pending))
}

fn coordinate(
    name: &str,
    text: std::result::Result<String, axum::extract::multipart::MultipartError>,
) -> crate::Result<f64> {
    text.ok()
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| UrbanFixError::validation(format!("{name} must be a number")))
}

/// PDF report of the markers passing the query's filter
async fn generate_report(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> ApiResult<Response> {
    let filter = query.into_filter()?;
    let snapshot = state.controller.refresh().await;
    let selected = snapshot.filtered(&filter, Utc::now());
    let pdf = state.reports.render(&selected).await?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], pdf).into_response())
}
