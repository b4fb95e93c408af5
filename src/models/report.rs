//! Problem report model: a single geotagged, labeled issue record

use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::IssueCategory;
use crate::UrbanFixError;

/// Stable identifier assigned when a report is created.
///
/// The default value is the unassigned id carried by records persisted before
/// identifiers existed; the marker store replaces it durably on first load.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    /// Generate a fresh, time-ordered identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }
}

impl From<&str> for ReportId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geotagged problem report (a "marker")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProblemReport {
    /// Identifier; unassigned on records persisted before identifiers existed
    #[serde(default)]
    pub id: ReportId,
    /// Confirmed or detected issue category, e.g. "pothole"
    pub label: String,
    /// Latitude in decimal degrees (WGS-84)
    pub lat: f64,
    /// Longitude in decimal degrees (WGS-84)
    pub lon: f64,
    /// Capture time, fixed-format ISO-8601 UTC with millisecond precision
    pub timestamp: String,
    /// Resolved place name, absent until geocoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Render a timestamp the way every stored report carries it: `2024-01-08T00:00:00.000Z`.
///
/// Fixed width and a literal `Z` keep lexicographic order equal to chronological order.
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ProblemReport {
    /// Create a report captured now
    #[must_use]
    pub fn new(label: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self::captured_at_time(label, lat, lon, Utc::now())
    }

    /// Create a report with an explicit capture time
    #[must_use]
    pub fn captured_at_time(
        label: impl Into<String>,
        lat: f64,
        lon: f64,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReportId::generate(),
            label: label.into(),
            lat,
            lon,
            timestamp: format_timestamp(time),
            city: None,
        }
    }

    /// Parsed capture time, `None` when the stored timestamp is malformed
    #[must_use]
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    #[must_use]
    pub fn category(&self) -> IssueCategory {
        IssueCategory::from_label(&self.label)
    }

    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Check the invariants a report must satisfy before it is persisted
    pub fn validate(&self) -> crate::Result<()> {
        if self.label.trim().is_empty() {
            return Err(UrbanFixError::validation("Label must not be empty"));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(UrbanFixError::validation(format!(
                "Latitude {} is outside [-90, 90]",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(UrbanFixError::validation(format!(
                "Longitude {} is outside [-180, 180]",
                self.lon
            )));
        }
        if self.captured_at().is_none() {
            return Err(UrbanFixError::validation(format!(
                "Timestamp '{}' is not ISO-8601",
                self.timestamp
            )));
        }
        Ok(())
    }
}
