//! Map viewport and device location models

use serde::{Deserialize, Serialize};

use crate::UrbanFixError;

/// Span applied to a region built from a fresh location fix
pub const DEFAULT_REGION_DELTA: f64 = 0.5;

/// Map viewport: centre plus span
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapRegion {
    /// Centre latitude in decimal degrees
    pub latitude: f64,
    /// Centre longitude in decimal degrees
    pub longitude: f64,
    /// Vertical span in degrees, > 0
    pub latitude_delta: f64,
    /// Horizontal span in degrees, > 0
    pub longitude_delta: f64,
}

/// A live position reported by the device
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct DeviceFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl MapRegion {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, latitude_delta: f64, longitude_delta: f64) -> Self {
        Self {
            latitude,
            longitude,
            latitude_delta,
            longitude_delta,
        }
    }

    /// Region centred on a location fix with the default span
    #[must_use]
    pub fn around(fix: DeviceFix) -> Self {
        Self::new(
            fix.latitude,
            fix.longitude,
            DEFAULT_REGION_DELTA,
            DEFAULT_REGION_DELTA,
        )
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(UrbanFixError::validation(format!(
                "Region latitude {} is outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(UrbanFixError::validation(format!(
                "Region longitude {} is outside [-180, 180]",
                self.longitude
            )));
        }
        if !(self.latitude_delta.is_finite() && self.latitude_delta > 0.0)
            || !(self.longitude_delta.is_finite() && self.longitude_delta > 0.0)
        {
            return Err(UrbanFixError::validation(
                "Region deltas must be positive",
            ));
        }
        Ok(())
    }

    /// Map zoom level implied by the horizontal span
    #[must_use]
    pub fn zoom_level(&self) -> i32 {
        (360.0 / self.longitude_delta).log2().round() as i32
    }

    /// Whether a coordinate falls inside the viewport grown by `padding` spans on each side.
    /// Longitudes wrap across the antimeridian.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64, padding: f64) -> bool {
        let half_lat = self.latitude_delta * (0.5 + padding);
        let half_lon = self.longitude_delta * (0.5 + padding);
        let dlon = (lon - self.longitude + 540.0).rem_euclid(360.0) - 180.0;
        (lat - self.latitude).abs() <= half_lat && (half_lon >= 180.0 || dlon.abs() <= half_lon)
    }

    /// Format the centre as a coordinates string
    #[must_use]
    pub fn format_center(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

impl From<DeviceFix> for MapRegion {
    fn from(fix: DeviceFix) -> Self {
        Self::around(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_json_shape() {
        let region = MapRegion::new(46.8182, 8.2275, 0.5, 0.25);
        let json = serde_json::to_value(region).unwrap();
        assert_eq!(json["latitudeDelta"], 0.5);
        assert_eq!(json["longitudeDelta"], 0.25);
        assert_eq!(region.format_center(), "46.8182, 8.2275");
    }

    #[test]
    fn test_region_validation() {
        assert!(MapRegion::new(40.0, -73.0, 0.5, 0.5).validate().is_ok());
        assert!(MapRegion::new(40.0, -73.0, 0.0, 0.5).validate().is_err());
        assert!(MapRegion::new(40.0, -73.0, 0.5, -1.0).validate().is_err());
        assert!(MapRegion::new(95.0, -73.0, 0.5, 0.5).validate().is_err());
    }

    #[test]
    fn test_zoom_level_from_span() {
        assert_eq!(MapRegion::new(0.0, 0.0, 360.0, 360.0).zoom_level(), 0);
        assert_eq!(MapRegion::new(0.0, 0.0, 0.5, 0.703_125).zoom_level(), 9);
        assert_eq!(MapRegion::new(0.0, 0.0, 0.001, 0.000_343).zoom_level(), 20);
    }

    #[test]
    fn test_contains_wraps_antimeridian() {
        let region = MapRegion::new(0.0, 179.5, 2.0, 2.0);
        assert!(region.contains(0.0, -179.8, 0.0));
        assert!(!region.contains(0.0, 170.0, 0.0));
        assert!(region.contains(1.4, 179.5, 0.25));
        assert!(!region.contains(1.6, 179.5, 0.25));
    }

    #[test]
    fn test_region_from_fix() {
        let region = MapRegion::from(DeviceFix {
            latitude: 40.0,
            longitude: -73.0,
        });
        assert_eq!(region.latitude_delta, DEFAULT_REGION_DELTA);
        assert_eq!(region.longitude_delta, DEFAULT_REGION_DELTA);
    }
}
