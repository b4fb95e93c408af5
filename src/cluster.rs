//! Cluster Projector
//!
//! Decides which markers render individually and which collapse into a cluster
//! glyph for a given viewport. Markers are binned on a screen-space grid in Web
//! Mercator at the viewport's zoom level; cells holding enough markers become a
//! cluster. Below the minimum zoom the coarsest grid is used, above the maximum
//! zoom nothing clusters.

use std::collections::HashMap;
use std::f64::consts::PI;

use serde::Serialize;

use crate::config::MapConfig;
use crate::models::{MapRegion, ProblemReport};

const TILE_SIZE: f64 = 256.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    pub min_zoom: i32,
    pub max_zoom: i32,
    /// Grid cell edge in screen pixels
    pub radius_px: f64,
    pub min_points: usize,
    /// Extra viewport spans culled in on each side
    pub edge_padding: f64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            min_zoom: 5,
            max_zoom: 20,
            radius_px: 40.0,
            min_points: 2,
            edge_padding: 0.25,
        }
    }
}

impl From<&MapConfig> for ClusterSettings {
    fn from(config: &MapConfig) -> Self {
        Self {
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            radius_px: config.cluster_radius_px,
            min_points: config.min_cluster_points,
            ..Self::default()
        }
    }
}

/// Several markers drawn as one glyph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub latitude: f64,
    pub longitude: f64,
    pub count: usize,
    /// Positions of the members in the projected marker slice
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderGroup<'a> {
    Single {
        index: usize,
        marker: &'a ProblemReport,
    },
    Cluster(Cluster),
}

#[derive(Debug, Clone, Default)]
pub struct ClusterProjector {
    settings: ClusterSettings,
}

impl ClusterProjector {
    #[must_use]
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Prepare the render groups of `markers` for `viewport`. Nothing is computed yet.
    #[must_use]
    pub fn project<'a>(&self, markers: &'a [ProblemReport], viewport: &MapRegion) -> Projection<'a> {
        let zoom = viewport.zoom_level();
        Projection {
            markers,
            viewport: *viewport,
            zoom: zoom.clamp(self.settings.min_zoom, self.settings.max_zoom),
            clustering: zoom <= self.settings.max_zoom,
            settings: self.settings,
        }
    }
}

/// Render groups for one settled viewport; iterate with [`Projection::groups`] as often as needed
#[derive(Debug, Clone, Copy)]
pub struct Projection<'a> {
    markers: &'a [ProblemReport],
    viewport: MapRegion,
    zoom: i32,
    clustering: bool,
    settings: ClusterSettings,
}

impl<'a> Projection<'a> {
    /// Zoom level the grid is built at
    #[must_use]
    pub fn zoom(&self) -> i32 {
        self.zoom
    }

    #[must_use]
    pub fn is_clustering(&self) -> bool {
        self.clustering
    }

    #[must_use]
    pub fn groups(&self) -> RenderGroups<'a> {
        RenderGroups {
            projection: *self,
            built: None,
        }
    }

    fn build(&self) -> Vec<RenderGroup<'a>> {
        let markers = self.markers;
        let visible = markers.iter().enumerate().filter(|(_, marker)| {
            self.viewport
                .contains(marker.lat, marker.lon, self.settings.edge_padding)
        });

        if !self.clustering {
            return visible
                .map(|(index, marker)| RenderGroup::Single { index, marker })
                .collect();
        }

        let world = TILE_SIZE * 2f64.powi(self.zoom);
        let cell = self.settings.radius_px;
        let mut cells: HashMap<(i64, i64), usize> = HashMap::new();
        let mut bins: Vec<Vec<usize>> = Vec::new();
        for (index, marker) in visible {
            let (x, y) = to_world_px(marker.lat, marker.lon, world);
            let key = ((x / cell).floor() as i64, (y / cell).floor() as i64);
            let slot = *cells.entry(key).or_insert_with(|| {
                bins.push(Vec::new());
                bins.len() - 1
            });
            bins[slot].push(index);
        }

        bins.into_iter()
            .flat_map(|members| {
                if members.len() >= self.settings.min_points {
                    vec![RenderGroup::Cluster(cluster_of(markers, members))]
                } else {
                    members
                        .into_iter()
                        .map(|index| RenderGroup::Single {
                            index,
                            marker: &markers[index],
                        })
                        .collect()
                }
            })
            .collect()
    }
}

/// Lazy iterator over render groups; the grid is built on the first pull
pub struct RenderGroups<'a> {
    projection: Projection<'a>,
    built: Option<std::vec::IntoIter<RenderGroup<'a>>>,
}

impl<'a> Iterator for RenderGroups<'a> {
    type Item = RenderGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let projection = self.projection;
        self.built
            .get_or_insert_with(|| projection.build().into_iter())
            .next()
    }
}

fn cluster_of(markers: &[ProblemReport], members: Vec<usize>) -> Cluster {
    let count = members.len();
    let (lat_sum, lon_sum) = members.iter().fold((0.0, 0.0), |(lat, lon), &i| {
        (lat + markers[i].lat, lon + markers[i].lon)
    });
    Cluster {
        latitude: lat_sum / count as f64,
        longitude: lon_sum / count as f64,
        count,
        members,
    }
}

/// Web Mercator pixel coordinates in a world `world` pixels wide
fn to_world_px(lat: f64, lon: f64, world: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (lon + 180.0) / 360.0 * world;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * world;
    (x, y)
}
