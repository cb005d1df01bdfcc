use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{LatLng, MarkerPlacement};

pub const DEFAULT_CONTAINER_ID: &str = "map";

/// Identifies a map created on a [`MapSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapHandle(pub u64);

impl fmt::Display for MapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map-{}", self.0)
    }
}

/// Identifies a marker owned by a map surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(pub u64);

/// Initial view and interaction options, serialized in Leaflet's casing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapOptions {
    pub center: LatLng,
    pub zoom: f64,
    pub zoom_snap: f64,
    pub zoom_delta: f64,
    pub prefer_canvas: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            center: LatLng::new(30.1575, 71.5249),
            zoom: 5.0,
            zoom_snap: 0.5,
            zoom_delta: 0.5,
            prefer_canvas: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayerOptions {
    pub attribution: String,
    pub detect_retina: bool,
    pub max_zoom: u8,
    pub tile_size: u32,
    pub zoom_offset: i8,
}

/// A raster tile source added to a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayer {
    pub url_template: String,
    pub options: TileLayerOptions,
}

impl TileLayer {
    pub fn openstreetmap() -> Self {
        Self {
            url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            options: TileLayerOptions {
                attribution: "© OpenStreetMap contributors".to_string(),
                detect_retina: true,
                max_zoom: 18,
                tile_size: 512,
                zoom_offset: -1,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("unknown map {0}")]
    UnknownMap(MapHandle),
}

/// Interactive map the sync controller places markers on.
///
/// Implementations own marker lifetime. `add_marker` hands back an id, but
/// callers are free to drop it; `clear_markers` removes everything at once.
pub trait MapSurface: Send + Sync {
    fn create(&self, container_id: &str, options: &MapOptions) -> Result<MapHandle, SurfaceError>;

    fn add_tile_layer(&self, map: MapHandle, layer: &TileLayer) -> Result<(), SurfaceError>;

    fn add_marker(
        &self,
        map: MapHandle,
        placement: &MarkerPlacement,
    ) -> Result<MarkerId, SurfaceError>;

    /// Removes all markers from the map and returns how many were removed.
    fn clear_markers(&self, map: MapHandle) -> Result<usize, SurfaceError>;

    /// Re-measures the map container once layout has settled.
    fn invalidate_size(&self, map: MapHandle) -> Result<(), SurfaceError>;

    fn destroy(&self, map: MapHandle) -> Result<(), SurfaceError>;
}
