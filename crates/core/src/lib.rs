//! Domain types shared by the directory client and the map service.
//!
//! [`normalizer`] turns raw employee JSON into [`types::EmployeeRecord`]s and
//! popup markup, [`map`] defines the surface contract markers are placed on.

pub mod map;
pub mod normalizer;
pub mod types;

pub use map::{
    MapHandle, MapOptions, MapSurface, MarkerId, SurfaceError, TileLayer, TileLayerOptions,
    DEFAULT_CONTAINER_ID,
};
pub use normalizer::{Normalizer, RecordError};
pub use types::{EmployeeRecord, LatLng, MarkerPlacement, SyncState};
