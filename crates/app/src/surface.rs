use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use employee_map_core::{
    LatLng, MapHandle, MapOptions, MapSurface, MarkerId, MarkerPlacement, SurfaceError, TileLayer,
};
use serde::Serialize;
use tracing::debug;

use crate::events::{EventHub, MapEvent};

/// A marker as held by the board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedMarker {
    pub id: MarkerId,
    pub position: LatLng,
    pub popup_html: String,
}

/// Everything the page needs to rebuild a map from scratch.
#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub handle: MapHandle,
    pub container_id: String,
    pub options: MapOptions,
    pub tile_layers: Vec<TileLayer>,
    pub markers: Vec<PlacedMarker>,
    pub layout_revision: u64,
}

#[derive(Default)]
struct BoardInner {
    next_id: u64,
    maps: HashMap<MapHandle, MapView>,
}

impl BoardInner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn map_mut(&mut self, map: MapHandle) -> Result<&mut MapView, SurfaceError> {
        self.maps.get_mut(&map).ok_or(SurfaceError::UnknownMap(map))
    }
}

/// In-memory map surface. Changes are published on the [`EventHub`] so a
/// browser page rendering the map with Leaflet can follow along.
pub struct MapBoard {
    inner: Mutex<BoardInner>,
    events: EventHub,
}

impl MapBoard {
    pub fn new(events: EventHub) -> Self {
        Self {
            inner: Mutex::new(BoardInner::default()),
            events,
        }
    }

    pub fn snapshot(&self, map: MapHandle) -> Option<MapView> {
        self.lock().maps.get(&map).cloned()
    }

    #[cfg(test)]
    pub fn marker_count(&self, map: MapHandle) -> usize {
        self.lock()
            .maps
            .get(&map)
            .map(|view| view.markers.len())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().expect("map board poisoned")
    }
}

impl MapSurface for MapBoard {
    fn create(&self, container_id: &str, options: &MapOptions) -> Result<MapHandle, SurfaceError> {
        let mut inner = self.lock();
        let handle = MapHandle(inner.next_id());
        inner.maps.insert(
            handle,
            MapView {
                handle,
                container_id: container_id.to_string(),
                options: options.clone(),
                tile_layers: Vec::new(),
                markers: Vec::new(),
                layout_revision: 0,
            },
        );
        debug!(stage = "surface", map = %handle, container_id, "map created");
        Ok(handle)
    }

    fn add_tile_layer(&self, map: MapHandle, layer: &TileLayer) -> Result<(), SurfaceError> {
        self.lock().map_mut(map)?.tile_layers.push(layer.clone());
        Ok(())
    }

    fn add_marker(
        &self,
        map: MapHandle,
        placement: &MarkerPlacement,
    ) -> Result<MarkerId, SurfaceError> {
        let marker = {
            let mut inner = self.lock();
            let id = MarkerId(inner.next_id());
            let marker = PlacedMarker {
                id,
                position: placement.position,
                popup_html: placement.popup_html.clone(),
            };
            inner.map_mut(map)?.markers.push(marker.clone());
            marker
        };
        let id = marker.id;
        self.events.publish(MapEvent::Marker { map, marker });
        Ok(id)
    }

    fn clear_markers(&self, map: MapHandle) -> Result<usize, SurfaceError> {
        let removed = {
            let mut inner = self.lock();
            let view = inner.map_mut(map)?;
            let removed = view.markers.len();
            view.markers.clear();
            removed
        };
        self.events.publish(MapEvent::MarkersCleared { map, removed });
        Ok(removed)
    }

    fn invalidate_size(&self, map: MapHandle) -> Result<(), SurfaceError> {
        let revision = {
            let mut inner = self.lock();
            let view = inner.map_mut(map)?;
            view.layout_revision += 1;
            view.layout_revision
        };
        self.events.publish(MapEvent::Layout { map, revision });
        Ok(())
    }

    fn destroy(&self, map: MapHandle) -> Result<(), SurfaceError> {
        self.lock()
            .maps
            .remove(&map)
            .ok_or(SurfaceError::UnknownMap(map))?;
        debug!(stage = "surface", map = %map, "map destroyed");
        self.events.publish(MapEvent::Destroyed { map });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(lat: f64, lng: f64) -> MarkerPlacement {
        MarkerPlacement {
            position: LatLng::new(lat, lng),
            popup_html: "<b>A B</b><br>C, D".to_string(),
        }
    }

    #[test]
    fn markers_accumulate_until_cleared() {
        let board = MapBoard::new(EventHub::new());
        let map = board
            .create("map", &MapOptions::default())
            .expect("create");
        board
            .add_tile_layer(map, &TileLayer::openstreetmap())
            .expect("tile layer");

        let first = board.add_marker(map, &placement(1.0, 2.0)).expect("marker");
        let second = board.add_marker(map, &placement(1.0, 2.0)).expect("marker");
        assert_ne!(first, second);
        assert_eq!(board.marker_count(map), 2);

        assert_eq!(board.clear_markers(map).expect("clear"), 2);
        assert_eq!(board.marker_count(map), 0);

        let view = board.snapshot(map).expect("snapshot");
        assert_eq!(view.container_id, "map");
        assert_eq!(view.tile_layers.len(), 1);
    }

    #[test]
    fn destroyed_map_rejects_further_calls() {
        let board = MapBoard::new(EventHub::new());
        let map = board
            .create("map", &MapOptions::default())
            .expect("create");
        board.destroy(map).expect("destroy");

        assert_eq!(
            board.add_marker(map, &placement(0.0, 0.0)),
            Err(SurfaceError::UnknownMap(map))
        );
        assert_eq!(board.destroy(map), Err(SurfaceError::UnknownMap(map)));
        assert!(board.snapshot(map).is_none());
    }

    #[tokio::test]
    async fn changes_are_published() {
        let hub = EventHub::new();
        let mut events = hub.subscribe();
        let board = MapBoard::new(hub);
        let map = board
            .create("map", &MapOptions::default())
            .expect("create");

        board.add_marker(map, &placement(3.0, 4.0)).expect("marker");
        board.invalidate_size(map).expect("invalidate");

        let marker = events.recv().await.expect("marker event");
        assert!(matches!(marker, MapEvent::Marker { marker, .. } if marker.position == LatLng::new(3.0, 4.0)));
        let layout = events.recv().await.expect("layout event");
        assert!(matches!(layout, MapEvent::Layout { revision: 1, .. }));
    }
}
