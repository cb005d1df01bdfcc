use std::{sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive};
use employee_map_core::{MapHandle, SyncState};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_stream::{
    wrappers::{BroadcastStream, WatchStream},
    Stream, StreamExt,
};
use tracing::{debug, warn};

use crate::surface::PlacedMarker;

const EVENT_BUFFER: usize = 256;

/// Change notifications mirrored to the browser page.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEvent {
    Marker { map: MapHandle, marker: PlacedMarker },
    MarkersCleared { map: MapHandle, removed: usize },
    Layout { map: MapHandle, revision: u64 },
    Destroyed { map: MapHandle },
    Sync { state: SyncState },
}

impl MapEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Marker { .. } => "marker",
            Self::MarkersCleared { .. } => "markers_cleared",
            Self::Layout { .. } => "layout",
            Self::Destroyed { .. } => "destroyed",
            Self::Sync { .. } => "sync",
        }
    }

    pub fn into_sse_event(self) -> Result<Event, serde_json::Error> {
        let event = Event::default().event(self.event_name());
        let data = serde_json::to_string(&self)?;
        Ok(event.data(data))
    }
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<MapEvent>,
    closed: Arc<watch::Sender<bool>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        let (closed, _) = watch::channel(false);
        Self {
            sender,
            closed: Arc::new(closed),
        }
    }

    pub fn publish(&self, event: MapEvent) {
        // No subscribers simply means no page is open.
        if self.sender.send(event).is_err() {
            debug!(stage = "events", "no subscribers for map event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.sender.subscribe()
    }

    /// Ends every open and future [`event_stream`]. Called once the server
    /// starts shutting down so long-lived SSE responses let it drain.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(stage = "events", "event streams closing");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

enum Feed {
    Event(MapEvent),
    Closed,
}

/// Surface events merged with sync state changes. The current sync state is
/// emitted first so a fresh page can render the loading indicator at once.
/// The stream ends when the hub is closed.
pub fn event_stream(
    hub: &EventHub,
    sync_state: watch::Receiver<SyncState>,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    let surface = BroadcastStream::new(hub.subscribe()).filter_map(|result| match result {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(stage = "events", error = %err, "event subscriber lagged");
            None
        }
    });
    let sync = WatchStream::new(sync_state).map(|state| MapEvent::Sync { state });
    let closed = WatchStream::new(hub.closed.subscribe())
        .filter(|closed| *closed)
        .map(|_| Feed::Closed);

    sync.merge(surface)
        .map(Feed::Event)
        .merge(closed)
        .take_while(|feed| matches!(feed, Feed::Event(_)))
        .filter_map(|feed| match feed {
            Feed::Event(event) => Some(event.into_sse_event()),
            Feed::Closed => None,
        })
}

pub fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}
