//! services/api/src/adapters/ws_map.rs
//!
//! A `MapWidget` that renders by sending draw commands to the browser over the
//! connection's outbound channel. The browser owns the actual map library.

use crate::web::protocol::ServerMessage;
use location_tracking_core::{GeoPoint, MapError, MapWidget, Marker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub struct WsMapWidget {
    outbox: UnboundedSender<ServerMessage>,
    container_ready: Arc<AtomicBool>,
    created: bool,
}

impl WsMapWidget {
    /// `container_ready` is shared with the connection handler, which flips it
    /// when the browser reports a laid-out map element.
    pub fn new(outbox: UnboundedSender<ServerMessage>, container_ready: Arc<AtomicBool>) -> Self {
        Self {
            outbox,
            container_ready,
            created: false,
        }
    }

    fn send(&self, message: ServerMessage) {
        if self.outbox.send(message).is_err() {
            debug!("Map command dropped, connection already closed");
        }
    }
}

impl MapWidget for WsMapWidget {
    fn is_container_ready(&self) -> bool {
        self.container_ready.load(Ordering::SeqCst)
    }

    fn create(&mut self, center: GeoPoint, zoom: u8, tile_url: &str) -> Result<(), MapError> {
        if self.created {
            return Err(MapError::AlreadyInitialized);
        }
        if !self.is_container_ready() {
            return Err(MapError::ContainerNotReady);
        }
        self.created = true;
        self.send(ServerMessage::MapCreated {
            latitude: center.latitude,
            longitude: center.longitude,
            zoom,
            tile_url: tile_url.to_string(),
        });
        Ok(())
    }

    fn place_marker(&mut self, marker: &Marker) {
        self.send(ServerMessage::MarkerPlaced {
            id: marker.id.clone(),
            label: marker.label.clone(),
            kind: marker.kind,
            sample: marker.sample,
        });
    }

    fn remove_marker(&mut self, id: &str) {
        self.send(ServerMessage::MarkerRemoved { id: id.to_string() });
    }

    fn set_view(&mut self, center: GeoPoint, zoom: u8) {
        self.send(ServerMessage::ViewSet {
            latitude: center.latitude,
            longitude: center.longitude,
            zoom,
        });
    }

    fn set_tile_source(&mut self, url: &str) {
        self.send(ServerMessage::TileSourceChanged {
            tile_url: url.to_string(),
        });
    }

    fn destroy(&mut self) {
        if self.created {
            self.created = false;
            self.send(ServerMessage::MapDestroyed);
        }
    }
}
