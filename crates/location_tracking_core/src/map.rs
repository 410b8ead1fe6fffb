//! crates/location_tracking_core/src/map.rs
//!
//! Passive map view over a tracking session. The widget is created once per
//! mount and updated in place; teardown may run any number of times.

use crate::domain::{PeerLocation, PositionSample};
use crate::listeners::{lock, Subscription};
use crate::ports::{GeoPoint, MapError, MapWidget, Marker, MarkerKind};
use crate::session::TrackingSession;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const OWN_MARKER_ID: &str = "self";

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub center: GeoPoint,
    pub zoom: u8,
    pub tile_url: String,
    pub fallback_tile_url: String,
    pub init_retry_delay: Duration,
    pub own_label: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: GeoPoint {
                latitude: 17.4771,
                longitude: 78.5724,
            },
            zoom: 13,
            tile_url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            fallback_tile_url: "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png"
                .to_string(),
            init_retry_delay: Duration::from_millis(200),
            own_label: "You".to_string(),
        }
    }
}

struct MapView<W: MapWidget> {
    widget: W,
    config: MapConfig,
    initialized: bool,
    destroyed: bool,
    centered: bool,
    using_fallback: bool,
    peers: HashSet<String>,
}

impl<W: MapWidget> MapView<W> {
    fn try_create(&mut self) -> Result<(), MapError> {
        if self.initialized {
            return Err(MapError::AlreadyInitialized);
        }
        if !self.widget.is_container_ready() {
            return Err(MapError::ContainerNotReady);
        }
        let tile_url = self.config.tile_url.clone();
        self.widget.create(self.config.center, self.config.zoom, &tile_url)?;
        self.initialized = true;
        Ok(())
    }

    fn render_own(&mut self, sample: &PositionSample) {
        if !self.initialized || self.destroyed {
            return;
        }
        self.widget.place_marker(&Marker {
            id: OWN_MARKER_ID.to_string(),
            label: self.config.own_label.clone(),
            kind: MarkerKind::Own,
            sample: *sample,
        });
        if !self.centered {
            self.centered = true;
            let zoom = self.config.zoom;
            self.widget.set_view(GeoPoint::from(sample), zoom);
        }
    }
}

/// A mounted map. Dropping it unmounts.
pub struct MapPresenter<W: MapWidget> {
    view: Arc<Mutex<MapView<W>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    session: TrackingSession,
}

impl<W: MapWidget> MapPresenter<W> {
    /// Creates the map, retrying once after `init_retry_delay` if the
    /// container is not ready, then starts following the session.
    ///
    /// A map that still cannot be created stays blank; the failure is logged
    /// and never surfaced to the caller.
    pub async fn mount(widget: W, session: &TrackingSession, config: MapConfig) -> Self {
        let retry_delay = config.init_retry_delay;
        let view = Arc::new(Mutex::new(MapView {
            widget,
            config,
            initialized: false,
            destroyed: false,
            centered: false,
            using_fallback: false,
            peers: HashSet::new(),
        }));

        let first = lock(&view).try_create();
        if let Err(e) = first {
            debug!(error = %e, "Map container not ready, retrying once");
            tokio::time::sleep(retry_delay).await;
            let second = lock(&view).try_create();
            if let Err(e) = second {
                warn!(error = %e, "Map could not be initialized, leaving it blank");
            }
        }

        let subscription = {
            let view = Arc::downgrade(&view);
            session.on_sample(move |sample| {
                if let Some(view) = view.upgrade() {
                    lock(&view).render_own(sample);
                }
            })
        };

        // Pull instead of waiting for the next tick so the map is never blank
        // while tracking is already running.
        if let Some(latest) = session.latest_sample() {
            lock(&view).render_own(&latest);
        }

        Self {
            view,
            subscriptions: Mutex::new(vec![subscription]),
            session: session.clone(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        let view = lock(&self.view);
        view.initialized && !view.destroyed
    }

    /// Re-renders the session's latest sample.
    pub fn refresh(&self) {
        if let Some(latest) = self.session.latest_sample() {
            lock(&self.view).render_own(&latest);
        }
    }

    /// Shows other parties' last known positions, removing markers of anyone
    /// no longer in `peers`.
    pub fn show_peers(&self, peers: &[PeerLocation]) {
        let mut view = lock(&self.view);
        if !view.initialized || view.destroyed {
            return;
        }

        let current: HashSet<String> = peers.iter().map(|p| peer_marker_id(&p.user_id)).collect();
        let stale: Vec<String> = view.peers.difference(&current).cloned().collect();
        for id in stale {
            view.widget.remove_marker(&id);
        }
        for peer in peers {
            view.widget.place_marker(&Marker {
                id: peer_marker_id(&peer.user_id),
                label: peer.display_name.clone(),
                kind: MarkerKind::Peer,
                sample: peer.sample,
            });
        }
        view.peers = current;
    }

    /// Switches to the fallback tile source the first time tiles fail to load.
    pub fn on_tile_error(&self) {
        let mut view = lock(&self.view);
        if !view.initialized || view.destroyed || view.using_fallback {
            return;
        }
        view.using_fallback = true;
        let url = view.config.fallback_tile_url.clone();
        warn!(fallback = %url, "Tile source failed, switching to fallback");
        view.widget.set_tile_source(&url);
    }

    /// Unsubscribes and destroys the widget. Safe to call repeatedly.
    pub fn unmount(&self) {
        for mut subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }

        let mut view = lock(&self.view);
        if view.destroyed {
            return;
        }
        view.destroyed = true;
        if view.initialized {
            view.widget.destroy();
            info!("Map view unmounted");
        }
    }
}

impl<W: MapWidget> Drop for MapPresenter<W> {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn peer_marker_id(user_id: &str) -> String {
    format!("peer:{}", user_id)
}
