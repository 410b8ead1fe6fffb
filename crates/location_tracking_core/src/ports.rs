//! crates/location_tracking_core/src/ports.rs
//!
//! Defines the contracts (traits) the tracking core needs from the outside world.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of the concrete key-value store, positioning source and map widget.

use crate::domain::{PositionSample, WatchOptions};
use async_trait::async_trait;
use std::sync::Arc;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Not supported on this platform: {0}")]
    Unsupported(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistent Key-Value Store
//=========================================================================================

/// Durable string storage scoped to one deployment, such as a browser profile
/// or a database table on the server.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> PortResult<()>;
}

//=========================================================================================
// Positioning Platform
//=========================================================================================

/// Opaque handle for an active platform watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// An error as reported by the platform, before it is mapped to a `PositionErrorKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub code: u16,
    pub message: String,
}

pub type PlatformReading = Result<PositionSample, PlatformError>;

/// Invoked by the platform for every fix or failure of a watch.
pub type WatchCallback = Arc<dyn Fn(PlatformReading) + Send + Sync>;

#[async_trait]
pub trait GeolocationPlatform: Send + Sync {
    /// Registers a continuous watch.
    ///
    /// Implementations must deliver readings asynchronously and never invoke
    /// `callback` from inside this call.
    fn watch_position(&self, options: WatchOptions, callback: WatchCallback) -> PortResult<WatchId>;

    /// Cancels a watch. Unknown ids are ignored.
    fn clear_watch(&self, id: WatchId);

    /// Performs a single read.
    async fn get_current_position(&self, options: WatchOptions) -> PlatformReading;
}

//=========================================================================================
// Map Widget
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("map container has no size yet")]
    ContainerNotReady,
    #[error("map container already holds a map instance")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&PositionSample> for GeoPoint {
    fn from(sample: &PositionSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Own,
    Peer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub label: String,
    pub kind: MarkerKind,
    pub sample: PositionSample,
}

/// A third-party map rendered into a container the UI owns.
///
/// `create` may only succeed once per container; the presenter is responsible
/// for never calling it twice and for calling `destroy` exactly once.
pub trait MapWidget: Send + 'static {
    fn is_container_ready(&self) -> bool;

    fn create(&mut self, center: GeoPoint, zoom: u8, tile_url: &str) -> Result<(), MapError>;

    /// Adds the marker, or moves it if one with the same id exists.
    fn place_marker(&mut self, marker: &Marker);

    fn remove_marker(&mut self, id: &str);

    fn set_view(&mut self, center: GeoPoint, zoom: u8);

    fn set_tile_source(&mut self, url: &str);

    fn destroy(&mut self);
}
