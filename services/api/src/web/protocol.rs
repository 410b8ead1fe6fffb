//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser and the API server.
//! The browser acts as the positioning device (it reports fixes) and as the map
//! renderer (it executes the draw commands the server sends).

use location_tracking_core::{
    DeviceFingerprint, MarkerKind, PositionErrorKind, PositionSample, TrackingStatus,
};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Describes the browser. This must be the first message sent on the connection.
    Init {
        #[serde(default)]
        timezone: Option<String>,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        screen_width: Option<u32>,
        #[serde(default)]
        screen_height: Option<u32>,
        /// Size of the element the map is rendered into, if already laid out.
        #[serde(default)]
        map_width: u32,
        #[serde(default)]
        map_height: u32,
    },

    /// A fix from the browser's position watch.
    Position {
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        timestamp: i64,
    },

    /// A failure from the browser's position watch, with the platform's numeric code.
    PositionError { code: u16, message: String },

    /// The user's answer to the consent prompt.
    ConsentDecision { granted: bool },

    /// The map element was laid out or resized.
    MapContainer { width: u32, height: u32 },

    /// The current tile source failed to load.
    TileError,

    /// The user logged out; tracking stops and the connection closes.
    Logout,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current state of the tracking session.
    SessionStatus {
        status: TrackingStatus,
        consent_checked: bool,
    },

    /// Ask the user whether their location may be tracked.
    ConsentPrompt,

    /// Tracking started; the browser should start its position watch.
    TrackingStarted { device: DeviceFingerprint },

    /// Tracking stopped; the browser should clear its position watch.
    TrackingStopped,

    TrackingUnavailable { reason: String },

    /// A fix accepted by the tracking session.
    Sample { sample: PositionSample },

    /// A non-fatal geolocation failure.
    LocationError {
        kind: PositionErrorKind,
        message: String,
    },

    /// Location access is blocked; shown once with instructions.
    PermissionDenied { message: String },

    MapCreated {
        latitude: f64,
        longitude: f64,
        zoom: u8,
        tile_url: String,
    },

    MarkerPlaced {
        id: String,
        label: String,
        kind: MarkerKind,
        sample: PositionSample,
    },

    MarkerRemoved { id: String },

    ViewSet {
        latitude: f64,
        longitude: f64,
        zoom: u8,
    },

    TileSourceChanged { tile_url: String },

    MapDestroyed,

    /// Reports a protocol error to the client.
    Error { message: String },
}
