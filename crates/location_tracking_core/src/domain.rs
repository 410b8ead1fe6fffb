//! crates/location_tracking_core/src/domain.rs
//!
//! Defines the core data structures of the location tracking subsystem.
//! Persistence encodings live next to the stores that write them; these types
//! only carry serde derives where they cross the WebSocket or REST boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Literal used for every fingerprint field that cannot be determined.
pub const UNKNOWN: &str = "Unknown";

//=========================================================================================
// Consent
//=========================================================================================

/// A subject's decision about continuous location collection.
///
/// At most one record exists per `user_id`; a new decision replaces the old one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentRecord {
    pub user_id: String,
    pub granted: bool,
    pub decided_at: DateTime<Utc>,
}

//=========================================================================================
// Device Fingerprint
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

/// Best-effort description of the device a session was started from.
/// Recomputed whenever needed, never stored as an entity of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub user_agent: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub device_type: DeviceType,
    pub screen_resolution: String,
    pub timezone: String,
    pub language: String,
}

/// The raw runtime facts the fingerprint collector reads from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmbientEnvironment {
    pub user_agent: Option<String>,
    pub screen: Option<(u32, u32)>,
    pub timezone: Option<String>,
    pub language: Option<String>,
}

//=========================================================================================
// Positions
//=========================================================================================

/// One position reading. `accuracy` is in meters, `timestamp` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp: i64,
}

/// The last known sample of somebody other than the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerLocation {
    pub user_id: String,
    pub display_name: String,
    pub sample: PositionSample,
}

/// Options passed to the platform for continuous and one-shot reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl WatchOptions {
    /// Continuous watch: accept fixes up to 30s old, 10s per request.
    pub const CONTINUOUS: WatchOptions = WatchOptions {
        enable_high_accuracy: true,
        timeout: Duration::from_secs(10),
        maximum_age: Duration::from_secs(30),
    };

    /// One-shot read: accept fixes up to 60s old, 10s per request.
    pub const ONE_SHOT: WatchOptions = WatchOptions {
        enable_high_accuracy: true,
        timeout: Duration::from_secs(10),
        maximum_age: Duration::from_secs(60),
    };
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::CONTINUOUS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

impl PositionErrorKind {
    /// Maps the platform's numeric error codes. Unknown codes yield `None`.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::PermissionDenied),
            2 => Some(Self::PositionUnavailable),
            3 => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::PermissionDenied => 1,
            Self::PositionUnavailable => 2,
            Self::Timeout => 3,
        }
    }

    /// Only a permission denial ends the session; the others are transient.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PermissionDenied)
    }
}

impl fmt::Display for PositionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PermissionDenied => "permission_denied",
            Self::PositionUnavailable => "position_unavailable",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PositionError {
    pub kind: PositionErrorKind,
    pub message: String,
}

/// Why a one-shot position read produced no sample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    /// The session is not tracking, so the device is not asked at all.
    #[error("location tracking is not active for this session")]
    NotActive,
    #[error(transparent)]
    Position(#[from] PositionError),
}

//=========================================================================================
// Session
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Idle,
    CheckingConsent,
    AwaitingConsent,
    Active,
    Stopped,
    Error,
}

/// Presence flag persisted alongside the last location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Offline,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Lifecycle notifications relayed to whoever drives the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// No usable consent on record; the UI should ask.
    ConsentPromptRequested { user_id: String },
    TrackingStarted { user_id: String, device: DeviceFingerprint },
    TrackingStopped,
    /// Shown once; tracking will not resume until the user changes browser settings.
    PermissionDenied { message: String },
    /// The platform refused to start a watch at all.
    TrackingUnavailable { reason: String },
}
