pub mod domain;
pub mod fingerprint;
pub mod listeners;
pub mod map;
pub mod poller;
pub mod ports;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use domain::{
    AmbientEnvironment, ConsentRecord, DeviceFingerprint, DeviceType, LocateError, PeerLocation,
    PositionError, PositionErrorKind, PositionSample, SessionEvent, TrackingStatus, UserStatus,
    WatchOptions,
};
pub use listeners::{ListenerRegistry, Subscription, SubscriptionId};
pub use map::{MapConfig, MapPresenter};
pub use poller::{GeolocationPoller, PollerState};
pub use ports::{
    GeoPoint, GeolocationPlatform, KeyValueStore, MapError, MapWidget, Marker, MarkerKind,
    PlatformError, PlatformReading, PortError, PortResult, WatchCallback, WatchId,
};
pub use session::{ConsentOutcome, SessionConfig, TrackingSession};
pub use store::{ConsentStore, LocationCache};
