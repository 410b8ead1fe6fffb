//! crates/location_tracking_core/src/poller.rs
//!
//! Wraps the platform's continuous position watch behind a start/stop
//! lifecycle. At most one platform watch is held at a time; failures are
//! reported to the caller and never retried here.

use crate::domain::{PositionError, PositionErrorKind, PositionSample, WatchOptions};
use crate::listeners::lock;
use crate::ports::{GeolocationPlatform, PlatformError, PortResult, WatchCallback, WatchId};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Watching(WatchId),
}

pub struct GeolocationPoller {
    platform: Arc<dyn GeolocationPlatform>,
    options: WatchOptions,
    state: Mutex<PollerState>,
}

impl GeolocationPoller {
    pub fn new(platform: Arc<dyn GeolocationPlatform>, options: WatchOptions) -> Self {
        Self {
            platform,
            options,
            state: Mutex::new(PollerState::Stopped),
        }
    }

    /// Starts watching. While already watching this is a no-op returning the
    /// existing handle, and the new callbacks are dropped.
    pub fn start<S, E>(&self, on_sample: S, on_error: E) -> PortResult<WatchId>
    where
        S: Fn(PositionSample) + Send + Sync + 'static,
        E: Fn(PositionError) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        if let PollerState::Watching(id) = *state {
            debug!(watch_id = id.0, "Position watch already running");
            return Ok(id);
        }

        let callback: WatchCallback = Arc::new(move |reading| match reading {
            Ok(sample) => on_sample(sample),
            Err(e) => on_error(map_platform_error(e)),
        });

        // On failure the state stays `Stopped`.
        let id = self.platform.watch_position(self.options, callback)?;
        *state = PollerState::Watching(id);
        info!(
            watch_id = id.0,
            timeout_ms = self.options.timeout.as_millis() as u64,
            maximum_age_ms = self.options.maximum_age.as_millis() as u64,
            "Position watch started"
        );
        Ok(id)
    }

    /// Cancels the watch if there is one.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), PollerState::Stopped);
        if let PollerState::Watching(id) = previous {
            self.platform.clear_watch(id);
            info!(watch_id = id.0, "Position watch stopped");
        }
    }

    pub fn state(&self) -> PollerState {
        *lock(&self.state)
    }

    pub fn is_watching(&self) -> bool {
        matches!(self.state(), PollerState::Watching(_))
    }

    /// A single read that accepts fixes up to a minute old.
    pub async fn current_position(&self) -> Result<PositionSample, PositionError> {
        self.platform
            .get_current_position(WatchOptions::ONE_SHOT)
            .await
            .map_err(map_platform_error)
    }
}

pub(crate) fn map_platform_error(e: PlatformError) -> PositionError {
    let kind = PositionErrorKind::from_code(e.code).unwrap_or_else(|| {
        warn!(code = e.code, "Unknown geolocation error code, treating as unavailable");
        PositionErrorKind::PositionUnavailable
    });
    PositionError {
        kind,
        message: e.message,
    }
}
