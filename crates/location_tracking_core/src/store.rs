//! crates/location_tracking_core/src/store.rs
//!
//! Never-failing wrappers over the `KeyValueStore` port. Location tracking is
//! an auxiliary feature, so storage problems are logged and degrade to
//! "nothing stored" instead of propagating.

use crate::domain::{ConsentRecord, PositionSample, UserStatus};
use crate::ports::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const CONSENT_KEY: &str = "locationConsent";
const LAST_LOCATION_KEY: &str = "lastLocation";
const USER_STATUS_KEY: &str = "userStatus";

fn scoped_key(prefix: &str, user_id: &str) -> String {
    format!("{}:{}", prefix, user_id)
}

//=========================================================================================
// Stored Encodings
//=========================================================================================

#[derive(Serialize, Deserialize)]
struct StoredConsent {
    granted: bool,
    decided_at: DateTime<Utc>,
}

//=========================================================================================
// Consent Store
//=========================================================================================

#[derive(Clone)]
pub struct ConsentStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ConsentStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Returns the last decision for `user_id`.
    ///
    /// Read and decode failures are reported as `None`, so the caller re-prompts
    /// rather than silently tracking.
    pub async fn load(&self, user_id: &str) -> Option<ConsentRecord> {
        let raw = match self.kv.get(&scoped_key(CONSENT_KEY, user_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to read location consent");
                return None;
            }
        };

        match serde_json::from_str::<StoredConsent>(&raw) {
            Ok(stored) => Some(ConsentRecord {
                user_id: user_id.to_string(),
                granted: stored.granted,
                decided_at: stored.decided_at,
            }),
            Err(e) => {
                warn!(user_id, error = %e, "Discarding unreadable location consent record");
                None
            }
        }
    }

    /// Upserts the decision. Returns `false` if it could not be persisted.
    pub async fn save(&self, user_id: &str, granted: bool) -> bool {
        let stored = StoredConsent {
            granted,
            decided_at: Utc::now(),
        };
        let encoded = match serde_json::to_string(&stored) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to encode location consent");
                return false;
            }
        };

        match self.kv.set(&scoped_key(CONSENT_KEY, user_id), &encoded).await {
            Ok(()) => {
                debug!(user_id, granted, "Location consent saved");
                true
            }
            Err(e) => {
                warn!(user_id, granted, error = %e, "Failed to persist location consent");
                false
            }
        }
    }
}

//=========================================================================================
// Location Cache
//=========================================================================================

/// Keeps the most recent sample and presence flag of each user.
#[derive(Clone)]
pub struct LocationCache {
    kv: Arc<dyn KeyValueStore>,
}

impl LocationCache {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn record_sample(&self, user_id: &str, sample: &PositionSample) -> bool {
        let encoded = match serde_json::to_string(sample) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to encode last location");
                return false;
            }
        };
        match self
            .kv
            .set(&scoped_key(LAST_LOCATION_KEY, user_id), &encoded)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to persist last location");
                false
            }
        }
    }

    pub async fn last_location(&self, user_id: &str) -> Option<PositionSample> {
        match self.kv.get(&scoped_key(LAST_LOCATION_KEY, user_id)).await {
            Ok(Some(raw)) => serde_json::from_str::<PositionSample>(&raw)
                .map_err(|e| warn!(user_id, error = %e, "Discarding unreadable last location"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to read last location");
                None
            }
        }
    }

    pub async fn set_status(&self, user_id: &str, status: UserStatus) -> bool {
        match self
            .kv
            .set(&scoped_key(USER_STATUS_KEY, user_id), status.as_str())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, status = status.as_str(), error = %e, "Failed to persist user status");
                false
            }
        }
    }

    pub async fn status(&self, user_id: &str) -> Option<UserStatus> {
        match self.kv.get(&scoped_key(USER_STATUS_KEY, user_id)).await {
            Ok(Some(raw)) => match raw.as_str() {
                "online" => Some(UserStatus::Online),
                "offline" => Some(UserStatus::Offline),
                _ => None,
            },
            Ok(None) => None,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to read user status");
                None
            }
        }
    }
}
