//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-user tracking sessions.

use crate::adapters::DeviceFeed;
use crate::config::Config;
use location_tracking_core::{
    KeyValueStore, LocationCache, PeerLocation, SessionConfig, TrackingSession,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KeyValueStore>,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: Arc<Config>) -> Self {
        let sessions = Arc::new(SessionRegistry::new(kv.clone(), config.session_config()));
        Self { kv, config, sessions }
    }
}

/// The authenticated caller, as established by the upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: String,
}

//=========================================================================================
// SessionRegistry (One Tracking Session Per Logged-In User)
//=========================================================================================

/// Everything the server keeps for one logged-in user: the session controller
/// and the device feed that stands in for that user's geolocation platform.
#[derive(Clone)]
pub struct UserTracking {
    pub session: TrackingSession,
    pub device: Arc<DeviceFeed>,
    pub display_name: String,
    /// Cancelled once the session leaves the registry. Connections holding
    /// this handle must stop driving it.
    pub ended: CancellationToken,
}

impl UserTracking {
    fn is_same(&self, other: &UserTracking) -> bool {
        Arc::ptr_eq(&self.device, &other.device)
    }
}

struct RegistryEntry {
    tracking: UserTracking,
    connections: usize,
}

pub struct SessionRegistry {
    kv: Arc<dyn KeyValueStore>,
    locations: LocationCache,
    session_config: SessionConfig,
    sessions: Mutex<HashMap<String, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>, session_config: SessionConfig) -> Self {
        Self {
            locations: LocationCache::new(kv.clone()),
            kv,
            session_config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the user's session, creating it on first use after login.
    pub async fn get_or_create(&self, user: &CurrentUser) -> UserTracking {
        let mut sessions = self.sessions.lock().await;
        self.entry(&mut sessions, user).tracking.clone()
    }

    /// Like `get_or_create`, and counts an open device connection against the session.
    pub async fn connect(&self, user: &CurrentUser) -> UserTracking {
        let mut sessions = self.sessions.lock().await;
        let entry = self.entry(&mut sessions, user);
        entry.connections += 1;
        debug!(user_id = %user.id, connections = entry.connections, "Device connection opened");
        entry.tracking.clone()
    }

    /// Releases a connection taken with `connect`. When the last connection of a
    /// session goes away the session is ended as if the user had logged out.
    /// Returns whether it was ended.
    pub async fn disconnect(&self, user_id: &str, tracking: &UserTracking) -> bool {
        let ended = {
            let mut sessions = self.sessions.lock().await;
            let Some(entry) = sessions.get_mut(user_id) else {
                return false;
            };
            if !entry.tracking.is_same(tracking) {
                return false;
            }
            entry.connections = entry.connections.saturating_sub(1);
            if entry.connections > 0 {
                return false;
            }
            sessions.remove(user_id)
        };

        match ended {
            Some(entry) => {
                info!(user_id, "Last device connection closed, ending tracking session");
                entry.tracking.ended.cancel();
                entry.tracking.session.logout().await;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<UserTracking> {
        self.sessions
            .lock()
            .await
            .get(user_id)
            .map(|entry| entry.tracking.clone())
    }

    /// Forgets the user's session and tells every connection still holding it
    /// to close. The caller is expected to log the session out.
    pub async fn remove(&self, user_id: &str) -> Option<UserTracking> {
        let removed = self.sessions.lock().await.remove(user_id);
        removed.map(|entry| {
            entry.tracking.ended.cancel();
            info!(user_id, "Tracking session removed");
            entry.tracking
        })
    }

    fn entry<'a>(
        &self,
        sessions: &'a mut HashMap<String, RegistryEntry>,
        user: &CurrentUser,
    ) -> &'a mut RegistryEntry {
        sessions.entry(user.id.clone()).or_insert_with(|| {
            let device = Arc::new(DeviceFeed::new());
            info!(user_id = %user.id, "Tracking session created");
            RegistryEntry {
                tracking: UserTracking {
                    session: TrackingSession::new(
                        self.kv.clone(),
                        device.clone(),
                        self.session_config.clone(),
                    ),
                    device,
                    display_name: user.display_name.clone(),
                    ended: CancellationToken::new(),
                },
                connections: 0,
            }
        })
    }

    /// Last known positions of every other logged-in user. Live samples win;
    /// otherwise the persisted last location is used.
    pub async fn peers(&self, exclude_user_id: &str) -> Vec<PeerLocation> {
        let others: Vec<(String, UserTracking)> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_user_id)
            .map(|(id, entry)| (id.clone(), entry.tracking.clone()))
            .collect();

        let mut peers = Vec::with_capacity(others.len());
        for (user_id, tracking) in others {
            let sample = match tracking.session.latest_sample() {
                Some(sample) => Some(sample),
                None => self.locations.last_location(&user_id).await,
            };
            if let Some(sample) = sample {
                peers.push(PeerLocation {
                    user_id,
                    display_name: tracking.display_name,
                    sample,
                });
            }
        }
        peers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use location_tracking_core::{PositionSample, TrackingStatus};

    fn user(id: &str) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            display_name: format!("User {}", id),
        }
    }

    #[tokio::test]
    async fn same_user_gets_same_session() {
        let registry = SessionRegistry::new(Arc::new(MemoryStore::new()), SessionConfig::default());
        let a = registry.get_or_create(&user("u1")).await;
        a.session.mark_consent_checked();

        let b = registry.get_or_create(&user("u1")).await;
        assert!(b.session.is_consent_checked());
        assert!(Arc::ptr_eq(&a.device, &b.device));
    }

    #[tokio::test(start_paused = true)]
    async fn peers_exclude_caller_and_use_live_samples() {
        let registry = SessionRegistry::new(Arc::new(MemoryStore::new()), SessionConfig::default());
        let me = registry.get_or_create(&user("u1")).await;
        let other = registry.get_or_create(&user("u2")).await;
        let _silent = registry.get_or_create(&user("u3")).await;

        assert_eq!(
            other.session.record_consent("u2", true).await.status,
            TrackingStatus::Active
        );
        let fix = PositionSample { latitude: 17.4771, longitude: 78.5724, accuracy: 20.0, timestamp: 1 };
        other.device.report(Ok(fix));

        let peers = registry.peers("u1").await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].user_id, "u2");
        assert_eq!(peers[0].display_name, "User u2");
        assert_eq!(peers[0].sample, fix);

        assert!(registry.peers("u2").await.is_empty());
        drop(me);
    }

    #[tokio::test]
    async fn remove_forgets_session_and_ends_held_handles() {
        let registry = SessionRegistry::new(Arc::new(MemoryStore::new()), SessionConfig::default());
        let held = registry.connect(&user("u1")).await;
        assert!(!held.ended.is_cancelled());

        assert!(registry.remove("u1").await.is_some());
        assert!(held.ended.is_cancelled());
        assert!(registry.remove("u1").await.is_none());
        assert!(registry.get("u1").await.is_none());

        // A fresh login gets a new session; the old connection's disconnect leaves it alone.
        let fresh = registry.get_or_create(&user("u1")).await;
        assert!(!fresh.is_same(&held));
        assert!(!registry.disconnect("u1", &held).await);
        assert!(registry.get("u1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn last_connection_closing_ends_the_session() {
        let kv = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(kv.clone(), SessionConfig::default());
        let first = registry.connect(&user("u1")).await;
        let second = registry.connect(&user("u1")).await;
        first.session.record_consent("u1", true).await;
        assert_eq!(first.device.active_watches(), 1);

        assert!(!registry.disconnect("u1", &second).await);
        assert_eq!(first.device.active_watches(), 1);
        assert_eq!(first.session.status(), TrackingStatus::Active);

        assert!(registry.disconnect("u1", &first).await);
        assert_eq!(first.device.active_watches(), 0);
        assert_eq!(first.session.status(), TrackingStatus::Stopped);
        assert!(first.ended.is_cancelled());
        assert!(registry.get("u1").await.is_none());
        assert_eq!(
            LocationCache::new(kv).status("u1").await,
            Some(location_tracking_core::UserStatus::Offline)
        );
    }
}
