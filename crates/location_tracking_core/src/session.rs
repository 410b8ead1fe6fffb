//! crates/location_tracking_core/src/session.rs
//!
//! The tracking session controller. It decides on load whether to resume
//! tracking silently, ask for consent, or stay idle, owns the single poller
//! watch, and relays samples, errors and lifecycle events to subscribers.
//!
//! One `TrackingSession` is built by the application root per login and shared
//! by cloning the handle. All state transitions happen under one short-lived
//! lock that is never held across an `.await` or while listeners run.

use crate::domain::{
    AmbientEnvironment, LocateError, PositionError, PositionSample, SessionEvent,
    TrackingStatus, UserStatus, WatchOptions,
};
use crate::fingerprint;
use crate::listeners::{lock, ListenerRegistry, Subscription};
use crate::poller::GeolocationPoller;
use crate::ports::{GeolocationPlatform, KeyValueStore};
use crate::store::{ConsentStore, LocationCache};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PERMISSION_DENIED_HELP: &str = "Location access is blocked. Allow location for this site in your browser settings, then reload the page to resume tracking.";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long after load the consent prompt is requested.
    pub prompt_delay: Duration,
    pub watch: WatchOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt_delay: Duration::from_secs(2),
            watch: WatchOptions::CONTINUOUS,
        }
    }
}

/// Result of `record_consent`. The decision takes effect even when `persisted` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentOutcome {
    pub status: TrackingStatus,
    pub persisted: bool,
}

struct SessionState {
    status: TrackingStatus,
    consent_checked: bool,
    user_id: Option<String>,
    latest: Option<PositionSample>,
    /// Bumped by `stop`; work started before a stop compares against it.
    generation: u64,
    /// Bumped whenever a watch starts; readings from older watches are dropped.
    watch_epoch: u64,
    writer_spawned: bool,
}

struct SessionInner {
    consent: ConsentStore,
    locations: LocationCache,
    poller: GeolocationPoller,
    environment: Mutex<AmbientEnvironment>,
    prompt_delay: Duration,
    state: Mutex<SessionState>,
    last_location: watch::Sender<Option<(String, PositionSample)>>,
    samples: ListenerRegistry<PositionSample>,
    errors: ListenerRegistry<PositionError>,
    events: ListenerRegistry<SessionEvent>,
}

#[derive(Clone)]
pub struct TrackingSession {
    inner: Arc<SessionInner>,
}

impl TrackingSession {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        platform: Arc<dyn GeolocationPlatform>,
        config: SessionConfig,
    ) -> Self {
        let (last_location, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                consent: ConsentStore::new(kv.clone()),
                locations: LocationCache::new(kv),
                poller: GeolocationPoller::new(platform, config.watch),
                environment: Mutex::new(AmbientEnvironment::default()),
                prompt_delay: config.prompt_delay,
                state: Mutex::new(SessionState {
                    status: TrackingStatus::Idle,
                    consent_checked: false,
                    user_id: None,
                    latest: None,
                    generation: 0,
                    watch_epoch: 0,
                    writer_spawned: false,
                }),
                last_location,
                samples: ListenerRegistry::new(),
                errors: ListenerRegistry::new(),
                events: ListenerRegistry::new(),
            }),
        }
    }

    /// Sets what the next `TrackingStarted` fingerprint is collected from.
    pub fn set_environment(&self, environment: AmbientEnvironment) {
        *lock(&self.inner.environment) = environment;
    }

    //=====================================================================================
    // Lifecycle
    //=====================================================================================

    /// Evaluates stored consent once per login.
    ///
    /// Granted consent resumes tracking immediately. Otherwise the session
    /// waits for a decision and asks subscribers to prompt after the
    /// configured delay.
    pub async fn initialize(&self, user_id: &str) -> TrackingStatus {
        let generation = {
            let mut state = lock(&self.inner.state);
            if state.consent_checked {
                debug!(user_id, status = ?state.status, "Consent already checked, skipping");
                return state.status;
            }
            state.consent_checked = true;
            state.status = TrackingStatus::CheckingConsent;
            state.user_id = Some(user_id.to_string());
            state.generation
        };

        let granted = self
            .inner
            .consent
            .load(user_id)
            .await
            .map(|record| record.granted)
            .unwrap_or(false);

        {
            let mut state = lock(&self.inner.state);
            if state.generation != generation || state.status != TrackingStatus::CheckingConsent {
                debug!(user_id, status = ?state.status, "Consent check superseded");
                return state.status;
            }
            if !granted {
                state.status = TrackingStatus::AwaitingConsent;
            }
        }

        if granted {
            info!(user_id, "Stored consent found, resuming location tracking");
            self.activate(user_id).await
        } else {
            info!(user_id, "No location consent on record, prompt scheduled");
            self.schedule_prompt(user_id.to_string(), generation);
            TrackingStatus::AwaitingConsent
        }
    }

    /// Applies and persists a consent decision. Repeating a decision is harmless.
    pub async fn record_consent(&self, user_id: &str, granted: bool) -> ConsentOutcome {
        let generation = lock(&self.inner.state).generation;

        let persisted = self.inner.consent.save(user_id, granted).await;
        if !persisted {
            warn!(user_id, granted, "Consent not persisted, applying it for this session only");
        }

        {
            let mut state = lock(&self.inner.state);
            if state.generation != generation {
                info!(user_id, "Session stopped while saving consent, decision not applied");
                return ConsentOutcome {
                    status: state.status,
                    persisted,
                };
            }
            state.consent_checked = true;
            state.user_id = Some(user_id.to_string());
        }

        let status = if granted {
            self.activate(user_id).await
        } else {
            info!(user_id, "Location consent declined");
            self.halt();
            TrackingStatus::Stopped
        };
        ConsentOutcome { status, persisted }
    }

    /// Stops tracking and forgets that consent was checked, so the next login
    /// evaluates it again. No sample reaches listeners after this returns.
    pub fn stop(&self) {
        let was_active = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.consent_checked = false;
            state.latest = None;
            state.user_id = None;
            let was_active = state.status == TrackingStatus::Active;
            state.status = TrackingStatus::Stopped;
            was_active
        };
        self.inner.poller.stop();
        self.inner.last_location.send_replace(None);
        if was_active {
            self.inner.events.emit(&SessionEvent::TrackingStopped);
        }
        info!("Location tracking session stopped");
    }

    /// Tears the session down on logout: stops, drops every listener and marks
    /// the user offline.
    pub async fn logout(&self) {
        let user_id = lock(&self.inner.state).user_id.clone();
        self.stop();
        self.inner.samples.clear();
        self.inner.errors.clear();
        self.inner.events.clear();
        if let Some(user_id) = user_id {
            self.inner.locations.set_status(&user_id, UserStatus::Offline).await;
        }
    }

    /// Records that consent was handled elsewhere, suppressing the prompt.
    pub fn mark_consent_checked(&self) {
        lock(&self.inner.state).consent_checked = true;
    }

    //=====================================================================================
    // Queries
    //=====================================================================================

    pub fn status(&self) -> TrackingStatus {
        lock(&self.inner.state).status
    }

    pub fn is_consent_checked(&self) -> bool {
        lock(&self.inner.state).consent_checked
    }

    pub fn user_id(&self) -> Option<String> {
        lock(&self.inner.state).user_id.clone()
    }

    /// The most recent sample of the active session, for subscribers that
    /// arrive after it was delivered.
    pub fn latest_sample(&self) -> Option<PositionSample> {
        lock(&self.inner.state).latest
    }

    /// Reads the position once. Only allowed while tracking is active.
    pub async fn current_position(&self) -> Result<PositionSample, LocateError> {
        if self.status() != TrackingStatus::Active {
            return Err(LocateError::NotActive);
        }
        let sample = self.inner.poller.current_position().await?;

        let mut state = lock(&self.inner.state);
        if state.status == TrackingStatus::Active
            && state.latest.map_or(true, |latest| latest.timestamp < sample.timestamp)
        {
            state.latest = Some(sample);
        }
        Ok(sample)
    }

    //=====================================================================================
    // Subscriptions
    //=====================================================================================

    pub fn on_sample<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PositionSample) + Send + Sync + 'static,
    {
        self.inner.samples.subscribe(listener)
    }

    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PositionError) + Send + Sync + 'static,
    {
        self.inner.errors.subscribe(listener)
    }

    pub fn on_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    //=====================================================================================
    // Internal transitions
    //=====================================================================================

    async fn activate(&self, user_id: &str) -> TrackingStatus {
        let (epoch, spawn_writer) = {
            let mut state = lock(&self.inner.state);
            if state.status == TrackingStatus::Active {
                debug!(user_id, "Tracking already active");
                return TrackingStatus::Active;
            }
            state.status = TrackingStatus::Active;
            state.watch_epoch += 1;
            let spawn_writer = !state.writer_spawned;
            state.writer_spawned = true;
            (state.watch_epoch, spawn_writer)
        };

        if spawn_writer {
            self.spawn_location_writer();
        }

        let on_sample = {
            let weak = Arc::downgrade(&self.inner);
            move |sample| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver_sample(epoch, sample);
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(&self.inner);
            move |error| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver_error(epoch, error);
                }
            }
        };

        match self.inner.poller.start(on_sample, on_error) {
            Ok(_) => {
                let still_current = {
                    let state = lock(&self.inner.state);
                    state.status == TrackingStatus::Active && state.watch_epoch == epoch
                };
                if !still_current {
                    debug!(user_id, "Session stopped while the watch was starting");
                    return self.status();
                }

                let device = fingerprint::collect(&lock(&self.inner.environment));
                info!(
                    user_id,
                    browser = %device.browser,
                    os = %device.os,
                    device_type = ?device.device_type,
                    "Location tracking started"
                );
                self.inner.events.emit(&SessionEvent::TrackingStarted {
                    user_id: user_id.to_string(),
                    device,
                });
                self.inner.locations.set_status(user_id, UserStatus::Online).await;
                self.status()
            }
            Err(e) => {
                warn!(user_id, error = %e, "Platform refused to start a position watch");
                {
                    let mut state = lock(&self.inner.state);
                    if state.watch_epoch == epoch && state.status == TrackingStatus::Active {
                        state.status = TrackingStatus::Error;
                    }
                }
                self.inner.events.emit(&SessionEvent::TrackingUnavailable {
                    reason: e.to_string(),
                });
                let mut state = lock(&self.inner.state);
                if state.status == TrackingStatus::Error {
                    state.status = TrackingStatus::Stopped;
                }
                state.status
            }
        }
    }

    /// Leaves `Active` without ending the login, e.g. after a decline.
    fn halt(&self) {
        let was_active = {
            let mut state = lock(&self.inner.state);
            let was_active = state.status == TrackingStatus::Active;
            state.status = TrackingStatus::Stopped;
            state.latest = None;
            was_active
        };
        self.inner.poller.stop();
        if was_active {
            self.inner.events.emit(&SessionEvent::TrackingStopped);
        }
    }

    fn schedule_prompt(&self, user_id: String, generation: u64) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.prompt_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let still_waiting = {
                let state = lock(&inner.state);
                state.generation == generation && state.status == TrackingStatus::AwaitingConsent
            };
            if still_waiting {
                debug!(user_id = %user_id, "Requesting location consent prompt");
                inner
                    .events
                    .emit(&SessionEvent::ConsentPromptRequested { user_id });
            }
        });
    }

    /// Persists the latest sample in the background. Only the newest value is
    /// kept, so a slow store never queues up stale positions.
    fn spawn_location_writer(&self) {
        let mut rx = self.inner.last_location.subscribe();
        let locations = self.inner.locations.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let latest = rx.borrow_and_update().clone();
                if let Some((user_id, sample)) = latest {
                    locations.record_sample(&user_id, &sample).await;
                }
            }
        });
    }
}

impl SessionInner {
    fn deliver_sample(&self, epoch: u64, sample: PositionSample) {
        let user_id = {
            let mut state = lock(&self.state);
            if state.status != TrackingStatus::Active || state.watch_epoch != epoch {
                debug!("Dropping position sample delivered after tracking stopped");
                return;
            }
            state.latest = Some(sample);
            state.user_id.clone()
        };

        self.samples.emit(&sample);
        if let Some(user_id) = user_id {
            self.last_location.send_replace(Some((user_id, sample)));
        }
    }

    fn deliver_error(&self, epoch: u64, error: PositionError) {
        let terminal = {
            let mut state = lock(&self.state);
            if state.status != TrackingStatus::Active || state.watch_epoch != epoch {
                return;
            }
            let terminal = error.kind.is_terminal();
            if terminal {
                state.status = TrackingStatus::Error;
                state.latest = None;
            }
            terminal
        };

        warn!(kind = %error.kind, message = %error.message, "Geolocation error");
        self.errors.emit(&error);

        if terminal {
            self.poller.stop();
            {
                let mut state = lock(&self.state);
                if state.status == TrackingStatus::Error {
                    state.status = TrackingStatus::Stopped;
                }
            }
            self.events.emit(&SessionEvent::PermissionDenied {
                message: PERMISSION_DENIED_HELP.to_string(),
            });
        }
    }
}
