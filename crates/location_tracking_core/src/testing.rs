//! Test doubles for the core ports.

use crate::domain::{PositionSample, WatchOptions};
use crate::listeners::lock;
use crate::ports::{
    GeoPoint, GeolocationPlatform, KeyValueStore, MapError, MapWidget, Marker, PlatformError,
    PlatformReading, PortError, PortResult, WatchCallback, WatchId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn sample(latitude: f64, longitude: f64, timestamp: i64) -> PositionSample {
    PositionSample {
        latitude,
        longitude,
        accuracy: 20.0,
        timestamp,
    }
}

//=========================================================================================
// Key-Value Stores
//=========================================================================================

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// An in-memory store whose every call takes `delay` of (tokio) time.
pub struct DelayedStore {
    inner: MemoryStore,
    delay: Duration,
}

impl DelayedStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::default(),
            delay,
        }
    }
}

#[async_trait]
impl KeyValueStore for DelayedStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value).await
    }
}

pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> PortResult<Option<String>> {
        Err(PortError::Unexpected("storage offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str) -> PortResult<()> {
        Err(PortError::Unexpected("storage offline".to_string()))
    }
}

//=========================================================================================
// Positioning Platform
//=========================================================================================

#[derive(Default)]
struct PlatformState {
    next_id: u64,
    watches: HashMap<WatchId, WatchCallback>,
    watch_calls: usize,
    clear_calls: usize,
    last_options: Option<WatchOptions>,
    refuse_watch: bool,
    watch_delay: Option<Duration>,
    one_shot: Option<PlatformReading>,
}

/// A platform whose readings are fired by the test.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn watch_calls(&self) -> usize {
        lock(&self.state).watch_calls
    }

    pub fn clear_calls(&self) -> usize {
        lock(&self.state).clear_calls
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.state).watches.len()
    }

    pub fn last_options(&self) -> Option<WatchOptions> {
        lock(&self.state).last_options
    }

    pub fn refuse_watches(&self) {
        lock(&self.state).refuse_watch = true;
    }

    /// Makes `watch_position` block the calling thread, like a slow platform call.
    pub fn set_watch_delay(&self, delay: Duration) {
        lock(&self.state).watch_delay = Some(delay);
    }

    pub fn set_one_shot(&self, reading: PlatformReading) {
        lock(&self.state).one_shot = Some(reading);
    }

    /// Delivers a reading to every active watch, like the platform would.
    pub fn fire(&self, reading: PlatformReading) {
        let callbacks: Vec<WatchCallback> = lock(&self.state).watches.values().cloned().collect();
        for callback in callbacks {
            callback(reading.clone());
        }
    }

    pub fn fire_sample(&self, sample: PositionSample) {
        self.fire(Ok(sample));
    }

    pub fn fire_error(&self, code: u16) {
        self.fire(Err(PlatformError {
            code,
            message: format!("platform error {}", code),
        }));
    }

    /// Fires into a watch even after it was cleared, mimicking a callback that
    /// was already queued when cancellation happened.
    pub fn capture_callback(&self) -> Option<WatchCallback> {
        lock(&self.state).watches.values().next().cloned()
    }
}

#[async_trait]
impl GeolocationPlatform for FakePlatform {
    fn watch_position(&self, options: WatchOptions, callback: WatchCallback) -> PortResult<WatchId> {
        let delay = lock(&self.state).watch_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = lock(&self.state);
        state.watch_calls += 1;
        state.last_options = Some(options);
        if state.refuse_watch {
            return Err(PortError::Unsupported("geolocation".to_string()));
        }
        let id = WatchId(state.next_id);
        state.next_id += 1;
        state.watches.insert(id, callback);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        let mut state = lock(&self.state);
        state.clear_calls += 1;
        state.watches.remove(&id);
    }

    async fn get_current_position(&self, options: WatchOptions) -> PlatformReading {
        let mut state = lock(&self.state);
        state.last_options = Some(options);
        state.one_shot.take().unwrap_or(Err(PlatformError {
            code: 2,
            message: "no fix".to_string(),
        }))
    }
}

//=========================================================================================
// Map Widget
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetCall {
    Create { center: GeoPoint, zoom: u8, tile_url: String },
    PlaceMarker(Marker),
    RemoveMarker(String),
    SetView(GeoPoint, u8),
    SetTileSource(String),
    Destroy,
}

#[derive(Default)]
pub struct WidgetLog {
    pub calls: Vec<WidgetCall>,
    pub container_ready: bool,
    pub created: bool,
}

/// A map widget that records calls and enforces the single-create rule.
#[derive(Clone)]
pub struct FakeWidget {
    pub log: Arc<Mutex<WidgetLog>>,
}

impl FakeWidget {
    pub fn ready() -> Self {
        let widget = Self { log: Arc::new(Mutex::new(WidgetLog::default())) };
        lock(&widget.log).container_ready = true;
        widget
    }

    pub fn zero_sized() -> Self {
        Self { log: Arc::new(Mutex::new(WidgetLog::default())) }
    }

    pub fn calls(&self) -> Vec<WidgetCall> {
        lock(&self.log).calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&WidgetCall) -> bool) -> usize {
        lock(&self.log).calls.iter().filter(|c| pred(c)).count()
    }

    pub fn set_ready(&self) {
        lock(&self.log).container_ready = true;
    }
}

impl MapWidget for FakeWidget {
    fn is_container_ready(&self) -> bool {
        lock(&self.log).container_ready
    }

    fn create(&mut self, center: GeoPoint, zoom: u8, tile_url: &str) -> Result<(), MapError> {
        let mut log = lock(&self.log);
        if !log.container_ready {
            return Err(MapError::ContainerNotReady);
        }
        if log.created {
            return Err(MapError::AlreadyInitialized);
        }
        log.created = true;
        log.calls.push(WidgetCall::Create {
            center,
            zoom,
            tile_url: tile_url.to_string(),
        });
        Ok(())
    }

    fn place_marker(&mut self, marker: &Marker) {
        lock(&self.log).calls.push(WidgetCall::PlaceMarker(marker.clone()));
    }

    fn remove_marker(&mut self, id: &str) {
        lock(&self.log).calls.push(WidgetCall::RemoveMarker(id.to_string()));
    }

    fn set_view(&mut self, center: GeoPoint, zoom: u8) {
        lock(&self.log).calls.push(WidgetCall::SetView(center, zoom));
    }

    fn set_tile_source(&mut self, url: &str) {
        lock(&self.log).calls.push(WidgetCall::SetTileSource(url.to_string()));
    }

    fn destroy(&mut self) {
        let mut log = lock(&self.log);
        assert!(log.created, "destroy called on a map that was never created");
        log.created = false;
        log.calls.push(WidgetCall::Destroy);
    }
}
