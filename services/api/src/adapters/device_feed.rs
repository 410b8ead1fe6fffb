//! services/api/src/adapters/device_feed.rs
//!
//! A `GeolocationPlatform` fed by the user's device. The browser reports fixes
//! and failures over the WebSocket; this adapter fans them out to the watches
//! the tracking session registered and emulates the platform's `timeout` and
//! `maximumAge` handling.

use async_trait::async_trait;
use location_tracking_core::{
    GeolocationPlatform, PlatformError, PlatformReading, PortError, PortResult, PositionSample,
    WatchCallback, WatchId, WatchOptions,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const TIMEOUT_CODE: u16 = 3;

struct Watch {
    callback: WatchCallback,
    last_fix: Instant,
    cancel: CancellationToken,
}

#[derive(Default)]
struct FeedState {
    next_id: u64,
    watches: HashMap<WatchId, Watch>,
}

pub struct DeviceFeed {
    state: Arc<Mutex<FeedState>>,
    latest: watch::Sender<Option<(PositionSample, Instant)>>,
}

impl Default for DeviceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFeed {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(FeedState::default())),
            latest,
        }
    }

    /// Fans a reading from the device out to every active watch.
    pub fn report(&self, reading: PlatformReading) {
        let now = Instant::now();
        if let Ok(sample) = &reading {
            self.latest.send_replace(Some((*sample, now)));
        }

        let callbacks: Vec<WatchCallback> = {
            let mut state = lock(&self.state);
            state
                .watches
                .values_mut()
                .map(|watch| {
                    if reading.is_ok() {
                        watch.last_fix = now;
                    }
                    watch.callback.clone()
                })
                .collect()
        };
        for callback in callbacks {
            callback(reading.clone());
        }
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.state).watches.len()
    }

    fn fresh_fix(&self, maximum_age: std::time::Duration) -> Option<PositionSample> {
        let latest = *self.latest.borrow();
        latest.and_then(|(sample, at)| (at.elapsed() <= maximum_age).then_some(sample))
    }
}

#[async_trait]
impl GeolocationPlatform for DeviceFeed {
    fn watch_position(&self, options: WatchOptions, callback: WatchCallback) -> PortResult<WatchId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PortError::Unsupported("device feed requires a tokio runtime".to_string()))?;

        let cancel = CancellationToken::new();
        let id = {
            let mut state = lock(&self.state);
            let id = WatchId(state.next_id);
            state.next_id += 1;
            state.watches.insert(
                id,
                Watch {
                    callback: callback.clone(),
                    last_fix: Instant::now(),
                    cancel: cancel.clone(),
                },
            );
            id
        };

        // A recent enough fix is handed out right away, like a cached position.
        if let Some(cached) = self.fresh_fix(options.maximum_age) {
            let state = self.state.clone();
            let callback = callback.clone();
            runtime.spawn(async move {
                if lock(&state).watches.contains_key(&id) {
                    callback(Ok(cached));
                }
            });
        }

        let state = self.state.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(options.timeout) => {}
                }
                let expired = {
                    let mut state = lock(&state);
                    match state.watches.get_mut(&id) {
                        None => break,
                        Some(watch) if watch.last_fix.elapsed() >= options.timeout => {
                            watch.last_fix = Instant::now();
                            Some(watch.callback.clone())
                        }
                        Some(_) => None,
                    }
                };
                if let Some(callback) = expired {
                    debug!(watch_id = id.0, "No fix from device within timeout");
                    callback(Err(PlatformError {
                        code: TIMEOUT_CODE,
                        message: "Timeout expired".to_string(),
                    }));
                }
            }
        });

        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        if let Some(watch) = lock(&self.state).watches.remove(&id) {
            watch.cancel.cancel();
        }
    }

    async fn get_current_position(&self, options: WatchOptions) -> PlatformReading {
        if let Some(sample) = self.fresh_fix(options.maximum_age) {
            return Ok(sample);
        }

        let mut rx = self.latest.subscribe();
        match tokio::time::timeout(options.timeout, rx.changed()).await {
            Ok(Ok(())) => {
                let latest = *rx.borrow_and_update();
                latest.map(|(sample, _)| sample).ok_or_else(|| PlatformError {
                    code: 2,
                    message: "Position unavailable".to_string(),
                })
            }
            Ok(Err(_)) | Err(_) => {
                warn!("One-shot position read timed out");
                Err(PlatformError {
                    code: TIMEOUT_CODE,
                    message: "Timeout expired".to_string(),
                })
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fix(ts: i64) -> PositionSample {
        PositionSample {
            latitude: 17.4771,
            longitude: 78.5724,
            accuracy: 20.0,
            timestamp: ts,
        }
    }

    fn recording() -> (WatchCallback, Arc<Mutex<Vec<PlatformReading>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: WatchCallback = {
            let seen = seen.clone();
            Arc::new(move |reading| seen.lock().unwrap().push(reading))
        };
        (callback, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn reports_reach_active_watches_only() {
        let feed = DeviceFeed::new();
        let (callback, seen) = recording();
        let id = feed.watch_position(WatchOptions::CONTINUOUS, callback).unwrap();

        feed.report(Ok(fix(1)));
        feed.clear_watch(id);
        feed.clear_watch(id);
        feed.report(Ok(fix(2)));

        assert_eq!(*seen.lock().unwrap(), vec![Ok(fix(1))]);
        assert_eq!(feed.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_produces_timeout_errors() {
        let feed = DeviceFeed::new();
        let (callback, seen) = recording();
        feed.watch_position(WatchOptions::CONTINUOUS, callback).unwrap();

        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Err(e) if e.code == TIMEOUT_CODE));
    }

    #[tokio::test(start_paused = true)]
    async fn regular_fixes_keep_timeout_quiet() {
        let feed = DeviceFeed::new();
        let (callback, seen) = recording();
        feed.watch_position(WatchOptions::CONTINUOUS, callback).unwrap();

        for ts in 0..5 {
            tokio::time::sleep(Duration::from_secs(6)).await;
            feed.report(Ok(fix(ts)));
        }

        assert!(seen.lock().unwrap().iter().all(|r| r.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_fix_is_replayed_to_new_watch() {
        let feed = DeviceFeed::new();
        feed.report(Ok(fix(7)));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let (callback, seen) = recording();
        feed.watch_position(WatchOptions::CONTINUOUS, callback).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*seen.lock().unwrap(), vec![Ok(fix(7))]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_uses_cache_then_waits_then_times_out() {
        let feed = Arc::new(DeviceFeed::new());
        feed.report(Ok(fix(1)));
        assert_eq!(feed.get_current_position(WatchOptions::ONE_SHOT).await, Ok(fix(1)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let pending = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.get_current_position(WatchOptions::ONE_SHOT).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        feed.report(Ok(fix(2)));
        assert_eq!(pending.await.unwrap(), Ok(fix(2)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let err = feed.get_current_position(WatchOptions::ONE_SHOT).await.unwrap_err();
        assert_eq!(err.code, TIMEOUT_CODE);
    }
}
