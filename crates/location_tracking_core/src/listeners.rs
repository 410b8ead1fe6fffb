//! crates/location_tracking_core/src/listeners.rs
//!
//! A small listener registry. Every `subscribe` hands back a `Subscription`
//! that removes the listener when it is dropped or explicitly unsubscribed,
//! so a view can release everything it registered on any exit path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner<T> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<T>)>,
}

pub struct ListenerRegistry<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = lock(&self.inner);
            let id = SubscriptionId(inner.next_id);
            inner.next_id += 1;
            inner.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            disposer: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).listeners.retain(|(existing, _)| *existing != id);
                }
            })),
        }
    }

    /// Removes a listener by id. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.inner).listeners.retain(|(existing, _)| *existing != id);
    }

    /// Calls every listener in registration order.
    ///
    /// The registry lock is released before listeners run, so a listener may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn clear(&self) {
        lock(&self.inner).listeners.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer handle returned from `ListenerRegistry::subscribe`.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    id: SubscriptionId,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.disposer.is_some()
    }

    /// Idempotent; also tolerates the registry having been dropped or cleared.
    pub fn unsubscribe(&mut self) {
        if let Some(dispose) = self.disposer.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Locks a mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_every_listener_in_order() {
        let registry = ListenerRegistry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = seen.clone();
            registry.subscribe(move |v| seen.lock().unwrap().push(("a", *v)))
        };
        let b = {
            let seen = seen.clone();
            registry.subscribe(move |v| seen.lock().unwrap().push(("b", *v)))
        };

        registry.emit(&1);
        registry.emit(&2);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
        drop((a, b));
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let registry = ListenerRegistry::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = {
            let hits = hits.clone();
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        registry.emit(&());
        drop(sub);
        registry.emit(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = ListenerRegistry::<()>::new();
        let mut sub = registry.subscribe(|_| {});
        let id = sub.id();

        sub.unsubscribe();
        sub.unsubscribe();
        registry.unsubscribe(id);
        assert!(!sub.is_active());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn unsubscribe_after_clear_and_after_registry_dropped() {
        let registry = ListenerRegistry::<()>::new();
        let mut first = registry.subscribe(|_| {});
        let second = registry.subscribe(|_| {});

        registry.clear();
        first.unsubscribe();

        drop(registry);
        drop(second);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_emit() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let sub = {
            let registry = registry.clone();
            let slot = slot.clone();
            registry.clone().subscribe(move |_| {
                if let Some(id) = *slot.lock().unwrap() {
                    registry.unsubscribe(id);
                }
            })
        };
        *slot.lock().unwrap() = Some(sub.id());

        registry.emit(&());
        assert!(registry.is_empty());
        drop(sub);
    }
}
