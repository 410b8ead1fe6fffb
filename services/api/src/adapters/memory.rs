//! services/api/src/adapters/memory.rs
//!
//! A process-local `KeyValueStore`, used when no database is configured and in tests.
//! Values are lost on restart.

use async_trait::async_trait;
use location_tracking_core::{KeyValueStore, PortResult};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_overwrites_and_get_reads_back() {
        let store = MemoryStore::new();
        assert_eq!(store.get("locationConsent:u1").await.unwrap(), None);

        store.set("locationConsent:u1", "a").await.unwrap();
        store.set("locationConsent:u1", "b").await.unwrap();
        store.set("lastLocation:u1", "c").await.unwrap();

        assert_eq!(store.get("locationConsent:u1").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.get("lastLocation:u1").await.unwrap().as_deref(), Some("c"));
    }
}
