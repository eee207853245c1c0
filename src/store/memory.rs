//! In-process store. Backs tests and embedders that push collections in
//! directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ChangeCallback, CollectionPath, DataStore, ListenerRegistry, Subscription};
use crate::error::EngineError;
use crate::ingest::{snapshot_from_value, Snapshot};

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<CollectionPath, Value>>,
    registry: Arc<ListenerRegistry>,
    unavailable: AtomicBool,
    fetch_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a collection and notify its listeners with the new value.
    pub fn put(&self, path: CollectionPath, value: Value) {
        self.collections.lock().insert(path.clone(), value.clone());
        self.registry.notify(&path, &value);
    }

    pub fn remove(&self, path: &CollectionPath) {
        self.collections.lock().remove(path);
        self.registry.notify(path, &Value::Null);
    }

    /// Make every fetch fail, as if the transport were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self, path: &CollectionPath) -> usize {
        self.registry.listener_count(path)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn fetch_snapshot(&self, path: &CollectionPath) -> Result<Snapshot, EngineError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::FetchFailed {
                path: path.to_string(),
                message: "store unavailable".to_string(),
            });
        }
        let value = self
            .collections
            .lock()
            .get(path)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(snapshot_from_value(value))
    }

    fn subscribe(
        &self,
        path: &CollectionPath,
        on_change: ChangeCallback,
    ) -> Result<Subscription, EngineError> {
        Ok(self.registry.register(path, on_change))
    }
}
