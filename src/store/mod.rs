//! Data store collaborator.
//!
//! The engine needs two things from a store: a point-in-time snapshot of a
//! named collection, and a whole-value change notification per collection.
//! No deltas are assumed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::EngineError;
use crate::ingest::Snapshot;

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Named collections the engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionPath {
    Personnel,
    Tasks,
    /// Company root record holding the `missedTasks` / `completedTasks` logs.
    Company(String),
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionPath::Personnel => write!(f, "personnel"),
            CollectionPath::Tasks => write!(f, "tasks"),
            CollectionPath::Company(id) => write!(f, "companies/{}", id),
        }
    }
}

/// Receives the full current value of a collection after each change.
pub type ChangeCallback = Arc<dyn Fn(Value) + Send + Sync>;

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Read a collection. An absent path is an empty snapshot, not an error.
    async fn fetch_snapshot(&self, path: &CollectionPath) -> Result<Snapshot, EngineError>;

    /// Register for change notifications on one collection.
    fn subscribe(
        &self,
        path: &CollectionPath,
        on_change: ChangeCallback,
    ) -> Result<Subscription, EngineError>;
}

/// Callback table shared by the store implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<CollectionPath, Vec<(u64, ChangeCallback)>>>,
}

impl ListenerRegistry {
    pub fn register(self: &Arc<Self>, path: &CollectionPath, on_change: ChangeCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(path.clone())
            .or_default()
            .push((id, on_change));
        Subscription {
            path: path.clone(),
            id,
            registry: Arc::downgrade(self),
            released: false,
        }
    }

    fn remove(&self, path: &CollectionPath, id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(path) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                listeners.remove(path);
            }
        }
    }

    /// Deliver `value` to every listener on `path`. Callbacks run outside the
    /// lock so they may subscribe or unsubscribe.
    pub fn notify(&self, path: &CollectionPath, value: &Value) {
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .lock()
            .get(path)
            .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn listener_count(&self, path: &CollectionPath) -> usize {
        self.listeners.lock().get(path).map(Vec::len).unwrap_or(0)
    }

    pub fn has_listeners(&self, path: &CollectionPath) -> bool {
        self.listener_count(path) > 0
    }
}

/// Handle for one registered listener. Unregisters on `unsubscribe` or drop.
pub struct Subscription {
    path: CollectionPath,
    id: u64,
    registry: Weak<ListenerRegistry>,
    released: bool,
}

impl Subscription {
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.path, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}
