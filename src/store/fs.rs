//! File-backed store over a data directory
//!
//! Layout:
//! - `personnel.json`
//! - `tasks.json`
//! - `companies/<companyId>.json`
//!
//! Each file holds the whole collection as one JSON object. Changes are picked
//! up with a filesystem watcher, debounced, and delivered as the re-read file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{ChangeCallback, CollectionPath, DataStore, ListenerRegistry, Subscription};
use crate::error::EngineError;
use crate::ingest::{snapshot_from_value, Snapshot};

/// Debounce window for file system events
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

const PERSONNEL_FILE: &str = "personnel.json";
const TASKS_FILE: &str = "tasks.json";
const COMPANIES_DIR: &str = "companies";

pub struct FsStore {
    data_dir: PathBuf,
    debounce: Duration,
    registry: Arc<ListenerRegistry>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FsStore {
    /// Open a store rooted at `data_dir`. The directory must exist.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let data_dir = data_dir.as_ref();
        if !data_dir.is_dir() {
            return Err(EngineError::DataDirNotFound(data_dir.to_path_buf()));
        }
        // Watcher events carry canonical paths; match them against the same form.
        let data_dir = data_dir.canonicalize()?;
        Ok(Self {
            data_dir,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            registry: Arc::new(ListenerRegistry::default()),
            watcher: Mutex::new(None),
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn file_for(&self, path: &CollectionPath) -> PathBuf {
        file_for(&self.data_dir, path)
    }

    /// Start the watcher on first subscription. Needs a Tokio runtime for the
    /// debounce loop.
    fn ensure_watching(&self) -> Result<(), EngineError> {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            EngineError::WatchError(format!("file watching needs a Tokio runtime: {}", e))
        })?;

        // Channel for forwarding notify events to the async debouncer
        let (fs_tx, fs_rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            let _ = fs_tx.try_send(path);
                        }
                    }
                }
                Err(e) => log::warn!("FsStore: watcher error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.data_dir, RecursiveMode::Recursive)?;
        log::info!("FsStore: watching {} for changes", self.data_dir.display());

        runtime.spawn(debounce_loop(
            fs_rx,
            self.data_dir.clone(),
            self.debounce,
            self.registry.clone(),
        ));

        *guard = Some(watcher);
        Ok(())
    }
}

pub fn file_for(data_dir: &Path, path: &CollectionPath) -> PathBuf {
    match path {
        CollectionPath::Personnel => data_dir.join(PERSONNEL_FILE),
        CollectionPath::Tasks => data_dir.join(TASKS_FILE),
        CollectionPath::Company(id) => data_dir.join(COMPANIES_DIR).join(format!("{}.json", id)),
    }
}

/// Map a changed file back to the collection it holds.
pub fn collection_for_file(data_dir: &Path, file: &Path) -> Option<CollectionPath> {
    let relative = file.strip_prefix(data_dir).ok()?;
    let parts: Vec<&str> = relative.iter().filter_map(|p| p.to_str()).collect();
    match parts.as_slice() {
        [PERSONNEL_FILE] => Some(CollectionPath::Personnel),
        [TASKS_FILE] => Some(CollectionPath::Tasks),
        [COMPANIES_DIR, name] => name
            .strip_suffix(".json")
            .filter(|id| !id.is_empty() && !id.starts_with('.'))
            .map(|id| CollectionPath::Company(id.to_string())),
        _ => None,
    }
}

/// Read a collection file. Missing files read as `Value::Null`.
async fn read_collection(file: &Path, path: &CollectionPath) -> Result<Value, EngineError> {
    let content = match tokio::fs::read_to_string(file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Value::Null),
        Err(e) => {
            return Err(EngineError::FetchFailed {
                path: path.to_string(),
                message: e.to_string(),
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&content).map_err(|e| EngineError::ParseError {
        what: file.display().to_string(),
        message: e.to_string(),
    })
}

/// Coalesce rapid file events, then deliver each touched collection once.
async fn debounce_loop(
    mut fs_rx: mpsc::Receiver<PathBuf>,
    data_dir: PathBuf,
    debounce: Duration,
    registry: Arc<ListenerRegistry>,
) {
    loop {
        let Some(first) = fs_rx.recv().await else {
            break; // Channel closed, watcher dropped
        };

        sleep(debounce).await;
        let mut changed = BTreeSet::new();
        changed.insert(first);
        while let Ok(path) = fs_rx.try_recv() {
            changed.insert(path);
        }

        let mut touched: Vec<CollectionPath> = Vec::new();
        for file in &changed {
            if let Some(path) = collection_for_file(&data_dir, file) {
                if !touched.contains(&path) {
                    touched.push(path);
                }
            }
        }

        for path in touched {
            if !registry.has_listeners(&path) {
                continue;
            }
            match read_collection(&file_for(&data_dir, &path), &path).await {
                Ok(value) => {
                    log::debug!("FsStore: {} changed", path);
                    registry.notify(&path, &value);
                }
                Err(e) => log::warn!("FsStore: could not reload {}: {}", path, e),
            }
        }
    }

    log::info!("FsStore: watcher stopped");
}

#[async_trait]
impl DataStore for FsStore {
    async fn fetch_snapshot(&self, path: &CollectionPath) -> Result<Snapshot, EngineError> {
        let value = read_collection(&self.file_for(path), path).await?;
        Ok(snapshot_from_value(value))
    }

    fn subscribe(
        &self,
        path: &CollectionPath,
        on_change: ChangeCallback,
    ) -> Result<Subscription, EngineError> {
        self.ensure_watching()
            .map_err(|e| EngineError::SubscribeFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(self.registry.register(path, on_change))
    }
}
