//! Ingestion reconciler
//!
//! Subscribes to the three raw collections. On any change it fetches the
//! other two as of now and runs one full recompute. Cycles may overlap; they
//! are numbered at start and an older cycle never overwrites a newer one.
//!
//! Lifecycle is owned by the consumer: `dispose()` (or drop) unregisters all
//! listeners and discards any in-flight cycle's result.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::ingest::{snapshot_from_value, RawSnapshots, Snapshot};
use crate::location::{LocationFilter, LocationFilterUpdate};
use crate::recompute::{recompute, refilter, RecomputeOptions};
use crate::scope::ScopeContext;
use crate::store::{ChangeCallback, CollectionPath, DataStore, Subscription};
use crate::trend::DEFAULT_LOOKBACK_DAYS;
use crate::types::DerivedState;

/// Who the engine is computing for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineContext {
    /// Without a company there is nothing to scope to; the engine stays empty.
    pub company_id: Option<String>,
    pub scope: ScopeContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    pub trend_lookback_days: u32,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            trend_lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// Owns the collection subscriptions for one consuming scope.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Subscription) {
        self.subscriptions.lock().push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister everything. Returns how many subscriptions were released.
    pub fn dispose(&self) -> usize {
        let drained: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        let count = drained.len();
        for subscription in drained {
            log::debug!("Reconciler: releasing {} listener", subscription.path());
            subscription.unsubscribe();
        }
        count
    }
}

/// Fetch all three collections concurrently.
pub async fn fetch_snapshots(
    store: &dyn DataStore,
    company: &CollectionPath,
) -> Result<RawSnapshots, EngineError> {
    let (personnel, tasks, company) = tokio::join!(
        store.fetch_snapshot(&CollectionPath::Personnel),
        store.fetch_snapshot(&CollectionPath::Tasks),
        store.fetch_snapshot(company),
    );
    Ok(RawSnapshots {
        personnel: personnel?,
        tasks: tasks?,
        company: company?,
    })
}

struct Shared {
    store: Arc<dyn DataStore>,
    company_path: Option<CollectionPath>,
    scope: ScopeContext,
    options: ReconcilerOptions,
    filter: Mutex<LocationFilter>,
    /// Highest cycle number whose result is currently published.
    published_cycle: Mutex<u64>,
    next_cycle: AtomicU64,
    in_flight: Mutex<usize>,
    disposed: AtomicBool,
    state_tx: watch::Sender<Arc<DerivedState>>,
    loading_tx: watch::Sender<bool>,
    subscriptions: SubscriptionManager,
}

/// Marks a cycle as in flight. Clears `loading` on every exit path.
struct LoadingGuard<'a> {
    shared: &'a Shared,
}

impl<'a> LoadingGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let mut in_flight = shared.in_flight.lock();
        *in_flight += 1;
        if *in_flight == 1 {
            shared.loading_tx.send_replace(true);
        }
        Self { shared }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.shared.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.shared.loading_tx.send_replace(false);
        }
    }
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn snapshot_for(
        &self,
        path: &CollectionPath,
        delivered: Option<&(CollectionPath, Value)>,
    ) -> Result<Snapshot, EngineError> {
        match delivered {
            Some((changed, value)) if changed == path => Ok(snapshot_from_value(value.clone())),
            _ => self.store.fetch_snapshot(path).await,
        }
    }

    async fn gather(
        &self,
        company: &CollectionPath,
        delivered: Option<&(CollectionPath, Value)>,
    ) -> Result<RawSnapshots, EngineError> {
        let (personnel, tasks, company) = tokio::join!(
            self.snapshot_for(&CollectionPath::Personnel, delivered),
            self.snapshot_for(&CollectionPath::Tasks, delivered),
            self.snapshot_for(company, delivered),
        );
        Ok(RawSnapshots {
            personnel: personnel?,
            tasks: tasks?,
            company: company?,
        })
    }

    /// One fetch-and-recompute cycle.
    async fn run_cycle(&self, delivered: Option<(CollectionPath, Value)>) {
        let Some(company) = self.company_path.clone() else {
            return;
        };
        let cycle = self.next_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let _loading = LoadingGuard::enter(self);

        match self.gather(&company, delivered.as_ref()).await {
            Ok(raw) => self.publish(cycle, &raw),
            Err(e) => log::warn!("Reconciler: cycle {} failed to fetch: {}", cycle, e),
        }
    }

    fn publish(&self, cycle: u64, raw: &RawSnapshots) {
        if self.is_disposed() || cycle < *self.published_cycle.lock() {
            log::debug!("Reconciler: discarding cycle {} before recompute", cycle);
            return;
        }

        let used_filter = self.filter.lock().clone();
        let options = RecomputeOptions {
            today: chrono::Local::now().date_naive(),
            trend_lookback_days: self.options.trend_lookback_days,
        };
        let mut state = recompute(raw, &self.scope, &used_filter, &options);

        // Dispose and filter changes serialize on this lock. Decide under it.
        let mut published = self.published_cycle.lock();
        if self.is_disposed() {
            log::debug!("Reconciler: discarding cycle {} after dispose", cycle);
            return;
        }
        if cycle < *published {
            log::debug!(
                "Reconciler: cycle {} superseded by cycle {}, discarding",
                cycle,
                *published
            );
            return;
        }
        let filter = self.filter.lock().clone();
        if filter != used_filter {
            state = refilter(&state, &filter);
        }

        log::debug!(
            "Reconciler: cycle {} published ({} personnel, {} tasks, {} missed, {} completed)",
            cycle,
            state.stats.total_personnel,
            state.stats.total_tasks,
            state.all_missed.len(),
            state.all_completed.len()
        );

        *published = cycle;
        self.state_tx.send_replace(Arc::new(state));
    }

    fn change_callback(self: &Arc<Self>, path: CollectionPath) -> ChangeCallback {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let runtime = tokio::runtime::Handle::current();
        Arc::new(move |value: Value| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.is_disposed() {
                return;
            }
            log::debug!("Reconciler: {} changed, scheduling recompute", path);
            let delivered = (path.clone(), value);
            runtime.spawn(async move {
                shared.run_cycle(Some(delivered)).await;
            });
        })
    }

    fn dispose(&self) {
        {
            // Waits out any publish in progress; none can start after this.
            let _published = self.published_cycle.lock();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        if self.subscriptions.is_empty() {
            log::info!("Reconciler: disposed");
            return;
        }
        let released = self.subscriptions.dispose();
        log::info!("Reconciler: disposed, released {} subscriptions", released);
    }
}

/// Live derived state for one consuming scope.
pub struct Reconciler {
    shared: Arc<Shared>,
}

impl Reconciler {
    /// Subscribe to all three collections and run the initial cycle.
    ///
    /// Must be called from within a Tokio runtime. With no company id the
    /// engine publishes an empty state and registers nothing.
    pub async fn start(
        store: Arc<dyn DataStore>,
        context: EngineContext,
        options: ReconcilerOptions,
    ) -> Result<Self, EngineError> {
        let (state_tx, _) = watch::channel(Arc::new(DerivedState::default()));
        let (loading_tx, _) = watch::channel(false);

        let company_path = context.company_id.map(CollectionPath::Company);
        let shared = Arc::new(Shared {
            store,
            company_path: company_path.clone(),
            scope: context.scope,
            options,
            filter: Mutex::new(LocationFilter::default()),
            published_cycle: Mutex::new(0),
            next_cycle: AtomicU64::new(0),
            in_flight: Mutex::new(0),
            disposed: AtomicBool::new(false),
            state_tx,
            loading_tx,
            subscriptions: SubscriptionManager::new(),
        });

        let Some(company_path) = company_path else {
            log::info!("Reconciler: no company in context, serving empty state");
            return Ok(Self { shared });
        };

        for path in [CollectionPath::Personnel, CollectionPath::Tasks, company_path] {
            let callback = shared.change_callback(path.clone());
            match shared.store.subscribe(&path, callback) {
                Ok(subscription) => shared.subscriptions.add(subscription),
                Err(e) => {
                    shared.dispose();
                    return Err(e);
                }
            }
        }
        log::info!(
            "Reconciler: subscribed to {} collections",
            shared.subscriptions.len()
        );

        shared.run_cycle(None).await;
        Ok(Self { shared })
    }

    /// Run a full fetch-and-recompute cycle now.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        if self.shared.is_disposed() {
            return Err(EngineError::Disposed);
        }
        self.shared.run_cycle(None).await;
        Ok(())
    }

    pub fn current_state(&self) -> Arc<DerivedState> {
        self.shared.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<Arc<DerivedState>> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.shared.loading_tx.borrow()
    }

    pub fn watch_loading(&self) -> watch::Receiver<bool> {
        self.shared.loading_tx.subscribe()
    }

    pub fn location_filter(&self) -> LocationFilter {
        self.shared.filter.lock().clone()
    }

    /// Change the map filter and re-derive the filtered list from the current
    /// master list. Does not fetch.
    pub fn set_location_filter(&self, update: LocationFilterUpdate) -> Result<(), EngineError> {
        self.update_filter(|filter| filter.apply(update))
    }

    /// Back to 10 entries with no personnel or task restriction.
    pub fn clear_location_filter(&self) -> Result<(), EngineError> {
        self.update_filter(|filter| {
            filter.clear();
            Ok(())
        })
    }

    fn update_filter(
        &self,
        change: impl FnOnce(&mut LocationFilter) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        // Same lock order as publish: cycle marker, then filter.
        let _published = self.shared.published_cycle.lock();
        if self.shared.is_disposed() {
            return Err(EngineError::Disposed);
        }
        let filter = {
            let mut guard = self.shared.filter.lock();
            change(&mut guard)?;
            guard.clone()
        };
        let next = refilter(&self.current_state(), &filter);
        self.shared.state_tx.send_replace(Arc::new(next));
        Ok(())
    }

    /// Call `on_update` with the current state and then after every change.
    /// Must be called from within a Tokio runtime.
    pub fn subscribe_to_derived_state<F>(&self, on_update: F) -> StateSubscription
    where
        F: Fn(Arc<DerivedState>) + Send + Sync + 'static,
    {
        let mut rx = self.watch_state();
        let task = tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            on_update(initial);
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                on_update(state);
            }
        });
        StateSubscription { task }
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Unregister all collection listeners. In-flight cycles finish but never
    /// publish.
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

/// Handle for a derived-state listener. Stops delivery on unsubscribe or drop.
pub struct StateSubscription {
    task: JoinHandle<()>,
}

impl StateSubscription {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    const COMPANY: &str = "acme";

    fn company() -> CollectionPath {
        CollectionPath::Company(COMPANY.to_string())
    }

    fn context() -> EngineContext {
        EngineContext {
            company_id: Some(COMPANY.to_string()),
            scope: ScopeContext::unrestricted(),
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.put(
            CollectionPath::Personnel,
            json!({ "P1": { "name": "Ali", "branchId": "B1" } }),
        );
        store.put(
            CollectionPath::Tasks,
            json!({ "T1": { "name": "Patrol", "status": "completed", "personnelId": "P1" } }),
        );
        let mut leaves = serde_json::Map::new();
        for i in 0..15 {
            leaves.insert(
                format!("{:02}:00", i),
                json!({
                    "taskName": "Patrol",
                    "completedAt": 100 + i,
                    "completionLocation": { "latitude": 1.0, "longitude": 2.0 },
                }),
            );
        }
        store.put(
            company(),
            json!({ "completedTasks": { "T1": { "2024-01-01": Value::Object(leaves) } } }),
        );
        store
    }

    async fn start(store: &Arc<MemoryStore>) -> Reconciler {
        let store: Arc<dyn DataStore> = store.clone();
        Reconciler::start(store, context(), ReconcilerOptions::default())
            .await
            .expect("start")
    }

    async fn next_state(rx: &mut watch::Receiver<Arc<DerivedState>>) -> Arc<DerivedState> {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("state update")
            .expect("sender alive");
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn missing_company_serves_empty_state() {
        let store = seeded_store();
        let reconciler = Reconciler::start(
            store.clone(),
            EngineContext::default(),
            ReconcilerOptions::default(),
        )
        .await
        .unwrap();

        assert!(reconciler.current_state().is_empty());
        assert!(!reconciler.is_loading());
        assert_eq!(reconciler.subscription_count(), 0);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn initial_cycle_publishes_state() {
        let store = seeded_store();
        let reconciler = start(&store).await;

        let state = reconciler.current_state();
        assert_eq!(state.stats.total_personnel, 1);
        assert_eq!(state.stats.completed_tasks, 16);
        assert_eq!(state.location_filtered.len(), 10);
        assert_eq!(reconciler.subscription_count(), 3);
        assert!(!reconciler.is_loading());
    }

    #[tokio::test]
    async fn collection_change_triggers_recompute() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let mut rx = reconciler.watch_state();

        store.put(
            CollectionPath::Personnel,
            json!({
                "P1": { "name": "Ali", "branchId": "B1" },
                "P2": { "name": "Bea", "branchId": "B1" },
            }),
        );

        let state = next_state(&mut rx).await;
        assert_eq!(state.stats.total_personnel, 2);
        assert_eq!(state.personnel_performance.len(), 2);
    }

    #[tokio::test]
    async fn dispose_unregisters_and_stops_updates() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let before = reconciler.current_state();

        reconciler.dispose();
        assert!(reconciler.is_disposed());
        for path in [CollectionPath::Personnel, CollectionPath::Tasks, company()] {
            assert_eq!(store.listener_count(&path), 0);
        }

        store.put(CollectionPath::Personnel, json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reconciler.current_state(), before);
        assert!(matches!(
            reconciler.set_location_filter(LocationFilterUpdate::default()),
            Err(EngineError::Disposed)
        ));
    }

    #[tokio::test]
    async fn drop_unregisters_listeners() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        drop(reconciler);
        assert_eq!(store.listener_count(&CollectionPath::Tasks), 0);
    }

    #[tokio::test]
    async fn filter_change_does_not_fetch() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let fetches = store.fetch_count();

        reconciler
            .set_location_filter(LocationFilterUpdate {
                max_count: Some(20),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reconciler.current_state().location_filtered.len(), 15);

        reconciler.clear_location_filter().unwrap();
        assert_eq!(reconciler.current_state().location_filtered.len(), 10);
        assert_eq!(reconciler.location_filter(), LocationFilter::default());
        assert_eq!(store.fetch_count(), fetches);
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected_and_state_kept() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let before = reconciler.current_state();

        let err = reconciler
            .set_location_filter(LocationFilterUpdate {
                max_count: Some(7),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMaxCount(7)));
        assert_eq!(reconciler.current_state(), before);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_state_and_clears_loading() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let before = reconciler.current_state();

        store.set_unavailable(true);
        reconciler.refresh().await.unwrap();

        assert_eq!(reconciler.current_state(), before);
        assert!(!reconciler.is_loading());
    }

    #[tokio::test]
    async fn older_cycle_never_overwrites_newer() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let shared = &reconciler.shared;

        let newer = fetch_snapshots(store.as_ref(), &company()).await.unwrap();
        let older = RawSnapshots::default();

        shared.publish(10, &newer);
        shared.publish(9, &older);
        assert_eq!(reconciler.current_state().stats.total_personnel, 1);
    }

    /// Holds every fetch until permits are released.
    struct GatedStore {
        inner: Arc<MemoryStore>,
        gate: tokio::sync::Semaphore,
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl DataStore for GatedStore {
        async fn fetch_snapshot(&self, path: &CollectionPath) -> Result<Snapshot, EngineError> {
            if self.closed.load(Ordering::SeqCst) {
                let _permit = self.gate.acquire().await.expect("gate open");
            }
            self.inner.fetch_snapshot(path).await
        }

        fn subscribe(
            &self,
            path: &CollectionPath,
            on_change: ChangeCallback,
        ) -> Result<Subscription, EngineError> {
            self.inner.subscribe(path, on_change)
        }
    }

    fn busy_snapshots(leaves: usize) -> RawSnapshots {
        let mut times = serde_json::Map::new();
        for i in 0..leaves {
            times.insert(
                format!("{:06}", i),
                json!({
                    "completedAt": i,
                    "completionLocation": { "latitude": 1.0, "longitude": 2.0 },
                }),
            );
        }
        RawSnapshots {
            personnel: snapshot_from_value(json!({ "P1": { "name": "Ali" } })),
            tasks: snapshot_from_value(json!({ "T1": { "personnelId": "P1" } })),
            company: snapshot_from_value(
                json!({ "completedTasks": { "T1": { "2024-01-01": Value::Object(times) } } }),
            ),
        }
    }

    #[tokio::test]
    async fn publish_after_dispose_is_discarded() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let before = reconciler.current_state();

        reconciler.dispose();
        reconciler.shared.publish(u64::MAX, &busy_snapshots(3));

        assert_eq!(reconciler.current_state(), before);
    }

    #[tokio::test]
    async fn dispose_during_recompute_leaves_state_untouched() {
        let store = seeded_store();
        let reconciler = start(&store).await;
        let shared = reconciler.shared.clone();
        let raw = busy_snapshots(50_000);

        let worker = std::thread::spawn(move || shared.publish(100, &raw));
        std::thread::sleep(Duration::from_millis(20));
        reconciler.dispose();
        let at_dispose = reconciler.current_state();
        worker.join().expect("publish thread");

        assert_eq!(reconciler.current_state(), at_dispose);
    }

    #[tokio::test]
    async fn dispose_discards_in_flight_fetch() {
        let inner = seeded_store();
        let gated = Arc::new(GatedStore {
            inner: inner.clone(),
            gate: tokio::sync::Semaphore::new(0),
            closed: AtomicBool::new(false),
        });
        let store: Arc<dyn DataStore> = gated.clone();
        let reconciler = Reconciler::start(store, context(), ReconcilerOptions::default())
            .await
            .unwrap();
        let before = reconciler.current_state();
        assert_eq!(before.stats.total_personnel, 1);

        gated.closed.store(true, Ordering::SeqCst);
        let shared = reconciler.shared.clone();
        let cycle = tokio::spawn(async move { shared.run_cycle(None).await });

        let mut loading = reconciler.watch_loading();
        tokio::time::timeout(Duration::from_secs(5), loading.wait_for(|l| *l))
            .await
            .expect("cycle started")
            .expect("sender alive");

        reconciler.dispose();
        inner.put(CollectionPath::Personnel, json!({}));
        gated.gate.add_permits(16);
        cycle.await.unwrap();

        assert_eq!(reconciler.current_state(), before);
        assert!(!reconciler.is_loading());
    }

    #[tokio::test]
    async fn derived_state_listener_sees_current_and_updates() {
        let store = seeded_store();
        let reconciler = start(&store).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let subscription = reconciler.subscribe_to_derived_state(move |state| {
            let _ = tx.send(state.stats.total_personnel);
        });

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(1));

        store.put(CollectionPath::Personnel, json!({}));
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(second, Some(0));

        subscription.unsubscribe();
        tokio::task::yield_now().await;
        store.put(CollectionPath::Personnel, json!({ "P9": { "name": "Zed" } }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
