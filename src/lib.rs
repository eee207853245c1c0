//! Reactive aggregation over personnel, task and company event-log
//! collections.
//!
//! `recompute` is the pure core: three raw snapshots in, one `DerivedState`
//! out. `Reconciler` keeps that state current against a `DataStore`.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod location;
pub mod rank;
pub mod recompute;
pub mod reconciler;
pub mod scope;
pub mod store;
pub mod trend;
pub mod types;

pub use error::EngineError;
pub use location::{LocationFilter, LocationFilterUpdate};
pub use recompute::{recompute, RecomputeOptions};
pub use reconciler::{EngineContext, Reconciler, ReconcilerOptions, StateSubscription};
pub use scope::ScopeContext;
pub use store::{CollectionPath, DataStore, FsStore, MemoryStore};
pub use types::DerivedState;
