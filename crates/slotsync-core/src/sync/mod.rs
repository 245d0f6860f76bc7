//! Live-query synchronization layer
//!
//! ## Overview
//!
//! The sync module keeps a versioned local cache of every dataset the
//! application watches (weekly availability, overrides, appointments and
//! presence) and republishes every change onto the event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  DocumentStore (trait)                                          │
//! │  ├── subscribe(Query) ──► LiveQuery { snapshot, changes }       │
//! │  ├── fetch / put / delete                                       │
//! │  └── MemoryStore (in-process backend, fault injection)          │
//! │                                                                 │
//! │  SyncOrchestrator                                               │
//! │  ├── one refcounted task per SubscriptionKey                    │
//! │  ├── Cache<SubscriptionKey, Dataset> (version, staleness)       │
//! │  └── publishes BusEvent on every applied batch                  │
//! │                                                                 │
//! │  Clock (SystemClock / ManualClock) for timestamps               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = SyncOrchestrator::new(store, bus, Arc::new(SystemClock), config.sync);
//! orchestrator.start();
//!
//! let _watch = orchestrator.watch(SubscriptionKey::availability(owner_id))?;
//! // BusEvents for the key now arrive on EventCategory::Availability
//! ```

pub mod cache;
pub mod clock;
pub mod dataset;
pub mod memory;
pub mod orchestrator;
pub mod store;

pub use cache::{Cache, CacheEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dataset::{Dataset, SubscriptionKey};
pub use memory::MemoryStore;
pub use orchestrator::{KeyDiagnostics, KeyStatus, SyncDiagnostics, SyncOrchestrator};
pub use store::{
    ChangeStream, Collection, DocumentChange, DocumentStore, LiveQuery, Query, RawDocument,
};
