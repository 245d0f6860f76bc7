//! SlotSync Core Library
//!
//! Availability resolution and real-time synchronization for a
//! therapist-booking platform.
//!
//! ## Overview
//!
//! An owner (therapist) publishes recurring weekly availability and
//! date-specific overrides; counterparties (clients) book slots. The engine
//! resolves the bookable slots for any date, flags double bookings, and keeps
//! every open view consistent through live queries against a document store.
//!
//! ## Components
//!
//! - **types**: time slots, weekly rules, overrides, appointments
//! - **availability**: the pure resolver and write-boundary validation
//! - **conflict**: advisory conflict detection and the resolution queue
//! - **connection**: heartbeats, quality, exponential-backoff reconnects
//! - **bus**: categorized publish/subscribe with per-handler isolation
//! - **sync**: per-key live queries feeding a versioned, staleness-aware cache
//! - **payments**: reactions to payment collaborator signals
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use slotsync_core::{AvailabilityEngine, EngineConfig, MemoryStore, SlotCatalog, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AvailabilityEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         SlotCatalog::default(),
//!     )?;
//!     engine.start();
//!
//!     let owner = UserId::from("therapist-1");
//!     let date = chrono::NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
//!     let view = engine.resolve_available_slots(&owner, date).await?;
//!     println!("{} slots open", view.slots.len());
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod availability;
pub mod bus;
pub mod config;
pub mod conflict;
pub mod connection;
pub mod engine;
pub mod error;
pub mod listeners;
pub mod logging;
pub mod payments;
pub mod sync;
pub mod types;

// Re-exports
pub use bus::{BusEvent, BusMessage, BusStats, ChangeAction, EventBus, EventCategory};
pub use config::{BusConfig, ConnectionConfig, EngineConfig, SyncConfig};
pub use conflict::{
    ConflictDetector, ConflictKind, ConflictQueue, ConflictRecord, ConflictingEntity,
    RequestedAction, Resolution,
};
pub use connection::{
    BackoffPolicy, ConnectionDiagnostics, ConnectionEvent, ConnectionManager, ConnectionMetrics,
    ConnectionProbe, ConnectionQuality, ConnectionState, ConnectionStatus, ProbeStep,
    ScriptedProbe, StoreProbe,
};
pub use engine::{
    AvailabilityEngine, AvailabilityRange, AvailabilityView, BookingOutcome, BookingRequest,
};
pub use error::{EngineError, EngineResult};
pub use listeners::{Listeners, Subscription};
pub use payments::{apply_payment_signal, PaymentNotice, PaymentSignal};
pub use sync::{
    Cache, CacheEntry, Clock, Collection, Dataset, DocumentChange, DocumentStore, KeyStatus,
    ManualClock, MemoryStore, Query, RawDocument, SubscriptionKey, SyncDiagnostics,
    SyncOrchestrator, SystemClock,
};
pub use types::*;
