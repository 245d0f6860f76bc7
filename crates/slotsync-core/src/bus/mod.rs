//! Event Bus / Subscription Layer
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  EventBus                                                       │
//! │  ├── category listeners                                         │
//! │  │   availability | appointment | override | presence           │
//! │  ├── conflict channel ──► ConflictQueue                          │
//! │  ├── connection channel (delegates to ConnectionManager)        │
//! │  └── broadcast::Sender<BusMessage> (async mirror)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the orchestrator publishes data events; any component may publish
//! conflicts.

pub mod event_bus;
pub mod events;

pub use event_bus::{BusStats, EventBus};
pub use events::{BusEvent, BusMessage, ChangeAction, EventCategory};
