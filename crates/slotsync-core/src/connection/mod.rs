//! Connection Manager
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                              │
//! │  ├── driver task (tokio)                                        │
//! │  │   ├── heartbeat every `heartbeat_interval` while online      │
//! │  │   └── reconnect attempts spaced by BackoffPolicy             │
//! │  ├── ConnectionProbe (round trip, timed out by the manager)     │
//! │  ├── ConnectionStatus + ConnectionMetrics                       │
//! │  └── Listeners<ConnectionEvent> (synchronous fan-out)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backoff;
pub mod manager;
pub mod probe;
pub mod quality;

pub use backoff::BackoffPolicy;
pub use manager::{
    ConnectionDiagnostics, ConnectionEvent, ConnectionManager, ConnectionMetrics,
    ConnectionState, ConnectionStatus,
};
pub use probe::{ConnectionProbe, ProbeStep, ScriptedProbe, StoreProbe};
pub use quality::ConnectionQuality;
