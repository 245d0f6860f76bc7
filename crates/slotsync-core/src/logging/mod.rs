//! JSONL logging for engine instances.
//!
//! Each instance appends to its own file so several processes can log into
//! one directory without coordinating.
//!
//! ## Layout
//!
//! ```text
//! logs/
//! └── raw/                              # one file per instance per day
//!     ├── 2026-10-16_primary.jsonl
//!     └── 2026-10-16_cli.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use slotsync_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("primary")
//!     .verbosity(1)
//!     .logs_dir("./logs")
//!     .init()?;
//! ```
//!
//! ### Querying with jq
//!
//! ```bash
//! # Every retried subscription
//! jq 'select(.msg == "Subscription setup failed, retrying")' logs/raw/*.jsonl
//!
//! # Connection transitions in order
//! cat logs/raw/*.jsonl | jq -s 'sort_by(.ts) | .[] | select(.target | endswith("connection::manager"))'
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::{LogRecord, LogSummary};
pub use layer::{verbosity_filter, JsonlLayer, LoggingBuilder};
pub use writer::{file_path, read_records, read_records_for, JsonlWriter};
