//! Document store abstraction
//!
//! The engine treats the store as an opaque document database with live
//! queries: `subscribe(query)` yields an initial snapshot plus an ordered
//! stream of incremental change batches until the stream is dropped.
//! Concrete SDKs sit behind [`DocumentStore`]; tests inject
//! [`super::MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::types::{AppointmentId, Role, UserId};

/// Collections the engine reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    WeeklyAvailability,
    ScheduleOverrides,
    Appointments,
    Presence,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::WeeklyAvailability => write!(f, "weekly_availability"),
            Collection::ScheduleOverrides => write!(f, "schedule_overrides"),
            Collection::Appointments => write!(f, "appointments"),
            Collection::Presence => write!(f, "presence"),
        }
    }
}

/// Query predicates the engine issues
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// Every weekly rule of an owner
    AvailabilityForOwner(UserId),
    /// Every override of an owner
    OverridesForOwner(UserId),
    /// Appointments where the user holds `role`
    AppointmentsFor { user_id: UserId, role: Role },
    /// An owner's appointments on one date (conflict checks)
    AppointmentsOn { owner_id: UserId, date: NaiveDate },
    /// A single appointment
    AppointmentById(AppointmentId),
    /// A user's presence record
    Presence(UserId),
}

impl Query {
    /// Collection the query runs against
    pub fn collection(&self) -> Collection {
        match self {
            Query::AvailabilityForOwner(_) => Collection::WeeklyAvailability,
            Query::OverridesForOwner(_) => Collection::ScheduleOverrides,
            Query::AppointmentsFor { .. }
            | Query::AppointmentsOn { .. }
            | Query::AppointmentById(_) => Collection::Appointments,
            Query::Presence(_) => Collection::Presence,
        }
    }

    /// Evaluate the predicate against a raw document.
    ///
    /// Provided so store implementations without a native query language
    /// can filter documents the same way.
    pub fn matches(&self, doc: &RawDocument) -> bool {
        match self {
            Query::AvailabilityForOwner(owner) | Query::OverridesForOwner(owner) => {
                doc.field_str("owner_id") == Some(owner.as_str())
            }
            Query::AppointmentsFor { user_id, role } => {
                let field = match role {
                    Role::Owner => "owner_id",
                    Role::Counterparty => "counterparty_id",
                };
                doc.field_str(field) == Some(user_id.as_str())
            }
            Query::AppointmentsOn { owner_id, date } => {
                doc.field_str("owner_id") == Some(owner_id.as_str())
                    && doc
                        .field_str("scheduled_for")
                        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                        .map(|at| at.with_timezone(&Utc).date_naive() == *date)
                        .unwrap_or(false)
            }
            Query::AppointmentById(id) => doc.id == id.to_string_repr(),
            Query::Presence(user) => doc.field_str("user_id") == Some(user.as_str()),
        }
    }
}

/// An undecoded document as delivered by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub data: Value,
}

impl RawDocument {
    /// Serialize a typed record into a document
    pub fn encode<T: Serialize>(id: impl Into<String>, value: &T) -> EngineResult<Self> {
        Ok(Self {
            id: id.into(),
            data: serde_json::to_value(value)?,
        })
    }

    /// Decode into a typed record; malformed payloads are data errors.
    pub fn decode<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| EngineError::Data(format!("document {}: {}", self.id, e)))
    }

    fn field_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// One incremental change inside a pushed batch
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    Added(RawDocument),
    Modified(RawDocument),
    Removed { id: String },
}

/// Ordered stream of change batches for one live query
pub type ChangeStream = BoxStream<'static, EngineResult<Vec<DocumentChange>>>;

/// Result of establishing a live query
pub struct LiveQuery {
    /// Documents matching the query at subscription time
    pub snapshot: Vec<RawDocument>,
    /// Subsequent change batches, in store order
    pub changes: ChangeStream,
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("snapshot", &self.snapshot.len())
            .finish_non_exhaustive()
    }
}

/// Opaque document database with live-query push
///
/// Implementations must deliver each subscription's batches in order and
/// exactly once. Dropping the [`ChangeStream`] ends the subscription.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Establish a live query
    async fn subscribe(&self, query: &Query) -> EngineResult<LiveQuery>;

    /// One-shot read
    async fn fetch(&self, query: &Query) -> EngineResult<Vec<RawDocument>>;

    /// Insert or replace a document
    async fn put(&self, collection: Collection, doc: RawDocument) -> EngineResult<()>;

    /// Delete a document; deleting a missing id is not an error
    async fn delete(&self, collection: Collection, id: &str) -> EngineResult<()>;
}
