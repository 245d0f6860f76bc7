//! Bus event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictRecord;
use crate::sync::dataset::{Dataset, SubscriptionKey};

/// Category a data event is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Availability,
    Appointment,
    Override,
    Presence,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Availability,
        EventCategory::Appointment,
        EventCategory::Override,
        EventCategory::Presence,
    ];
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Availability => write!(f, "availability"),
            EventCategory::Appointment => write!(f, "appointment"),
            EventCategory::Override => write!(f, "override"),
            EventCategory::Presence => write!(f, "presence"),
        }
    }
}

/// What the underlying store change did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    /// Single action describing a batch: uniform batches keep their action,
    /// mixed batches are updates.
    pub fn summarize(actions: impl IntoIterator<Item = ChangeAction>) -> ChangeAction {
        let mut iter = actions.into_iter();
        let Some(first) = iter.next() else {
            return ChangeAction::Updated;
        };
        if iter.all(|a| a == first) {
            first
        } else {
            ChangeAction::Updated
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Created => write!(f, "created"),
            ChangeAction::Updated => write!(f, "updated"),
            ChangeAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// A cache update published by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusEvent {
    pub key: SubscriptionKey,
    pub action: ChangeAction,
    /// Cache version after the update
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Full record set for the key after the update
    pub data: Dataset,
}

impl BusEvent {
    pub fn category(&self) -> EventCategory {
        self.key.category()
    }
}

/// Everything mirrored onto the async bus stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "event", rename_all = "snake_case")]
pub enum BusMessage {
    Change(BusEvent),
    Conflict(ConflictRecord),
}
