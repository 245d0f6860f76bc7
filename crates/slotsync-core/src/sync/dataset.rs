//! Subscription keys and the typed record sets cached per key

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::store::{DocumentChange, Query, RawDocument};
use crate::bus::{ChangeAction, EventCategory};
use crate::error::EngineResult;
use crate::types::{
    Appointment, PresenceRecord, Role, ScheduleOverride, UserId, WeeklyAvailability,
};

/// One (entity-type, key) pair the orchestrator keeps a live query for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionKey {
    Availability { owner_id: UserId },
    Overrides { owner_id: UserId },
    Appointments { user_id: UserId, role: Role },
    Presence { user_id: UserId },
}

impl SubscriptionKey {
    pub fn availability(owner_id: UserId) -> Self {
        Self::Availability { owner_id }
    }

    pub fn overrides(owner_id: UserId) -> Self {
        Self::Overrides { owner_id }
    }

    pub fn appointments(user_id: UserId, role: Role) -> Self {
        Self::Appointments { user_id, role }
    }

    pub fn presence(user_id: UserId) -> Self {
        Self::Presence { user_id }
    }

    /// Bus category events for this key are published on
    pub fn category(&self) -> EventCategory {
        match self {
            SubscriptionKey::Availability { .. } => EventCategory::Availability,
            SubscriptionKey::Overrides { .. } => EventCategory::Override,
            SubscriptionKey::Appointments { .. } => EventCategory::Appointment,
            SubscriptionKey::Presence { .. } => EventCategory::Presence,
        }
    }

    /// Live query backing this key
    pub fn query(&self) -> Query {
        match self {
            SubscriptionKey::Availability { owner_id } => {
                Query::AvailabilityForOwner(owner_id.clone())
            }
            SubscriptionKey::Overrides { owner_id } => Query::OverridesForOwner(owner_id.clone()),
            SubscriptionKey::Appointments { user_id, role } => Query::AppointmentsFor {
                user_id: user_id.clone(),
                role: *role,
            },
            SubscriptionKey::Presence { user_id } => Query::Presence(user_id.clone()),
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionKey::Availability { owner_id } => write!(f, "availability:{owner_id}"),
            SubscriptionKey::Overrides { owner_id } => write!(f, "overrides:{owner_id}"),
            SubscriptionKey::Appointments { user_id, role } => {
                write!(f, "appointments:{user_id}:{role}")
            }
            SubscriptionKey::Presence { user_id } => write!(f, "presence:{user_id}"),
        }
    }
}

/// Decoded documents for one key, indexed by document id
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Dataset {
    Availability(BTreeMap<String, WeeklyAvailability>),
    Overrides(BTreeMap<String, ScheduleOverride>),
    Appointments(BTreeMap<String, Appointment>),
    Presence(BTreeMap<String, PresenceRecord>),
}

fn decode_all<T: DeserializeOwned>(docs: &[RawDocument]) -> EngineResult<BTreeMap<String, T>> {
    docs.iter()
        .map(|doc| Ok((doc.id.clone(), doc.decode()?)))
        .collect()
}

fn apply_to<T: DeserializeOwned>(
    records: &mut BTreeMap<String, T>,
    change: &DocumentChange,
) -> EngineResult<ChangeAction> {
    match change {
        DocumentChange::Added(doc) => {
            records.insert(doc.id.clone(), doc.decode()?);
            Ok(ChangeAction::Created)
        }
        DocumentChange::Modified(doc) => {
            records.insert(doc.id.clone(), doc.decode()?);
            Ok(ChangeAction::Updated)
        }
        DocumentChange::Removed { id } => {
            records.remove(id);
            Ok(ChangeAction::Deleted)
        }
    }
}

impl Dataset {
    /// Decode an initial snapshot for `key`
    pub fn from_snapshot(key: &SubscriptionKey, docs: &[RawDocument]) -> EngineResult<Self> {
        Ok(match key.category() {
            EventCategory::Availability => Dataset::Availability(decode_all(docs)?),
            EventCategory::Override => Dataset::Overrides(decode_all(docs)?),
            EventCategory::Appointment => Dataset::Appointments(decode_all(docs)?),
            EventCategory::Presence => Dataset::Presence(decode_all(docs)?),
        })
    }

    /// Apply one change in place and report the action it represents.
    ///
    /// On a decode error the record being changed is left untouched, but
    /// earlier changes of the same batch are not rolled back; callers apply
    /// batches to a copy.
    pub fn apply(&mut self, change: &DocumentChange) -> EngineResult<ChangeAction> {
        match self {
            Dataset::Availability(records) => apply_to(records, change),
            Dataset::Overrides(records) => apply_to(records, change),
            Dataset::Appointments(records) => apply_to(records, change),
            Dataset::Presence(records) => apply_to(records, change),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Dataset::Availability(r) => r.len(),
            Dataset::Overrides(r) => r.len(),
            Dataset::Appointments(r) => r.len(),
            Dataset::Presence(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weekly rules, or nothing for other dataset kinds
    pub fn availability(&self) -> Vec<WeeklyAvailability> {
        match self {
            Dataset::Availability(r) => r.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Overrides in date order
    pub fn overrides(&self) -> Vec<ScheduleOverride> {
        match self {
            Dataset::Overrides(r) => {
                let mut out: Vec<_> = r.values().cloned().collect();
                out.sort_by(|a, b| (a.date, a.id).cmp(&(b.date, b.id)));
                out
            }
            _ => Vec::new(),
        }
    }

    /// Appointments in start order
    pub fn appointments(&self) -> Vec<Appointment> {
        match self {
            Dataset::Appointments(r) => {
                let mut out: Vec<_> = r.values().cloned().collect();
                out.sort_by_key(|a| (a.scheduled_for, a.id));
                out
            }
            _ => Vec::new(),
        }
    }

    pub fn presence(&self) -> Option<PresenceRecord> {
        match self {
            Dataset::Presence(r) => r.values().next().cloned(),
            _ => None,
        }
    }
}
