//! Conflict detection and the resolution queue
//!
//! Detection is advisory: it gives fast feedback before a write, while the
//! authoritative single-writer guarantee belongs to the store's
//! transactional write.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  ConflictDetector                                             │
//! │  ├── detect_booking_conflict      (pending/confirmed/...)     │
//! │  ├── detect_availability_conflict (racing requesters)         │
//! │  └── detect_override_conflicts    (bookings an override hits) │
//! │                                                               │
//! │  ConflictQueue                                                │
//! │  ├── unresolved records awaiting operator action              │
//! │  └── auto-resolves when the conflicting booking is cancelled  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod detector;
pub mod queue;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Appointment, AppointmentId, ConflictId, OverrideId, ScheduleOverride, TimeSlotId, UserId,
    WeeklyAvailability,
};

pub use detector::{
    detect_override_conflicts, find_availability_conflicts, find_booking_conflicts,
    ConflictDetector,
};
pub use queue::ConflictQueue;

/// What kind of write intents collided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    BookingConflict,
    AvailabilityConflict,
    OverrideConflict,
}

/// Snapshot of the entity that already holds the contested interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "entity", rename_all = "snake_case")]
pub enum ConflictingEntity {
    Appointment(Appointment),
    Override(ScheduleOverride),
    Availability(WeeklyAvailability),
}

impl ConflictingEntity {
    /// Appointment id when the snapshot is an appointment
    pub fn appointment_id(&self) -> Option<&AppointmentId> {
        match self {
            ConflictingEntity::Appointment(appt) => Some(&appt.id),
            _ => None,
        }
    }

    /// Whether both snapshots describe the same stored entity, whatever
    /// state each was captured in.
    pub fn same_entity(&self, other: &ConflictingEntity) -> bool {
        match (self, other) {
            (ConflictingEntity::Appointment(a), ConflictingEntity::Appointment(b)) => a.id == b.id,
            (ConflictingEntity::Override(a), ConflictingEntity::Override(b)) => a.id == b.id,
            (ConflictingEntity::Availability(a), ConflictingEntity::Availability(b)) => {
                a.owner_id == b.owner_id
                    && a.day_of_week == b.day_of_week
                    && a.time_slot_id == b.time_slot_id
            }
            _ => false,
        }
    }
}

/// The write that ran into the conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestedAction {
    /// A new booking for a slot
    Book {
        owner_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requester_id: Option<UserId>,
        time_slot_id: TimeSlotId,
        date: NaiveDate,
    },
    /// Moving an existing appointment to a slot
    Reschedule {
        appointment_id: AppointmentId,
        time_slot_id: TimeSlotId,
        date: NaiveDate,
    },
    /// Writing a schedule override
    SetOverride { override_id: OverrideId },
}

/// How a conflict was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Operator or UI action
    Manual,
    /// The conflicting appointment was cancelled
    ConflictingCancelled,
}

/// A detected overlap between a proposed action and an existing entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub kind: ConflictKind,
    pub conflicting: ConflictingEntity,
    pub requested_action: RequestedAction,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl ConflictRecord {
    /// A new unresolved record stamped with the current time
    pub fn new(
        kind: ConflictKind,
        conflicting: ConflictingEntity,
        requested_action: RequestedAction,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            kind,
            conflicting,
            requested_action,
            timestamp: Utc::now(),
            resolved: false,
            resolution: None,
        }
    }

    /// Appointment id of the conflicting entity, if it is an appointment
    pub fn conflicting_appointment(&self) -> Option<&AppointmentId> {
        self.conflicting.appointment_id()
    }

    /// Same kind of collision, against the same entity, for the same write
    pub fn same_collision(&self, other: &ConflictRecord) -> bool {
        self.kind == other.kind
            && self.requested_action == other.requested_action
            && self.conflicting.same_entity(&other.conflicting)
    }

    pub(crate) fn mark_resolved(&mut self, resolution: Resolution) {
        self.resolved = true;
        self.resolution = Some(resolution);
    }
}
