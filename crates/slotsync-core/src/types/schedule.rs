//! Recurring availability rules, date overrides and presence records

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{OverrideId, TimeSlotId, UserId};

/// Whether a recurring rule opens or closes its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Blocked,
}

fn default_max_concurrent() -> u32 {
    1
}

/// A recurring weekly rule: on `day_of_week`, slot `time_slot_id` has `status`.
///
/// Rules are replaced a whole day at a time; there is no partial merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    /// Therapist the rule belongs to
    pub owner_id: UserId,
    /// `0 = Sunday … 6 = Saturday`
    pub day_of_week: u8,
    /// Slot the rule applies to
    pub time_slot_id: TimeSlotId,
    /// Open or closed
    pub status: SlotStatus,
    /// Upper bound on simultaneous bookings for the slot
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_bookings: u32,
}

impl WeeklyAvailability {
    /// An `available` rule allowing a single booking
    pub fn available(owner_id: UserId, day_of_week: u8, time_slot_id: TimeSlotId) -> Self {
        Self {
            owner_id,
            day_of_week,
            time_slot_id,
            status: SlotStatus::Available,
            max_concurrent_bookings: 1,
        }
    }

    /// A `blocked` rule
    pub fn blocked(owner_id: UserId, day_of_week: u8, time_slot_id: TimeSlotId) -> Self {
        Self {
            status: SlotStatus::Blocked,
            ..Self::available(owner_id, day_of_week, time_slot_id)
        }
    }

    /// Document id used when the rule is written to the store
    pub fn document_id(&self) -> String {
        format!("{}:{}:{}", self.owner_id, self.day_of_week, self.time_slot_id)
    }
}

/// Kind of date-specific exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    /// Every slot is closed; `affected_slots` is ignored
    DayOff,
    /// `affected_slots` are removed from the effective set
    TimeOff,
    /// The effective set becomes exactly `affected_slots`
    CustomHours,
}

impl std::fmt::Display for OverrideType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideType::DayOff => write!(f, "day_off"),
            OverrideType::TimeOff => write!(f, "time_off"),
            OverrideType::CustomHours => write!(f, "custom_hours"),
        }
    }
}

/// An exception to the weekly rules for one date, or for every date in
/// `[date, recurrence_end]` when a recurrence end is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    pub id: OverrideId,
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub override_type: OverrideType,
    #[serde(default)]
    pub affected_slots: BTreeSet<TimeSlotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_end: Option<NaiveDate>,
}

impl ScheduleOverride {
    /// Create a single-date override
    pub fn new(
        owner_id: UserId,
        date: NaiveDate,
        override_type: OverrideType,
        affected_slots: impl IntoIterator<Item = TimeSlotId>,
    ) -> Self {
        Self {
            id: OverrideId::new(),
            owner_id,
            date,
            override_type,
            affected_slots: affected_slots.into_iter().collect(),
            reason: None,
            recurrence_end: None,
        }
    }

    /// Full day off on `date`
    pub fn day_off(owner_id: UserId, date: NaiveDate) -> Self {
        Self::new(owner_id, date, OverrideType::DayOff, std::iter::empty())
    }

    /// Attach a free-text reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Repeat the override on every date through `end` (inclusive)
    pub fn recurring_until(mut self, end: NaiveDate) -> Self {
        self.recurrence_end = Some(end);
        self
    }

    /// Whether the override covers `date`
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match self.recurrence_end {
            Some(end) => self.date <= date && date <= end,
            None => self.date == date,
        }
    }

    /// Whether the two overrides cover at least one common date
    pub fn shares_date_with(&self, other: &ScheduleOverride) -> bool {
        let self_end = self.recurrence_end.unwrap_or(self.date);
        let other_end = other.recurrence_end.unwrap_or(other.date);
        self.date <= other_end && other.date <= self_end
    }

    /// Whether `slot` is closed on the dates the override covers.
    pub fn closes(&self, slot: &TimeSlotId) -> bool {
        match self.override_type {
            OverrideType::DayOff => true,
            OverrideType::TimeOff => self.affected_slots.contains(slot),
            OverrideType::CustomHours => !self.affected_slots.contains(slot),
        }
    }
}

/// Online/offline marker a user publishes for others to observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}
