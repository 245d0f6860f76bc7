//! Core types for the availability engine
//!
//! Identifiers live here; the time model value types live in the
//! submodules and are re-exported below.

pub mod appointment;
pub mod calendar;
pub mod schedule;
pub mod slot;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use appointment::{Appointment, AppointmentStatus, PaymentStatus, Price};
pub use calendar::{
    add_business_days, business_days_between, day_index, is_business_day, next_weekday,
    weekday_from_index,
};
pub use schedule::{
    OverrideType, PresenceRecord, ScheduleOverride, SlotStatus, WeeklyAvailability,
};
pub use slot::{format_minutes, overlaps, parse_minutes, SlotCatalog, TimeSlot};

/// Identifier of a user supplied by the identity collaborator
///
/// Owners (therapists) and counterparties (clients) share one id space;
/// the role is carried separately where it matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap a raw identity id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which side of an appointment a user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The therapist whose schedule is booked
    Owner,
    /// The client booking the session
    Counterparty,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Counterparty => write!(f, "counterparty"),
        }
    }
}

/// Identifier of a configured time slot, e.g. `"09:00-10:00"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSlotId(pub String);

impl TimeSlotId {
    /// Wrap a raw slot id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TimeSlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TimeSlotId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Create a new id with the current timestamp
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse from the ULID string representation
            pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
                Ok(Self(Ulid::from_string(s)?))
            }

            /// ULID string without the display prefix
            pub fn to_string_repr(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for an appointment (time-ordered ULID)
    AppointmentId,
    "appt"
);

ulid_id!(
    /// Unique identifier for a schedule override
    OverrideId,
    "ovr"
);

ulid_id!(
    /// Unique identifier for a conflict record
    ConflictId,
    "conflict"
);
