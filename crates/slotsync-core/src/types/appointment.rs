//! Appointment records and their lifecycle
//!
//! ```text
//! pending ──► confirmed ──► in_progress ──► completed
//!    │            │  │
//!    │            │  └──────────────────────► completed
//!    ▼            ▼
//! cancelled   cancelled / no_show
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{AppointmentId, TimeSlot, TimeSlotId, UserId};
use crate::error::{EngineError, EngineResult};

/// Where an appointment is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that still compete for the slot in conflict detection
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::InProgress
        )
    }

    /// Whether the appointment keeps its slot out of the bookable set
    pub fn occupies_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (InProgress, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment state reported by the payment collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Booking amount in minor units of `currency`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor: i64,
    pub currency: String,
}

/// A booked session between an owner and a counterparty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub owner_id: UserId,
    pub counterparty_id: UserId,
    pub time_slot_id: TimeSlotId,
    /// Start instant
    pub scheduled_for: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

impl Appointment {
    /// A new `pending` appointment occupying `slot` on `date`
    pub fn new(owner_id: UserId, counterparty_id: UserId, slot: &TimeSlot, date: NaiveDate) -> Self {
        Self {
            id: AppointmentId::new(),
            owner_id,
            counterparty_id,
            time_slot_id: slot.id.clone(),
            scheduled_for: slot.start_on(date),
            duration_minutes: u32::from(slot.duration_minutes),
            status: AppointmentStatus::Pending,
            payment_status: PaymentStatus::Pending,
            price: None,
        }
    }

    /// Attach the booking amount
    pub fn with_price(mut self, amount_minor: i64, currency: impl Into<String>) -> Self {
        self.price = Some(Price {
            amount_minor,
            currency: currency.into(),
        });
        self
    }

    /// Set the status directly, bypassing lifecycle checks (fixtures, imports)
    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        self.status = status;
        self
    }

    /// Calendar date (UTC) the appointment falls on
    pub fn date(&self) -> NaiveDate {
        self.scheduled_for.date_naive()
    }

    /// End instant (exclusive)
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_for + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whether `[start, end)` overlaps this appointment's interval
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        super::overlaps(self.scheduled_for, self.ends_at(), start, end)
    }

    /// Move to `next`, enforcing the lifecycle.
    pub fn transition_to(&mut self, next: AppointmentStatus) -> EngineResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nine_am() -> TimeSlot {
        TimeSlot::from_range("09:00", "10:00").unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn booking() -> Appointment {
        Appointment::new(UserId::from("t1"), UserId::from("c1"), &nine_am(), monday())
    }

    #[test]
    fn test_new_appointment_is_pending() {
        let appt = booking();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.payment_status, PaymentStatus::Pending);
        assert_eq!(appt.date(), monday());
        assert_eq!(appt.duration_minutes, 60);
        assert_eq!(appt.ends_at() - appt.scheduled_for, Duration::minutes(60));
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut appt = booking();
        appt.transition_to(AppointmentStatus::Confirmed).unwrap();
        appt.transition_to(AppointmentStatus::InProgress).unwrap();
        appt.transition_to(AppointmentStatus::Completed).unwrap();
        assert!(appt.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut appt = booking().with_status(AppointmentStatus::Cancelled);
        let err = appt.transition_to(AppointmentStatus::Confirmed).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(appt.status, AppointmentStatus::Cancelled);
    }

    #[test]
    fn test_same_status_transition_is_noop() {
        let mut appt = booking();
        appt.transition_to(AppointmentStatus::Pending).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Pending);
    }

    #[test]
    fn test_active_and_occupying_statuses() {
        use AppointmentStatus::*;
        assert!(Pending.is_active() && Confirmed.is_active() && InProgress.is_active());
        assert!(!Completed.is_active() && !NoShow.is_active() && !Cancelled.is_active());

        assert!(Completed.occupies_slot());
        assert!(NoShow.occupies_slot());
        assert!(!Cancelled.occupies_slot());
    }

    #[test]
    fn test_overlap_uses_half_open_interval() {
        let appt = booking();
        let (start, end) = TimeSlot::from_range("10:00", "11:00").unwrap().interval_on(monday());
        assert!(!appt.overlaps(start, end));
        let (start, end) = TimeSlot::from_range("09:30", "10:30").unwrap().interval_on(monday());
        assert!(appt.overlaps(start, end));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AppointmentStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let json = serde_json::to_string(&AppointmentStatus::NoShow).unwrap();
        assert_eq!(json, "\"no_show\"");
    }
}
