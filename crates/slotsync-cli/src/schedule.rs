//! Schedule files
//!
//! A schedule file is a JSON snapshot of one therapist's calendar, loaded
//! into an in-memory store so the CLI can resolve and book against it:
//!
//! ```json
//! {
//!   "owner": "therapist-1",
//!   "weekly": [{ "day": 1, "slots": ["09:00-10:00", "10:00-11:00"] }],
//!   "overrides": [{ "date": "2026-10-19", "type": "time_off", "slots": ["09:00-10:00"] }],
//!   "bookings": [{ "client": "client-1", "date": "2026-10-26", "slot": "09:00-10:00", "status": "confirmed" }]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use slotsync_core::{
    Appointment, AppointmentStatus, AvailabilityEngine, Collection, DocumentStore, MemoryStore,
    OverrideType, RawDocument, ScheduleOverride, TimeSlotId, UserId, WeeklyAvailability,
};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleFile {
    pub owner: UserId,
    #[serde(default)]
    pub weekly: Vec<WeeklyDay>,
    #[serde(default)]
    pub overrides: Vec<OverrideEntry>,
    #[serde(default)]
    pub bookings: Vec<BookingEntry>,
}

/// Open slots for one day of the week (`0 = Sunday`)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeeklyDay {
    pub day: u8,
    pub slots: Vec<TimeSlotId>,
    #[serde(default)]
    pub blocked: Vec<TimeSlotId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideEntry {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: OverrideType,
    #[serde(default)]
    pub slots: Vec<TimeSlotId>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Last date of a recurring override
    #[serde(default)]
    pub until: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingEntry {
    pub client: UserId,
    pub date: NaiveDate,
    pub slot: TimeSlotId,
    #[serde(default = "pending")]
    pub status: AppointmentStatus,
}

fn pending() -> AppointmentStatus {
    AppointmentStatus::Pending
}

impl ScheduleFile {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid schedule file {}", path.display()))
    }

    /// Write the schedule through the engine's validated write paths.
    ///
    /// Weekly rules and overrides go through the engine; bookings are seeded
    /// straight into the store with the status the file gives them.
    pub async fn load(&self, engine: &AvailabilityEngine, store: &MemoryStore) -> Result<()> {
        for day in &self.weekly {
            let rules = day
                .slots
                .iter()
                .map(|slot| WeeklyAvailability::available(self.owner.clone(), day.day, slot.clone()))
                .chain(
                    day.blocked
                        .iter()
                        .map(|slot| WeeklyAvailability::blocked(self.owner.clone(), day.day, slot.clone())),
                )
                .collect();
            engine
                .set_weekly_day(&self.owner, day.day, rules)
                .await
                .with_context(|| format!("Rejected weekly rules for day {}", day.day))?;
        }

        for entry in &self.overrides {
            let mut candidate =
                ScheduleOverride::new(self.owner.clone(), entry.date, entry.kind, entry.slots.clone());
            if let Some(reason) = &entry.reason {
                candidate = candidate.with_reason(reason.clone());
            }
            if let Some(until) = entry.until {
                candidate = candidate.recurring_until(until);
            }
            let stranded = engine
                .add_override(candidate)
                .await
                .with_context(|| format!("Rejected override on {}", entry.date))?;
            if !stranded.is_empty() {
                debug!(date = %entry.date, stranded = stranded.len(), "Override strands bookings");
            }
        }

        for entry in &self.bookings {
            let slot = engine
                .catalog()
                .require(&entry.slot)
                .with_context(|| format!("Unknown slot in booking for {}", entry.client))?;
            let appointment = Appointment::new(self.owner.clone(), entry.client.clone(), slot, entry.date)
                .with_status(entry.status);
            store
                .put(
                    Collection::Appointments,
                    RawDocument::encode(appointment.id.to_string_repr(), &appointment)?,
                )
                .await?;
        }

        info!(
            owner = %self.owner,
            weekly_days = self.weekly.len(),
            overrides = self.overrides.len(),
            bookings = self.bookings.len(),
            "Loaded schedule"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_minimal_schedule() {
        let file: ScheduleFile = serde_json::from_str(r#"{ "owner": "t1" }"#).unwrap();
        assert_eq!(file.owner, UserId::from("t1"));
        assert!(file.weekly.is_empty());
        assert!(file.bookings.is_empty());
    }

    #[test]
    fn test_parses_full_schedule() {
        let file: ScheduleFile = serde_json::from_str(
            r#"{
                "owner": "t1",
                "weekly": [{ "day": 1, "slots": ["09:00-10:00"], "blocked": ["10:00-11:00"] }],
                "overrides": [{ "date": "2026-10-19", "type": "custom_hours", "slots": ["12:00-13:00"], "until": "2026-10-30" }],
                "bookings": [{ "client": "c1", "date": "2026-10-26", "slot": "09:00-10:00" }]
            }"#,
        )
        .unwrap();
        assert_eq!(file.weekly[0].blocked.len(), 1);
        assert_eq!(file.overrides[0].kind, OverrideType::CustomHours);
        assert_eq!(file.overrides[0].until, NaiveDate::from_ymd_opt(2026, 10, 30));
        assert_eq!(file.bookings[0].status, AppointmentStatus::Pending);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = serde_json::from_str::<ScheduleFile>(r#"{ "owner": "t1", "extra": 1 }"#);
        assert!(err.is_err());
    }
}
