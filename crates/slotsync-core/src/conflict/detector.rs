//! Booking, availability and override conflict detection

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use super::{ConflictKind, ConflictRecord, ConflictingEntity, RequestedAction};
use crate::error::EngineResult;
use crate::sync::store::{DocumentStore, Query};
use crate::types::{
    Appointment, AppointmentId, Role, ScheduleOverride, SlotCatalog, TimeSlot, TimeSlotId, UserId,
};

/// Active appointments of `owner_id` that collide with `slot` on `date`.
///
/// A collision is the same slot id on the same date, or any overlap of the
/// `[start, end)` intervals. Cancelled, completed and no-show appointments
/// never collide. Results are ordered by start, then id.
pub fn find_booking_conflicts<'a>(
    existing: &'a [Appointment],
    owner_id: &UserId,
    slot: &TimeSlot,
    date: NaiveDate,
    exclude: Option<&AppointmentId>,
) -> Vec<&'a Appointment> {
    let (start, end) = slot.interval_on(date);
    let mut hits: Vec<&Appointment> = existing
        .iter()
        .filter(|appt| {
            &appt.owner_id == owner_id
                && appt.status.is_active()
                && Some(&appt.id) != exclude
                && ((appt.time_slot_id == slot.id && appt.date() == date)
                    || appt.overlaps(start, end))
        })
        .collect();
    hits.sort_by(|a, b| (a.scheduled_for, a.id).cmp(&(b.scheduled_for, b.id)));
    hits
}

/// Non-cancelled appointments holding `slot` on `date`, other than the
/// requester's own.
pub fn find_availability_conflicts<'a>(
    existing: &'a [Appointment],
    owner_id: &UserId,
    slot: &TimeSlot,
    date: NaiveDate,
    excluding_requester: Option<&UserId>,
) -> Vec<&'a Appointment> {
    let (start, end) = slot.interval_on(date);
    existing
        .iter()
        .filter(|appt| {
            &appt.owner_id == owner_id
                && appt.status.occupies_slot()
                && Some(&appt.counterparty_id) != excluding_requester
                && ((appt.time_slot_id == slot.id && appt.date() == date)
                    || appt.overlaps(start, end))
        })
        .collect()
}

/// One `override_conflict` record per active appointment the override
/// would strand.
pub fn detect_override_conflicts(
    candidate: &ScheduleOverride,
    appointments: &[Appointment],
) -> Vec<ConflictRecord> {
    appointments
        .iter()
        .filter(|appt| {
            appt.owner_id == candidate.owner_id
                && appt.status.is_active()
                && candidate.applies_on(appt.date())
                && candidate.closes(&appt.time_slot_id)
        })
        .map(|appt| {
            ConflictRecord::new(
                ConflictKind::OverrideConflict,
                ConflictingEntity::Appointment(appt.clone()),
                RequestedAction::SetOverride {
                    override_id: candidate.id,
                },
            )
        })
        .collect()
}

/// Store-backed conflict checks
///
/// Each check is a one-shot read of the owner's appointments for the date,
/// so results reflect the store rather than any cache.
pub struct ConflictDetector {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<SlotCatalog>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn DocumentStore>, catalog: Arc<SlotCatalog>) -> Self {
        Self { store, catalog }
    }

    async fn appointments_on(&self, owner_id: &UserId, date: NaiveDate) -> EngineResult<Vec<Appointment>> {
        let query = Query::AppointmentsOn {
            owner_id: owner_id.clone(),
            date,
        };
        self.store
            .fetch(&query)
            .await?
            .iter()
            .map(|doc| doc.decode::<Appointment>())
            .collect()
    }

    /// Check a proposed booking (or reschedule when `exclude` is set).
    ///
    /// Returns a `booking_conflict` against the earliest colliding
    /// appointment, or `None` when the slot is free.
    pub async fn detect_booking_conflict(
        &self,
        owner_id: &UserId,
        slot_id: &TimeSlotId,
        date: NaiveDate,
        exclude: Option<&AppointmentId>,
    ) -> EngineResult<Option<ConflictRecord>> {
        let slot = self.catalog.require(slot_id)?;
        let existing = self.appointments_on(owner_id, date).await?;
        let hit = find_booking_conflicts(&existing, owner_id, slot, date, exclude)
            .into_iter()
            .next();

        let Some(conflicting) = hit else {
            return Ok(None);
        };

        debug!(
            %owner_id,
            slot = %slot.id,
            %date,
            conflicting = %conflicting.id,
            "Booking conflict detected"
        );

        let action = match exclude {
            Some(appointment_id) => RequestedAction::Reschedule {
                appointment_id: *appointment_id,
                time_slot_id: slot.id.clone(),
                date,
            },
            None => RequestedAction::Book {
                owner_id: owner_id.clone(),
                requester_id: None,
                time_slot_id: slot.id.clone(),
                date,
            },
        };
        Ok(Some(ConflictRecord::new(
            ConflictKind::BookingConflict,
            ConflictingEntity::Appointment(conflicting.clone()),
            action,
        )))
    }

    /// Check a slot two requesters are racing for.
    ///
    /// Returns one `availability_conflict` per appointment already holding
    /// the slot, excluding the requester's own.
    pub async fn detect_availability_conflict(
        &self,
        owner_id: &UserId,
        slot_id: &TimeSlotId,
        date: NaiveDate,
        excluding_requester: Option<&UserId>,
    ) -> EngineResult<Vec<ConflictRecord>> {
        let slot = self.catalog.require(slot_id)?;
        let existing = self.appointments_on(owner_id, date).await?;
        Ok(
            find_availability_conflicts(&existing, owner_id, slot, date, excluding_requester)
                .into_iter()
                .map(|appt| {
                    ConflictRecord::new(
                        ConflictKind::AvailabilityConflict,
                        ConflictingEntity::Appointment(appt.clone()),
                        RequestedAction::Book {
                            owner_id: owner_id.clone(),
                            requester_id: excluding_requester.cloned(),
                            time_slot_id: slot.id.clone(),
                            date,
                        },
                    )
                })
                .collect(),
        )
    }

    /// Active appointments the override would strand, read from the store.
    pub async fn detect_override_conflicts(
        &self,
        candidate: &ScheduleOverride,
    ) -> EngineResult<Vec<ConflictRecord>> {
        let query = Query::AppointmentsFor {
            user_id: candidate.owner_id.clone(),
            role: Role::Owner,
        };
        let appointments = self
            .store
            .fetch(&query)
            .await?
            .iter()
            .map(|doc| doc.decode::<Appointment>())
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(detect_override_conflicts(candidate, &appointments))
    }
}
