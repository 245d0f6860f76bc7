//! Effective slot resolution
//!
//! Pure functions with no I/O: the same inputs always produce the same set.
//!
//! ```text
//! weekly rules (day_of_week, available)
//!        │
//!        ▼
//!   base slots ──► day_off?  ──► ∅
//!        │
//!        ├──► time_off     (set subtraction)
//!        ├──► custom_hours (set replacement)
//!        ▼
//!   minus slots held by non-cancelled appointments on the date
//!        │
//!        ▼
//!   effective slot set
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate};

use crate::types::{
    day_index, Appointment, OverrideType, ScheduleOverride, SlotCatalog, SlotStatus, TimeSlotId,
    UserId, WeeklyAvailability,
};

/// Resolve the bookable slot ids for `owner_id` on `date`.
///
/// Rules, overrides and appointments belonging to other owners are ignored,
/// so callers may pass unfiltered collections.
pub fn resolve(
    owner_id: &UserId,
    date: NaiveDate,
    weekly: &[WeeklyAvailability],
    overrides: &[ScheduleOverride],
    booked: &[Appointment],
) -> BTreeSet<TimeSlotId> {
    let day = day_index(date);
    let mut slots: BTreeSet<TimeSlotId> = weekly
        .iter()
        .filter(|rule| {
            &rule.owner_id == owner_id
                && rule.day_of_week == day
                && rule.status == SlotStatus::Available
        })
        .map(|rule| rule.time_slot_id.clone())
        .collect();

    let todays: Vec<&ScheduleOverride> = overrides
        .iter()
        .filter(|ovr| &ovr.owner_id == owner_id && ovr.applies_on(date))
        .collect();

    if todays
        .iter()
        .any(|ovr| ovr.override_type == OverrideType::DayOff)
    {
        return BTreeSet::new();
    }

    for ovr in todays
        .iter()
        .filter(|ovr| ovr.override_type == OverrideType::TimeOff)
    {
        slots.retain(|slot| !ovr.affected_slots.contains(slot));
    }

    for ovr in todays
        .iter()
        .filter(|ovr| ovr.override_type == OverrideType::CustomHours)
    {
        slots = ovr.affected_slots.clone();
    }

    for appt in booked.iter().filter(|appt| {
        &appt.owner_id == owner_id && appt.date() == date && appt.status.occupies_slot()
    }) {
        slots.remove(&appt.time_slot_id);
    }

    slots
}

/// Resolve every date in `[from, to]`.
///
/// The walk stops at the last representable date.
pub fn resolve_range(
    owner_id: &UserId,
    from: NaiveDate,
    to: NaiveDate,
    weekly: &[WeeklyAvailability],
    overrides: &[ScheduleOverride],
    booked: &[Appointment],
) -> BTreeMap<NaiveDate, BTreeSet<TimeSlotId>> {
    let mut out = BTreeMap::new();
    let mut date = from;
    while date <= to {
        out.insert(date, resolve(owner_id, date, weekly, overrides, booked));
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    out
}

/// Earliest bookable slot within `horizon_days` starting at `from`.
///
/// Slots are ordered by the catalog's start times; ids missing from the
/// catalog are skipped. A horizon reaching past the last representable date
/// is cut short there.
pub fn next_available(
    owner_id: &UserId,
    from: NaiveDate,
    horizon_days: u32,
    catalog: &SlotCatalog,
    weekly: &[WeeklyAvailability],
    overrides: &[ScheduleOverride],
    booked: &[Appointment],
) -> Option<(NaiveDate, TimeSlotId)> {
    (0..horizon_days)
        .map_while(|offset| from.checked_add_days(Days::new(u64::from(offset))))
        .find_map(|date| {
            let open = resolve(owner_id, date, weekly, overrides, booked);
            catalog
                .ordered(open.iter())
                .first()
                .map(|slot| (date, slot.id.clone()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppointmentStatus, TimeSlot};
    use chrono::Duration;

    fn owner() -> UserId {
        UserId::from("therapist-1")
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn slot(id: &str) -> TimeSlotId {
        TimeSlotId::from(id)
    }

    fn monday_rules(ids: &[&str]) -> Vec<WeeklyAvailability> {
        ids.iter()
            .map(|id| WeeklyAvailability::available(owner(), 1, slot(id)))
            .collect()
    }

    fn booked(id: &str, status: AppointmentStatus) -> Appointment {
        let time_slot = TimeSlot::parse_id(id).unwrap();
        Appointment::new(owner(), UserId::from("client-1"), &time_slot, monday()).with_status(status)
    }

    fn set(ids: &[&str]) -> BTreeSet<TimeSlotId> {
        ids.iter().map(|id| slot(id)).collect()
    }

    #[test]
    fn test_weekly_rules_only() {
        let weekly = monday_rules(&["09:00-10:00", "10:00-11:00"]);
        let result = resolve(&owner(), monday(), &weekly, &[], &[]);
        assert_eq!(result, set(&["09:00-10:00", "10:00-11:00"]));
    }

    #[test]
    fn test_blocked_rules_and_other_days_ignored() {
        let mut weekly = monday_rules(&["09:00-10:00"]);
        weekly.push(WeeklyAvailability::blocked(owner(), 1, slot("10:00-11:00")));
        weekly.push(WeeklyAvailability::available(owner(), 2, slot("11:00-12:00")));
        weekly.push(WeeklyAvailability::available(UserId::from("other"), 1, slot("12:00-13:00")));

        let result = resolve(&owner(), monday(), &weekly, &[], &[]);
        assert_eq!(result, set(&["09:00-10:00"]));
    }

    #[test]
    fn test_day_off_clears_everything() {
        let weekly = monday_rules(&["09:00-10:00", "10:00-11:00"]);
        let overrides = vec![
            ScheduleOverride::new(owner(), monday(), OverrideType::CustomHours, [slot("15:00-16:00")]),
            ScheduleOverride::day_off(owner(), monday()),
        ];
        assert!(resolve(&owner(), monday(), &weekly, &overrides, &[]).is_empty());
    }

    #[test]
    fn test_time_off_subtracts() {
        let weekly = monday_rules(&["09:00-10:00", "10:00-11:00"]);
        let overrides = vec![ScheduleOverride::new(
            owner(),
            monday(),
            OverrideType::TimeOff,
            [slot("09:00-10:00")],
        )];
        let result = resolve(&owner(), monday(), &weekly, &overrides, &[]);
        assert_eq!(result, set(&["10:00-11:00"]));
    }

    #[test]
    fn test_custom_hours_replaces_weekly_set() {
        let weekly = monday_rules(&["09:00-10:00"]);
        let overrides = vec![ScheduleOverride::new(
            owner(),
            monday(),
            OverrideType::CustomHours,
            [slot("14:00-15:00"), slot("15:00-16:00")],
        )];
        let bookings = vec![booked("15:00-16:00", AppointmentStatus::Confirmed)];
        let result = resolve(&owner(), monday(), &weekly, &overrides, &bookings);
        assert_eq!(result, set(&["14:00-15:00"]));
    }

    #[test]
    fn test_custom_hours_applied_after_time_off() {
        let weekly = monday_rules(&["09:00-10:00"]);
        let overrides = vec![
            ScheduleOverride::new(owner(), monday(), OverrideType::CustomHours, [slot("09:00-10:00")]),
            ScheduleOverride::new(owner(), monday(), OverrideType::TimeOff, [slot("09:00-10:00")]),
        ];
        let result = resolve(&owner(), monday(), &weekly, &overrides, &[]);
        assert_eq!(result, set(&["09:00-10:00"]));
    }

    #[test]
    fn test_last_custom_hours_wins() {
        let overrides = vec![
            ScheduleOverride::new(owner(), monday(), OverrideType::CustomHours, [slot("09:00-10:00")]),
            ScheduleOverride::new(owner(), monday(), OverrideType::CustomHours, [slot("11:00-12:00")]),
        ];
        let result = resolve(&owner(), monday(), &[], &overrides, &[]);
        assert_eq!(result, set(&["11:00-12:00"]));
    }

    #[test]
    fn test_recurring_override_applies_inside_window() {
        let weekly = monday_rules(&["09:00-10:00"]);
        let start = monday() - Duration::days(3);
        let overrides = vec![ScheduleOverride::day_off(owner(), start).recurring_until(monday())];
        assert!(resolve(&owner(), monday(), &weekly, &overrides, &[]).is_empty());

        let next_monday = monday() + Duration::days(7);
        let result = resolve(&owner(), next_monday, &weekly, &overrides, &[]);
        assert_eq!(result, set(&["09:00-10:00"]));
    }

    #[test]
    fn test_bookings_remove_slots_unless_cancelled() {
        let weekly = monday_rules(&["09:00-10:00", "10:00-11:00"]);
        let bookings = vec![
            booked("09:00-10:00", AppointmentStatus::Cancelled),
            booked("10:00-11:00", AppointmentStatus::Completed),
        ];
        let result = resolve(&owner(), monday(), &weekly, &[], &bookings);
        assert_eq!(result, set(&["09:00-10:00"]));
    }

    #[test]
    fn test_bookings_on_other_dates_ignored() {
        let weekly = monday_rules(&["09:00-10:00"]);
        let mut appt = booked("09:00-10:00", AppointmentStatus::Confirmed);
        appt.scheduled_for += Duration::days(7);
        let result = resolve(&owner(), monday(), &weekly, &[], &[appt]);
        assert_eq!(result, set(&["09:00-10:00"]));
    }

    #[test]
    fn test_resolve_range_covers_each_day() {
        let weekly = monday_rules(&["09:00-10:00"]);
        let range = resolve_range(&owner(), monday(), monday() + Duration::days(7), &weekly, &[], &[]);
        assert_eq!(range.len(), 8);
        assert_eq!(range[&monday()], set(&["09:00-10:00"]));
        assert!(range[&(monday() + Duration::days(1))].is_empty());
        assert_eq!(range[&(monday() + Duration::days(7))], set(&["09:00-10:00"]));
    }

    #[test]
    fn test_next_available_picks_earliest_slot() {
        let catalog = SlotCatalog::hourly(8, 20);
        let weekly = monday_rules(&["09:00-10:00", "08:00-09:00"]);
        let bookings = vec![booked("08:00-09:00", AppointmentStatus::Pending)];
        let saturday = monday() - Duration::days(2);

        let found = next_available(&owner(), saturday, 7, &catalog, &weekly, &[], &bookings);
        assert_eq!(found, Some((monday(), slot("09:00-10:00"))));

        let none = next_available(&owner(), saturday, 2, &catalog, &weekly, &[], &bookings);
        assert_eq!(none, None);
    }

    #[test]
    fn test_resolve_range_ends_at_last_date() {
        let weekly: Vec<WeeklyAvailability> = (0u8..7)
            .map(|day| WeeklyAvailability::available(owner(), day, slot("09:00-10:00")))
            .collect();
        let last = NaiveDate::MAX;
        let range = resolve_range(&owner(), last - Duration::days(1), last, &weekly, &[], &[]);
        assert_eq!(range.len(), 2);
        assert_eq!(range[&last], set(&["09:00-10:00"]));
    }

    #[test]
    fn test_next_available_horizon_past_last_date() {
        let catalog = SlotCatalog::hourly(8, 20);
        let start = NaiveDate::MAX - Duration::days(2);
        assert_eq!(
            next_available(&owner(), start, u32::MAX, &catalog, &[], &[], &[]),
            None
        );

        let weekly: Vec<WeeklyAvailability> = (0u8..7)
            .map(|day| WeeklyAvailability::available(owner(), day, slot("09:00-10:00")))
            .collect();
        let bookings: Vec<Appointment> = [start, start + Duration::days(1)]
            .into_iter()
            .map(|date| {
                let nine = TimeSlot::parse_id("09:00-10:00").unwrap();
                Appointment::new(owner(), UserId::from("client-1"), &nine, date)
                    .with_status(AppointmentStatus::Confirmed)
            })
            .collect();
        let found = next_available(&owner(), start, u32::MAX, &catalog, &weekly, &[], &bookings);
        assert_eq!(found, Some((NaiveDate::MAX, slot("09:00-10:00"))));
    }
}
