//! Write-boundary validation for schedule data
//!
//! Anything rejected here never reaches the store, so it never enters a
//! cache either.

use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::types::{OverrideType, ScheduleOverride, SlotCatalog, UserId, WeeklyAvailability};

fn require_owner(owner_id: &UserId) -> EngineResult<()> {
    if owner_id.as_str().trim().is_empty() {
        return Err(EngineError::Validation("owner id must not be empty".to_string()));
    }
    Ok(())
}

/// Check a single recurring rule against the slot catalog.
pub fn validate_weekly_rule(catalog: &SlotCatalog, rule: &WeeklyAvailability) -> EngineResult<()> {
    require_owner(&rule.owner_id)?;
    if rule.day_of_week > 6 {
        return Err(EngineError::Validation(format!(
            "day_of_week {} is outside 0..=6",
            rule.day_of_week
        )));
    }
    if rule.max_concurrent_bookings == 0 {
        return Err(EngineError::Validation(
            "max_concurrent_bookings must be at least 1".to_string(),
        ));
    }
    catalog.require(&rule.time_slot_id)?;
    Ok(())
}

/// Check a full replacement set for one (owner, day).
pub fn validate_weekly_day(
    catalog: &SlotCatalog,
    owner_id: &UserId,
    day_of_week: u8,
    rules: &[WeeklyAvailability],
) -> EngineResult<()> {
    require_owner(owner_id)?;
    let mut seen = HashSet::new();
    for rule in rules {
        validate_weekly_rule(catalog, rule)?;
        if &rule.owner_id != owner_id || rule.day_of_week != day_of_week {
            return Err(EngineError::Validation(format!(
                "rule for {} on day {} does not belong to {} on day {}",
                rule.owner_id, rule.day_of_week, owner_id, day_of_week
            )));
        }
        if !seen.insert(&rule.time_slot_id) {
            return Err(EngineError::Validation(format!(
                "slot {} listed twice for day {}",
                rule.time_slot_id, day_of_week
            )));
        }
    }
    Ok(())
}

/// Check an override before it is written.
///
/// `existing` holds the owner's current overrides. At most one override may
/// cover any date for an owner, so precedence between same-type overrides
/// never has to be guessed.
pub fn validate_override(
    catalog: &SlotCatalog,
    candidate: &ScheduleOverride,
    existing: &[ScheduleOverride],
) -> EngineResult<()> {
    require_owner(&candidate.owner_id)?;

    if let Some(end) = candidate.recurrence_end {
        if end < candidate.date {
            return Err(EngineError::Validation(format!(
                "recurrence end {end} is before override date {}",
                candidate.date
            )));
        }
    }

    if candidate.override_type != OverrideType::DayOff {
        for slot in &candidate.affected_slots {
            catalog.require(slot)?;
        }
    }

    if candidate.override_type == OverrideType::TimeOff && candidate.affected_slots.is_empty() {
        return Err(EngineError::Validation(
            "time_off override must name at least one slot".to_string(),
        ));
    }

    if let Some(clash) = existing.iter().find(|other| {
        other.id != candidate.id
            && other.owner_id == candidate.owner_id
            && other.shares_date_with(candidate)
    }) {
        return Err(EngineError::Validation(format!(
            "{} already has a {} override covering {}",
            candidate.owner_id, clash.override_type, clash.date
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeSlotId;
    use chrono::NaiveDate;

    fn catalog() -> SlotCatalog {
        SlotCatalog::hourly(8, 20)
    }

    fn owner() -> UserId {
        UserId::from("t1")
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_weekly_rule_rejects_unknown_slot() {
        let rule = WeeklyAvailability::available(owner(), 1, TimeSlotId::from("03:00-04:00"));
        let err = validate_weekly_rule(&catalog(), &rule).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_weekly_rule_rejects_bad_day_and_capacity() {
        let mut rule = WeeklyAvailability::available(owner(), 7, TimeSlotId::from("09:00-10:00"));
        assert!(validate_weekly_rule(&catalog(), &rule).is_err());
        rule.day_of_week = 1;
        rule.max_concurrent_bookings = 0;
        assert!(validate_weekly_rule(&catalog(), &rule).is_err());
        rule.max_concurrent_bookings = 2;
        assert!(validate_weekly_rule(&catalog(), &rule).is_ok());
    }

    #[test]
    fn test_weekly_day_rejects_foreign_and_duplicate_rules() {
        let nine = TimeSlotId::from("09:00-10:00");
        let good = WeeklyAvailability::available(owner(), 1, nine.clone());
        let other_day = WeeklyAvailability::available(owner(), 2, nine.clone());

        assert!(validate_weekly_day(&catalog(), &owner(), 1, &[good.clone()]).is_ok());
        assert!(validate_weekly_day(&catalog(), &owner(), 1, &[other_day]).is_err());
        assert!(validate_weekly_day(&catalog(), &owner(), 1, &[good.clone(), good]).is_err());
        assert!(validate_weekly_day(&catalog(), &owner(), 1, &[]).is_ok());
    }

    #[test]
    fn test_override_rejects_unknown_slot() {
        let ovr = ScheduleOverride::new(
            owner(),
            monday(),
            OverrideType::CustomHours,
            [TimeSlotId::from("22:00-23:00")],
        );
        assert!(validate_override(&catalog(), &ovr, &[]).is_err());
    }

    #[test]
    fn test_day_off_ignores_affected_slots() {
        let mut ovr = ScheduleOverride::day_off(owner(), monday());
        ovr.affected_slots.insert(TimeSlotId::from("bogus"));
        assert!(validate_override(&catalog(), &ovr, &[]).is_ok());
    }

    #[test]
    fn test_override_rejects_empty_time_off() {
        let ovr = ScheduleOverride::new(owner(), monday(), OverrideType::TimeOff, []);
        assert!(validate_override(&catalog(), &ovr, &[]).is_err());
    }

    #[test]
    fn test_override_rejects_inverted_recurrence() {
        let ovr = ScheduleOverride::day_off(owner(), monday())
            .recurring_until(monday() - chrono::Duration::days(1));
        assert!(validate_override(&catalog(), &ovr, &[]).is_err());
    }

    #[test]
    fn test_one_override_per_date() {
        let existing = ScheduleOverride::day_off(owner(), monday());
        let clash = ScheduleOverride::new(
            owner(),
            monday(),
            OverrideType::TimeOff,
            [TimeSlotId::from("09:00-10:00")],
        );
        let err = validate_override(&catalog(), &clash, &[existing.clone()]).unwrap_err();
        assert!(err.to_string().contains("day_off"));

        // Re-validating the stored override itself is fine
        assert!(validate_override(&catalog(), &existing, &[existing.clone()]).is_ok());

        // Other owners do not clash
        let other = ScheduleOverride::day_off(UserId::from("t2"), monday());
        assert!(validate_override(&catalog(), &other, &[existing]).is_ok());
    }
}
