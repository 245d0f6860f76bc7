//! Day-of-week and business-day arithmetic
//!
//! Day indices follow the booking convention `0 = Sunday … 6 = Saturday`.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Day-of-week index of `date` (`0 = Sunday`).
pub fn day_index(date: NaiveDate) -> u8 {
    // num_days_from_sunday is always in 0..=6
    date.weekday().num_days_from_sunday() as u8
}

/// Inverse of [`day_index`]; `None` outside `0..=6`.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// The first date strictly after `from` that falls on `weekday`.
pub fn next_weekday(from: NaiveDate, weekday: Weekday) -> NaiveDate {
    let current = from.weekday().num_days_from_sunday() as i64;
    let target = weekday.num_days_from_sunday() as i64;
    let mut delta = (target - current).rem_euclid(7);
    if delta == 0 {
        delta = 7;
    }
    from + Duration::days(delta)
}

/// Monday through Friday
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Move `days` business days forward (or backward when negative),
/// skipping weekends. Starting on a weekend counts from that date.
pub fn add_business_days(date: NaiveDate, days: i64) -> NaiveDate {
    let step = if days >= 0 { 1 } else { -1 };
    let mut remaining = days.abs();
    let mut current = date;
    while remaining > 0 {
        current += Duration::days(step);
        if is_business_day(current) {
            remaining -= 1;
        }
    }
    current
}

/// Number of business days in `[from, to)`; negative when `to < from`.
pub fn business_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    if to < from {
        return -business_days_between(to, from);
    }
    let total_days = (to - from).num_days();
    let full_weeks = total_days / 7;
    let mut count = full_weeks * 5;
    let mut current = from + Duration::days(full_weeks * 7);
    while current < to {
        if is_business_day(current) {
            count += 1;
        }
        current += Duration::days(1);
    }
    count
}
