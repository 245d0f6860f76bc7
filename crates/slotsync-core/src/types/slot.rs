//! Time slots and minutes-since-midnight helpers
//!
//! A [`TimeSlot`] is immutable reference data: a start offset and a
//! duration within a day. Slots are created by configuration (the
//! [`SlotCatalog`]) and never mutated.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::TimeSlotId;
use crate::error::{EngineError, EngineResult};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Half-open interval overlap: `[start_a, end_a)` against `[start_b, end_b)`.
pub fn overlaps<T: PartialOrd>(start_a: T, end_a: T, start_b: T, end_b: T) -> bool {
    start_a < end_b && end_a > start_b
}

/// Parse `HH:MM` into minutes since midnight.
///
/// `24:00` is accepted as the end-of-day boundary.
pub fn parse_minutes(value: &str) -> EngineResult<u16> {
    let err = || EngineError::TimeParse(value.to_string());
    let (hours, minutes) = value.trim().split_once(':').ok_or_else(err)?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(err());
    }
    let hours: u16 = hours.parse().map_err(|_| err())?;
    let minutes: u16 = minutes.parse().map_err(|_| err())?;
    if minutes >= 60 {
        return Err(err());
    }
    let total = hours * 60 + minutes;
    if total > MINUTES_PER_DAY {
        return Err(err());
    }
    Ok(total)
}

/// Format minutes since midnight as zero-padded `HH:MM`.
pub fn format_minutes(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// A bookable slot within a day
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Stable identifier, conventionally `"HH:MM-HH:MM"`
    pub id: TimeSlotId,
    /// Start offset in minutes since midnight
    pub start_minute: u16,
    /// Length of the slot in minutes
    pub duration_minutes: u16,
    /// Human-readable label
    pub label: String,
}

impl TimeSlot {
    /// Create a slot from explicit parts.
    pub fn new(
        id: impl Into<TimeSlotId>,
        start_minute: u16,
        duration_minutes: u16,
        label: impl Into<String>,
    ) -> EngineResult<Self> {
        if duration_minutes == 0 {
            return Err(EngineError::Validation(
                "time slot duration must be positive".to_string(),
            ));
        }
        let end_minute = start_minute.checked_add(duration_minutes);
        if end_minute.map_or(true, |end| end > MINUTES_PER_DAY) {
            return Err(EngineError::Validation(format!(
                "time slot starting at {} overruns the day",
                format_minutes(start_minute)
            )));
        }
        Ok(Self {
            id: id.into(),
            start_minute,
            duration_minutes,
            label: label.into(),
        })
    }

    /// Build a slot from `HH:MM` bounds; the id becomes `"start-end"`.
    pub fn from_range(start: &str, end: &str) -> EngineResult<Self> {
        let start_minute = parse_minutes(start)?;
        let end_minute = parse_minutes(end)?;
        if end_minute <= start_minute {
            return Err(EngineError::Validation(format!(
                "time slot end {end} is not after start {start}"
            )));
        }
        let id = format!("{}-{}", format_minutes(start_minute), format_minutes(end_minute));
        let label = format!("{} - {}", format_minutes(start_minute), format_minutes(end_minute));
        Self::new(TimeSlotId(id), start_minute, end_minute - start_minute, label)
    }

    /// Parse a conventional `"HH:MM-HH:MM"` slot id.
    pub fn parse_id(id: &str) -> EngineResult<Self> {
        let (start, end) = id
            .split_once('-')
            .ok_or_else(|| EngineError::TimeParse(id.to_string()))?;
        Self::from_range(start, end)
    }

    /// End offset in minutes since midnight (exclusive)
    pub fn end_minute(&self) -> u16 {
        self.start_minute.saturating_add(self.duration_minutes)
    }

    /// Whether two slots share any minute of the day
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        overlaps(
            self.start_minute,
            self.end_minute(),
            other.start_minute,
            other.end_minute(),
        )
    }

    /// Concrete UTC instant at which this slot starts on `date`
    pub fn start_on(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(NaiveTime::default()).and_utc()
            + Duration::minutes(i64::from(self.start_minute))
    }

    /// Concrete `[start, end)` interval of this slot on `date`
    pub fn interval_on(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_on(date);
        (start, start + Duration::minutes(i64::from(self.duration_minutes)))
    }
}

/// The configured set of time slots, ordered by start time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCatalog {
    slots: Vec<TimeSlot>,
}

impl SlotCatalog {
    /// Build a catalog; rejects duplicate ids.
    pub fn new(mut slots: Vec<TimeSlot>) -> EngineResult<Self> {
        slots.sort_by(|a, b| {
            a.start_minute
                .cmp(&b.start_minute)
                .then_with(|| a.id.cmp(&b.id))
        });
        for pair in slots.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(EngineError::Validation(format!(
                    "duplicate time slot id {}",
                    pair[0].id
                )));
            }
        }
        Ok(Self { slots })
    }

    /// One-hour slots from `first_hour:00` up to `last_hour:00`.
    pub fn hourly(first_hour: u16, last_hour: u16) -> Self {
        let slots = (first_hour..last_hour.min(24))
            .filter_map(|hour| {
                TimeSlot::from_range(&format_minutes(hour * 60), &format_minutes((hour + 1) * 60))
                    .ok()
            })
            .collect();
        Self { slots }
    }

    /// Look up a slot by id
    pub fn get(&self, id: &TimeSlotId) -> Option<&TimeSlot> {
        self.slots.iter().find(|slot| &slot.id == id)
    }

    /// Whether the id names a configured slot
    pub fn contains(&self, id: &TimeSlotId) -> bool {
        self.get(id).is_some()
    }

    /// Look up a slot, failing with a validation error when unknown.
    pub fn require(&self, id: &TimeSlotId) -> EngineResult<&TimeSlot> {
        self.get(id)
            .ok_or_else(|| EngineError::Validation(format!("unknown time slot {id}")))
    }

    /// All slots in start order
    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    /// Number of configured slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are configured
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Order a set of ids by start time; unknown ids are dropped.
    pub fn ordered<'a, I>(&self, ids: I) -> Vec<&TimeSlot>
    where
        I: IntoIterator<Item = &'a TimeSlotId>,
    {
        let wanted: std::collections::HashSet<&TimeSlotId> = ids.into_iter().collect();
        self.slots.iter().filter(|slot| wanted.contains(&slot.id)).collect()
    }
}

impl Default for SlotCatalog {
    /// Twelve hourly slots, `08:00-09:00` through `19:00-20:00`
    fn default() -> Self {
        Self::hourly(8, 20)
    }
}
