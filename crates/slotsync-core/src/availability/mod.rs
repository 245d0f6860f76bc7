//! Availability resolution
//!
//! Turns recurring weekly rules, date overrides and existing bookings into
//! the effective set of bookable slots for a date, and validates schedule
//! writes before they reach the store.

pub mod resolver;
pub mod validation;

pub use resolver::{next_available, resolve, resolve_range};
pub use validation::{validate_override, validate_weekly_day, validate_weekly_rule};
