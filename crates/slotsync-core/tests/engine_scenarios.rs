//! End-to-end booking scenarios through AvailabilityEngine
//!
//! Each test drives the engine against an in-memory store the way the web
//! layer would: owners write schedules, clients request bookings, and the
//! payment collaborator reports outcomes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, Weekday};
use parking_lot::Mutex;
use slotsync_core::{
    next_weekday, AppointmentStatus, AvailabilityEngine, BookingOutcome, BookingRequest,
    ConflictKind, EngineConfig, EngineError, ManualClock, MemoryStore, OverrideType,
    PaymentNotice, PaymentSignal, Role, ScheduleOverride, ScriptedProbe, SlotCatalog, TimeSlotId,
    UserId, WeeklyAvailability,
};

// ============================================================================
// Helpers
// ============================================================================

fn therapist() -> UserId {
    UserId::from("therapist-1")
}

fn today() -> NaiveDate {
    // A Friday
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn next_monday() -> NaiveDate {
    next_weekday(today(), Weekday::Mon)
}

fn nine() -> TimeSlotId {
    TimeSlotId::from("09:00-10:00")
}

fn engine() -> AvailabilityEngine {
    AvailabilityEngine::with_collaborators(
        EngineConfig::default(),
        Arc::new(MemoryStore::new()),
        SlotCatalog::default(),
        Arc::new(ScriptedProbe::healthy(Duration::from_millis(20))),
        Arc::new(ManualClock::default()),
    )
    .unwrap()
}

async fn monday_nine_available(engine: &AvailabilityEngine) {
    engine
        .set_weekly_day(
            &therapist(),
            1,
            vec![WeeklyAvailability::available(therapist(), 1, nine())],
        )
        .await
        .unwrap();
}

fn booking(client: &str) -> BookingRequest {
    BookingRequest {
        owner_id: therapist(),
        counterparty_id: UserId::from(client),
        time_slot_id: nine(),
        date: next_monday(),
        price: None,
    }
}

async fn book(engine: &AvailabilityEngine, client: &str) -> slotsync_core::Appointment {
    match engine.request_booking(booking(client)).await.unwrap() {
        BookingOutcome::Requested { appointment } => appointment,
        BookingOutcome::Conflict { conflict } => panic!("unexpected conflict {conflict:?}"),
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Resolution scenarios
// ============================================================================

#[tokio::test]
async fn test_weekly_rule_only() {
    let engine = engine();
    monday_nine_available(&engine).await;

    let view = engine
        .resolve_available_slots(&therapist(), next_monday())
        .await
        .unwrap();
    assert_eq!(view.slots, BTreeSet::from([nine()]));
    assert!(!view.is_stale);
}

#[tokio::test]
async fn test_time_off_override_removes_slot() {
    let engine = engine();
    monday_nine_available(&engine).await;
    let conflicts = engine
        .add_override(ScheduleOverride::new(
            therapist(),
            next_monday(),
            OverrideType::TimeOff,
            [nine()],
        ))
        .await
        .unwrap();
    assert!(conflicts.is_empty());

    let view = engine
        .resolve_available_slots(&therapist(), next_monday())
        .await
        .unwrap();
    assert!(view.slots.is_empty());

    // The following Monday is unaffected
    let later = engine
        .resolve_available_slots(&therapist(), next_monday() + ChronoDuration::days(7))
        .await
        .unwrap();
    assert_eq!(later.slots, BTreeSet::from([nine()]));
}

#[tokio::test]
async fn test_confirmed_booking_removes_slot() {
    let engine = engine();
    monday_nine_available(&engine).await;
    let appointment = book(&engine, "client-1").await;
    engine
        .handle_payment_signal(PaymentNotice {
            appointment_id: appointment.id,
            signal: PaymentSignal::Succeeded,
        })
        .await
        .unwrap();

    let view = engine
        .resolve_available_slots(&therapist(), next_monday())
        .await
        .unwrap();
    assert!(view.slots.is_empty());
}

#[tokio::test]
async fn test_second_pending_request_conflicts_with_first() {
    let engine = engine();
    monday_nine_available(&engine).await;
    let first = book(&engine, "client-1").await;

    let found = engine
        .check_booking_conflict(&therapist(), &nine(), next_monday(), None)
        .await
        .unwrap()
        .expect("first pending booking should conflict");
    assert_eq!(found.kind, ConflictKind::BookingConflict);
    assert_eq!(found.conflicting_appointment(), Some(&first.id));

    // Rescheduling the first booking in place is not a conflict
    let in_place = engine
        .check_booking_conflict(&therapist(), &nine(), next_monday(), Some(&first.id))
        .await
        .unwrap();
    assert!(in_place.is_none());
}

#[tokio::test]
async fn test_availability_conflict_excludes_requester() {
    let engine = engine();
    monday_nine_available(&engine).await;
    book(&engine, "client-1").await;

    let own = engine
        .check_availability_conflict(
            &therapist(),
            &nine(),
            next_monday(),
            Some(&UserId::from("client-1")),
        )
        .await
        .unwrap();
    assert!(own.is_empty());

    let other = engine
        .check_availability_conflict(
            &therapist(),
            &nine(),
            next_monday(),
            Some(&UserId::from("client-2")),
        )
        .await
        .unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].kind, ConflictKind::AvailabilityConflict);
}

#[tokio::test]
async fn test_range_and_next_available() {
    let engine = engine();
    monday_nine_available(&engine).await;

    let range = engine
        .resolve_range(&therapist(), today(), today() + ChronoDuration::days(13))
        .await
        .unwrap();
    let open_days: Vec<NaiveDate> = range
        .days
        .iter()
        .filter(|(_, slots)| !slots.is_empty())
        .map(|(date, _)| *date)
        .collect();
    assert_eq!(
        open_days,
        vec![next_monday(), next_monday() + ChronoDuration::days(7)]
    );

    book(&engine, "client-1").await;
    let next = engine
        .next_available(&therapist(), today(), 14)
        .await
        .unwrap();
    assert_eq!(next, Some((next_monday() + ChronoDuration::days(7), nine())));

    let err = engine
        .resolve_range(&therapist(), today(), today() - ChronoDuration::days(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ============================================================================
// Lifecycle scenarios
// ============================================================================

#[tokio::test]
async fn test_refund_reopens_slot_and_resolves_conflict() {
    let engine = engine();
    monday_nine_available(&engine).await;

    let resolved = Arc::new(Mutex::new(Vec::new()));
    let sink = resolved.clone();
    let _conflicts = engine
        .subscribe_conflicts(move |record| {
            if record.resolved {
                sink.lock().push(record.id);
            }
        })
        .unwrap();
    let _watch = engine
        .subscribe_appointments(therapist(), Role::Owner, |_| {})
        .unwrap();
    settle().await;

    let first = book(&engine, "client-1").await;
    engine
        .handle_payment_signal(PaymentNotice {
            appointment_id: first.id,
            signal: PaymentSignal::Succeeded,
        })
        .await
        .unwrap();

    let outcome = engine.request_booking(booking("client-2")).await.unwrap();
    let BookingOutcome::Conflict { conflict } = outcome else {
        panic!("slot should be taken");
    };

    let refunded = engine
        .handle_payment_signal(PaymentNotice {
            appointment_id: first.id,
            signal: PaymentSignal::Refunded,
        })
        .await
        .unwrap();
    assert_eq!(refunded.status, AppointmentStatus::Cancelled);
    settle().await;

    assert_eq!(*resolved.lock(), vec![conflict.id]);
    let view = engine
        .resolve_available_slots(&therapist(), next_monday())
        .await
        .unwrap();
    assert!(view.slots.contains(&nine()));
}

#[tokio::test]
async fn test_day_off_strands_pending_booking() {
    let engine = engine();
    monday_nine_available(&engine).await;
    let appointment = book(&engine, "client-1").await;

    let stranded = engine
        .add_override(
            ScheduleOverride::day_off(therapist(), next_monday()).with_reason("conference"),
        )
        .await
        .unwrap();
    assert_eq!(stranded.len(), 1);
    assert_eq!(stranded[0].kind, ConflictKind::OverrideConflict);
    assert_eq!(stranded[0].conflicting_appointment(), Some(&appointment.id));

    // Operator decides to keep the appointment
    let closed = engine.resolve_conflict(&stranded[0].id).unwrap();
    assert!(closed.resolved);
    assert!(engine.pending_conflicts().is_empty());
}

#[tokio::test]
async fn test_invalid_status_transition_is_rejected() {
    let engine = engine();
    monday_nine_available(&engine).await;
    let appointment = book(&engine, "client-1").await;

    let err = engine
        .update_appointment_status(&appointment.id, AppointmentStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    engine
        .update_appointment_status(&appointment.id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    let done = engine
        .update_appointment_status(&appointment.id, AppointmentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(done.status, AppointmentStatus::Completed);
}
