//! Benchmarks for availability resolution and cache ingestion
//!
//! Run with: cargo bench -p slotsync-core
//!
//! These benchmarks establish performance baselines for:
//! - Single-date resolution against growing booking sets
//! - Range resolution and next-available search
//! - Booking conflict scans
//! - Applying pushed change batches to a cached dataset

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use slotsync_core::availability::{next_available, resolve, resolve_range};
use slotsync_core::conflict::find_booking_conflicts;
use slotsync_core::{
    Appointment, AppointmentStatus, Dataset, DocumentChange, OverrideType, RawDocument,
    ScheduleOverride, SlotCatalog, SubscriptionKey, UserId, WeeklyAvailability,
};

// ============================================================================
// Fixtures
// ============================================================================

fn owner() -> UserId {
    UserId::from("therapist-1")
}

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

/// Every catalog slot open on every weekday
fn full_week(catalog: &SlotCatalog) -> Vec<WeeklyAvailability> {
    (1u8..=5)
        .flat_map(|day| {
            catalog
                .slots()
                .iter()
                .map(move |slot| WeeklyAvailability::available(owner(), day, slot.id.clone()))
        })
        .collect()
}

/// `count` bookings spread over the first weeks from `start()`
fn bookings(catalog: &SlotCatalog, count: usize) -> Vec<Appointment> {
    let slots = catalog.slots();
    (0..count)
        .map(|i| {
            let date = start() + Duration::days((i / slots.len()) as i64);
            let status = if i % 4 == 0 {
                AppointmentStatus::Cancelled
            } else {
                AppointmentStatus::Confirmed
            };
            Appointment::new(
                owner(),
                UserId::new(format!("client-{i}")),
                &slots[i % slots.len()],
                date,
            )
            .with_status(status)
        })
        .collect()
}

fn overrides(catalog: &SlotCatalog) -> Vec<ScheduleOverride> {
    vec![
        ScheduleOverride::new(
            owner(),
            start() + Duration::days(2),
            OverrideType::TimeOff,
            catalog.slots().iter().take(3).map(|s| s.id.clone()),
        ),
        ScheduleOverride::day_off(owner(), start() + Duration::days(9)),
        ScheduleOverride::new(
            owner(),
            start() + Duration::days(14),
            OverrideType::CustomHours,
            catalog.slots().iter().skip(4).take(2).map(|s| s.id.clone()),
        )
        .recurring_until(start() + Duration::days(20)),
    ]
}

// ============================================================================
// Resolution Benchmarks
// ============================================================================

fn bench_resolve_date(c: &mut Criterion) {
    let catalog = SlotCatalog::default();
    let weekly = full_week(&catalog);
    let overrides = overrides(&catalog);
    let mut group = c.benchmark_group("resolve_date");

    for count in [0usize, 100, 1000] {
        let booked = bookings(&catalog, count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &booked, |b, booked| {
            b.iter(|| {
                black_box(resolve(
                    &owner(),
                    start(),
                    &weekly,
                    &overrides,
                    booked,
                ))
            })
        });
    }

    group.finish();
}

fn bench_resolve_range(c: &mut Criterion) {
    let catalog = SlotCatalog::default();
    let weekly = full_week(&catalog);
    let overrides = overrides(&catalog);
    let booked = bookings(&catalog, 200);
    let mut group = c.benchmark_group("resolve_range");

    for days in [7i64, 30, 90] {
        group.throughput(Throughput::Elements(days as u64));
        group.bench_with_input(BenchmarkId::from_parameter(days), &days, |b, &days| {
            b.iter(|| {
                black_box(resolve_range(
                    &owner(),
                    start(),
                    start() + Duration::days(days - 1),
                    &weekly,
                    &overrides,
                    &booked,
                ))
            })
        });
    }

    group.finish();
}

fn bench_next_available(c: &mut Criterion) {
    let catalog = SlotCatalog::default();
    let weekly = full_week(&catalog);
    let overrides = overrides(&catalog);
    // Fully booked for the first ten days
    let booked: Vec<Appointment> = bookings(&catalog, catalog.len() * 10)
        .into_iter()
        .map(|a| a.with_status(AppointmentStatus::Confirmed))
        .collect();

    c.bench_function("next_available_after_ten_booked_days", |b| {
        b.iter(|| {
            black_box(next_available(
                &owner(),
                start(),
                60,
                &catalog,
                &weekly,
                &overrides,
                &booked,
            ))
        })
    });
}

// ============================================================================
// Conflict Benchmarks
// ============================================================================

fn bench_booking_conflicts(c: &mut Criterion) {
    let catalog = SlotCatalog::default();
    let proposed = catalog.slots()[3].clone();
    let mut group = c.benchmark_group("find_booking_conflicts");

    for count in [10usize, 100, 1000] {
        let existing = bookings(&catalog, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &existing, |b, existing| {
            b.iter(|| {
                black_box(find_booking_conflicts(
                    existing,
                    &owner(),
                    &proposed,
                    start(),
                    None,
                ))
            })
        });
    }

    group.finish();
}

// ============================================================================
// Ingestion Benchmarks
// ============================================================================

fn bench_dataset_apply(c: &mut Criterion) {
    let catalog = SlotCatalog::default();
    let key = SubscriptionKey::appointments(owner(), slotsync_core::Role::Owner);
    let mut group = c.benchmark_group("dataset_apply");

    for size in [10usize, 100, 1000] {
        let snapshot: Vec<RawDocument> = bookings(&catalog, size)
            .iter()
            .map(|a| RawDocument::encode(a.id.to_string_repr(), a).unwrap())
            .collect();
        let incoming = bookings(&catalog, 1).remove(0);
        let change = DocumentChange::Added(
            RawDocument::encode(incoming.id.to_string_repr(), &incoming).unwrap(),
        );

        group.bench_with_input(BenchmarkId::new("added_to", size), &snapshot, |b, snapshot| {
            b.iter_batched(
                || Dataset::from_snapshot(&key, snapshot).unwrap(),
                |mut data| black_box(data.apply(&change).unwrap()),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(
    resolution_benches,
    bench_resolve_date,
    bench_resolve_range,
    bench_next_available,
);

criterion_group!(conflict_benches, bench_booking_conflicts,);

criterion_group!(ingestion_benches, bench_dataset_apply,);

criterion_main!(resolution_benches, conflict_benches, ingestion_benches);
