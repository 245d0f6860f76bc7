//! Live-query synchronization through the engine
//!
//! Covers the path store -> orchestrator -> cache -> bus -> subscriber under
//! connection loss, broken streams and failing subscription setup. Tests run
//! on a paused Tokio clock so retry and sweep timers advance instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use slotsync_core::{
    AvailabilityEngine, BusEvent, ChangeAction, Collection, ConnectionEvent, ConnectionState,
    EngineConfig, KeyStatus, ManualClock, MemoryStore, ScriptedProbe, SlotCatalog,
    SubscriptionKey, TimeSlotId, UserId, WeeklyAvailability,
};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: AvailabilityEngine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn owner() -> UserId {
    UserId::from("therapist-1")
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let engine = AvailabilityEngine::with_collaborators(
        EngineConfig::default(),
        store.clone(),
        SlotCatalog::default(),
        Arc::new(ScriptedProbe::healthy(Duration::from_millis(20))),
        clock.clone(),
    )
    .unwrap();
    Harness {
        engine,
        store,
        clock,
    }
}

fn monday_rule(slot: &str) -> WeeklyAvailability {
    WeeklyAvailability::available(owner(), 1, TimeSlotId::from(slot))
}

fn recorder() -> (Arc<Mutex<Vec<BusEvent>>>, impl Fn(&BusEvent) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (events, move |event: &BusEvent| sink.lock().push(event.clone()))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pushed_changes_reach_subscriber_in_version_order() {
    let h = harness();
    let (events, handler) = recorder();
    let _sub = h.engine.subscribe_availability(owner(), handler).unwrap();
    settle().await;

    for slot in ["09:00-10:00", "10:00-11:00", "11:00-12:00"] {
        let mut rules = vec![monday_rule("09:00-10:00")];
        if slot != "09:00-10:00" {
            rules.push(monday_rule(slot));
        }
        h.engine.set_weekly_day(&owner(), 1, rules).await.unwrap();
    }
    settle().await;

    let key = SubscriptionKey::availability(owner());
    let versions: Vec<u64> = events
        .lock()
        .iter()
        .filter(|e| e.key == key)
        .map(|e| e.version)
        .collect();
    assert!(versions.len() >= 4, "snapshot plus pushes, got {versions:?}");
    assert!(versions.windows(2).all(|w| w[0] < w[1]));

    let entry = h.engine.orchestrator().entry(&key).unwrap();
    let mut slots: Vec<String> = entry
        .data
        .availability()
        .into_iter()
        .map(|r| r.time_slot_id.to_string())
        .collect();
    slots.sort();
    assert_eq!(slots, vec!["09:00-10:00", "11:00-12:00"]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_does_not_starve_others() {
    let h = harness();
    let _bad = h
        .engine
        .subscribe_availability(owner(), |_| panic!("subscriber bug"))
        .unwrap();
    let (events, handler) = recorder();
    let _good = h.engine.subscribe_availability(owner(), handler).unwrap();
    settle().await;

    h.engine
        .set_weekly_day(&owner(), 1, vec![monday_rule("09:00-10:00")])
        .await
        .unwrap();
    settle().await;

    assert!(events
        .lock()
        .iter()
        .any(|e| e.key == SubscriptionKey::availability(owner()) && e.action == ChangeAction::Created));
    assert!(h.engine.bus_stats().handler_failures > 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_watch_lives_until_last_release() {
    let h = harness();
    let key = SubscriptionKey::availability(owner());
    let first = h.engine.subscribe_availability(owner(), |_| {}).unwrap();
    let second = h.engine.subscribe_availability(owner(), |_| {}).unwrap();
    settle().await;
    assert_eq!(h.store.active_subscriptions(), 3);

    drop(first);
    settle().await;
    assert!(h.engine.orchestrator().is_watching(&key));
    assert_eq!(h.store.active_subscriptions(), 3);

    drop(second);
    settle().await;
    assert!(!h.engine.orchestrator().is_watching(&key));
    assert!(h.engine.orchestrator().entry(&key).is_none());
    assert_eq!(h.store.active_subscriptions(), 0);
}

// ============================================================================
// Staleness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cached_view_goes_stale_while_offline() {
    let h = harness();
    h.engine.start();
    h.engine
        .set_weekly_day(&owner(), 1, vec![monday_rule("09:00-10:00")])
        .await
        .unwrap();
    let _sub = h.engine.subscribe_availability(owner(), |_| {}).unwrap();
    settle().await;

    let monday = chrono::NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    let fresh = h
        .engine
        .resolve_available_slots(&owner(), monday)
        .await
        .unwrap();
    assert!(!fresh.is_stale);

    h.engine.connection().notify_network_down();
    h.clock.advance(ChronoDuration::minutes(6));
    tokio::time::sleep(Duration::from_secs(61)).await;

    let stale = h
        .engine
        .resolve_available_slots(&owner(), monday)
        .await
        .unwrap();
    assert!(stale.is_stale);
    // Stale data is still served
    assert_eq!(stale.slots, fresh.slots);
    assert_eq!(h.engine.sync_diagnostics().stale().len(), 3);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_old_data_is_not_flagged_while_online() {
    let h = harness();
    h.engine.start();
    let _sub = h.engine.subscribe_availability(owner(), |_| {}).unwrap();
    settle().await;

    h.clock.advance(ChronoDuration::minutes(30));
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert!(h.engine.sync_diagnostics().stale().is_empty());
    h.engine.shutdown().await;
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_key_recovers_when_connection_returns() {
    let h = harness();
    h.engine.start();
    let key = SubscriptionKey::availability(owner());

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let _conn = h
        .engine
        .subscribe_connection_status(move |event| {
            if let ConnectionEvent::StatusChanged { status, .. } = event {
                sink.lock().push(status.state);
            }
        })
        .unwrap();

    h.store.fail_next_subscribes(100);
    let _watch = h.engine.orchestrator().watch(key.clone()).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(matches!(
        h.engine.orchestrator().status(&key),
        Some(KeyStatus::Failed { .. })
    ));
    // One initial attempt plus three retries
    assert_eq!(h.store.subscribe_calls(), 4);

    h.store.fail_next_subscribes(0);
    h.engine.connection().notify_network_down();
    settle().await;
    h.engine.connection().notify_network_up();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.engine.orchestrator().status(&key), Some(KeyStatus::Live));
    assert_eq!(h.store.subscribe_calls(), 5);
    let seen = states.lock().clone();
    assert!(seen.contains(&ConnectionState::Offline));
    assert_eq!(seen.last(), Some(&ConnectionState::Online));

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_broken_stream_resubscribes_and_catches_up() {
    let h = harness();
    let key = SubscriptionKey::availability(owner());
    let _watch = h.engine.orchestrator().watch(key.clone()).unwrap();
    settle().await;
    assert_eq!(h.store.subscribe_calls(), 1);

    h.store
        .break_streams(Collection::WeeklyAvailability, "connection reset");
    h.engine
        .set_weekly_day(&owner(), 1, vec![monday_rule("09:00-10:00")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.store.subscribe_calls(), 2);
    assert_eq!(h.engine.orchestrator().status(&key), Some(KeyStatus::Live));
    let entry = h.engine.orchestrator().entry(&key).unwrap();
    assert_eq!(entry.data.availability().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_revives_failed_key_without_reconnect() {
    let h = harness();
    let key = SubscriptionKey::availability(owner());
    h.store.fail_next_subscribes(100);
    let _watch = h.engine.orchestrator().watch(key.clone()).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(matches!(
        h.engine.orchestrator().status(&key),
        Some(KeyStatus::Failed { .. })
    ));

    h.store.fail_next_subscribes(0);
    h.engine
        .set_weekly_day(&owner(), 1, vec![monday_rule("09:00-10:00")])
        .await
        .unwrap();
    h.engine.orchestrator().refresh(&key).await.unwrap();
    settle().await;

    assert_eq!(h.engine.orchestrator().status(&key), Some(KeyStatus::Live));
    let entry = h.engine.orchestrator().entry(&key).unwrap();
    assert!(!entry.is_stale);
    assert_eq!(entry.data.availability().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_of_live_key_keeps_recovery_wait() {
    let h = harness();
    h.engine.start();
    let key = SubscriptionKey::availability(owner());
    let _watch = h.engine.orchestrator().watch(key.clone()).unwrap();
    settle().await;

    h.engine.orchestrator().refresh(&key).await.unwrap();
    settle().await;
    assert_eq!(h.store.subscribe_calls(), 2);
    assert_eq!(h.engine.orchestrator().status(&key), Some(KeyStatus::Live));

    h.store.fail_next_subscribes(100);
    h.store
        .break_streams(Collection::WeeklyAvailability, "connection reset");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(matches!(
        h.engine.orchestrator().status(&key),
        Some(KeyStatus::Failed { .. })
    ));
    // Three retries after the break
    assert_eq!(h.store.subscribe_calls(), 5);

    // The earlier refresh must not wake the failed key
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.store.subscribe_calls(), 5);

    h.store.fail_next_subscribes(0);
    h.engine.connection().notify_network_down();
    settle().await;
    h.engine.connection().notify_network_up();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.engine.orchestrator().status(&key), Some(KeyStatus::Live));
    assert_eq!(h.store.subscribe_calls(), 6);

    h.engine.shutdown().await;
}
