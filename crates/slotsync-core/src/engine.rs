//! AvailabilityEngine - the entry point callers hold
//!
//! AvailabilityEngine wires the components together for one process:
//! - ConnectionManager probing the document store
//! - EventBus fanning out changes, conflicts and connection status
//! - SyncOrchestrator keeping live queries and the versioned cache
//! - ConflictDetector for advisory pre-submission checks
//!
//! # Example
//!
//! ```ignore
//! use slotsync_core::{AvailabilityEngine, EngineConfig, MemoryStore, SlotCatalog};
//!
//! let engine = AvailabilityEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     SlotCatalog::default(),
//! )?;
//! engine.start();
//!
//! let _sub = engine.subscribe_availability(owner_id.clone(), |event| {
//!     println!("availability changed: v{}", event.version);
//! })?;
//!
//! let view = engine.resolve_available_slots(&owner_id, date).await?;
//! engine.shutdown().await;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::availability::{self, validate_override, validate_weekly_day};
use crate::bus::{BusEvent, BusStats, EventBus, EventCategory};
use crate::config::EngineConfig;
use crate::conflict::{detect_override_conflicts, ConflictDetector, ConflictRecord};
use crate::connection::{
    ConnectionDiagnostics, ConnectionEvent, ConnectionManager, ConnectionProbe, ConnectionStatus,
    StoreProbe,
};
use crate::error::{EngineError, EngineResult};
use crate::listeners::Subscription;
use crate::payments::{apply_payment_signal, PaymentNotice};
use crate::sync::{
    Clock, Collection, Dataset, DocumentStore, Query, RawDocument, SubscriptionKey,
    SyncDiagnostics, SyncOrchestrator, SystemClock,
};
use crate::types::{
    Appointment, AppointmentId, AppointmentStatus, ConflictId, OverrideId, PresenceRecord, Price, Role,
    ScheduleOverride, SlotCatalog, TimeSlotId, UserId, WeeklyAvailability,
};

/// Effective slots for one owner and date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityView {
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub slots: BTreeSet<TimeSlotId>,
    /// Some input came from a cache entry flagged stale
    pub is_stale: bool,
}

/// Effective slots for every date in a range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityRange {
    pub owner_id: UserId,
    pub days: BTreeMap<NaiveDate, BTreeSet<TimeSlotId>>,
    pub is_stale: bool,
}

/// A counterparty asking for a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub owner_id: UserId,
    pub counterparty_id: UserId,
    pub time_slot_id: TimeSlotId,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

/// Result of [`AvailabilityEngine::request_booking`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingOutcome {
    /// The pending appointment was written
    Requested { appointment: Appointment },
    /// Another booking holds the slot; nothing was written
    Conflict { conflict: ConflictRecord },
}

/// Inputs to the resolver for one owner
struct ScheduleInputs {
    weekly: Vec<WeeklyAvailability>,
    overrides: Vec<ScheduleOverride>,
    appointments: Vec<Appointment>,
    is_stale: bool,
}

/// One engine instance: owns its bus, connection manager and orchestrator
pub struct AvailabilityEngine {
    config: EngineConfig,
    catalog: Arc<SlotCatalog>,
    store: Arc<dyn DocumentStore>,
    bus: Arc<EventBus>,
    orchestrator: SyncOrchestrator,
    detector: ConflictDetector,
}

impl AvailabilityEngine {
    /// Engine probing `store` for heartbeats and stamping with the system clock.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        catalog: SlotCatalog,
    ) -> EngineResult<Self> {
        let probe = Arc::new(StoreProbe::new(Arc::clone(&store)));
        Self::with_collaborators(config, store, catalog, probe, Arc::new(SystemClock))
    }

    /// Engine with an explicit heartbeat probe and clock.
    pub fn with_collaborators(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        catalog: SlotCatalog,
        probe: Arc<dyn ConnectionProbe>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        info!(slots = catalog.len(), "Initializing availability engine");

        let catalog = Arc::new(catalog);
        let connection = Arc::new(ConnectionManager::new(config.connection.clone(), probe));
        let bus = Arc::new(EventBus::new(&config.bus, connection));
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            clock,
            config.sync.clone(),
        );
        let detector = ConflictDetector::new(Arc::clone(&store), Arc::clone(&catalog));

        Ok(Self {
            config,
            catalog,
            store,
            bus,
            orchestrator,
            detector,
        })
    }

    /// Start heartbeats and the staleness sweep. Must run inside a Tokio runtime.
    pub fn start(&self) {
        info!("Starting availability engine");
        self.bus.connection().start();
        self.orchestrator.start();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SlotCatalog {
        &self.catalog
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        self.bus.connection()
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════════

    /// Load one dataset, preferring the orchestrator's cache while a live
    /// query keeps it current.
    async fn dataset(&self, key: SubscriptionKey) -> EngineResult<(Dataset, bool)> {
        if self.orchestrator.is_watching(&key) {
            if let Some(entry) = self.orchestrator.entry(&key) {
                return Ok((entry.data, entry.is_stale));
            }
        }
        let docs = self.store.fetch(&key.query()).await?;
        Ok((Dataset::from_snapshot(&key, &docs)?, false))
    }

    async fn schedule_inputs(&self, owner_id: &UserId) -> EngineResult<ScheduleInputs> {
        let (weekly, weekly_stale) = self
            .dataset(SubscriptionKey::availability(owner_id.clone()))
            .await?;
        let (overrides, overrides_stale) = self
            .dataset(SubscriptionKey::overrides(owner_id.clone()))
            .await?;
        let (appointments, appointments_stale) = self
            .dataset(SubscriptionKey::appointments(owner_id.clone(), Role::Owner))
            .await?;
        Ok(ScheduleInputs {
            weekly: weekly.availability(),
            overrides: overrides.overrides(),
            appointments: appointments.appointments(),
            is_stale: weekly_stale || overrides_stale || appointments_stale,
        })
    }

    /// Bookable slots for `owner_id` on `date`.
    ///
    /// Watched owners resolve from the cache, stale or not; others are read
    /// from the store once.
    pub async fn resolve_available_slots(
        &self,
        owner_id: &UserId,
        date: NaiveDate,
    ) -> EngineResult<AvailabilityView> {
        let inputs = self.schedule_inputs(owner_id).await?;
        let slots = availability::resolve(
            owner_id,
            date,
            &inputs.weekly,
            &inputs.overrides,
            &inputs.appointments,
        );
        debug!(%owner_id, %date, slots = slots.len(), stale = inputs.is_stale, "Resolved slots");
        Ok(AvailabilityView {
            owner_id: owner_id.clone(),
            date,
            slots,
            is_stale: inputs.is_stale,
        })
    }

    /// Bookable slots for every date in `[from, to]`.
    pub async fn resolve_range(
        &self,
        owner_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<AvailabilityRange> {
        if to < from {
            return Err(EngineError::Validation(format!(
                "range end {to} is before start {from}"
            )));
        }
        let inputs = self.schedule_inputs(owner_id).await?;
        Ok(AvailabilityRange {
            owner_id: owner_id.clone(),
            days: availability::resolve_range(
                owner_id,
                from,
                to,
                &inputs.weekly,
                &inputs.overrides,
                &inputs.appointments,
            ),
            is_stale: inputs.is_stale,
        })
    }

    /// Earliest bookable slot within `horizon_days` of `from`.
    pub async fn next_available(
        &self,
        owner_id: &UserId,
        from: NaiveDate,
        horizon_days: u32,
    ) -> EngineResult<Option<(NaiveDate, TimeSlotId)>> {
        let inputs = self.schedule_inputs(owner_id).await?;
        Ok(availability::next_available(
            owner_id,
            from,
            horizon_days,
            &self.catalog,
            &inputs.weekly,
            &inputs.overrides,
            &inputs.appointments,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ═══════════════════════════════════════════════════════════════════════

    /// Watch everything that changes an owner's effective slots: weekly
    /// rules, overrides and the owner's appointments.
    pub fn subscribe_availability<F>(&self, owner_id: UserId, on_change: F) -> EngineResult<Subscription>
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let keys = [
            SubscriptionKey::availability(owner_id.clone()),
            SubscriptionKey::overrides(owner_id.clone()),
            SubscriptionKey::appointments(owner_id, Role::Owner),
        ];
        self.subscribe_keys(&keys, Arc::new(on_change))
    }

    /// Watch the appointments where `user_id` holds `role`.
    pub fn subscribe_appointments<F>(
        &self,
        user_id: UserId,
        role: Role,
        on_change: F,
    ) -> EngineResult<Subscription>
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let key = SubscriptionKey::appointments(user_id, role);
        self.subscribe_keys(&[key], Arc::new(on_change))
    }

    /// Watch a user's presence record.
    pub fn subscribe_presence<F>(&self, user_id: UserId, on_change: F) -> EngineResult<Subscription>
    where
        F: Fn(Option<&PresenceRecord>) + Send + Sync + 'static,
    {
        let key = SubscriptionKey::presence(user_id);
        self.subscribe_keys(
            &[key],
            Arc::new(move |event: &BusEvent| on_change(event.data.presence().as_ref())),
        )
    }

    /// Register bus handlers first, then open the watches, so the initial
    /// snapshot reaches the handler.
    fn subscribe_keys(
        &self,
        keys: &[SubscriptionKey],
        handler: Arc<dyn Fn(&BusEvent) + Send + Sync>,
    ) -> EngineResult<Subscription> {
        let mut categories: Vec<EventCategory> = keys.iter().map(SubscriptionKey::category).collect();
        categories.dedup();

        let mut subscription = Subscription::empty();
        for category in categories {
            let wanted: Vec<SubscriptionKey> = keys
                .iter()
                .filter(|k| k.category() == category)
                .cloned()
                .collect();
            let handler = Arc::clone(&handler);
            subscription = subscription.join(self.bus.subscribe(category, move |event| {
                if wanted.contains(&event.key) {
                    handler(event);
                }
            })?);
        }
        for key in keys {
            subscription = subscription.join(self.orchestrator.watch(key.clone())?);
        }
        Ok(subscription)
    }

    pub fn subscribe_connection_status<F>(&self, on_change: F) -> EngineResult<Subscription>
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe_connection(on_change)
    }

    pub fn subscribe_conflicts<F>(&self, on_conflict: F) -> EngineResult<Subscription>
    where
        F: Fn(&ConflictRecord) + Send + Sync + 'static,
    {
        self.bus.subscribe_conflicts(on_conflict)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Conflict checks
    // ═══════════════════════════════════════════════════════════════════════

    /// Advisory check for a booking (or a reschedule of `exclude`).
    ///
    /// A detected conflict is also published on the conflict channel. If the
    /// same collision is already open, that record is returned.
    pub async fn check_booking_conflict(
        &self,
        owner_id: &UserId,
        slot_id: &TimeSlotId,
        date: NaiveDate,
        exclude: Option<&AppointmentId>,
    ) -> EngineResult<Option<ConflictRecord>> {
        let found = self
            .detector
            .detect_booking_conflict(owner_id, slot_id, date, exclude)
            .await?;
        Ok(found.map(|record| self.bus.publish_conflict(record)))
    }

    /// Every booking already holding the slot, except the requester's own.
    pub async fn check_availability_conflict(
        &self,
        owner_id: &UserId,
        slot_id: &TimeSlotId,
        date: NaiveDate,
        requester: Option<&UserId>,
    ) -> EngineResult<Vec<ConflictRecord>> {
        let found = self
            .detector
            .detect_availability_conflict(owner_id, slot_id, date, requester)
            .await?;
        Ok(found
            .into_iter()
            .map(|record| self.bus.publish_conflict(record))
            .collect())
    }

    /// Close a queued conflict by operator action.
    pub fn resolve_conflict(&self, id: &ConflictId) -> EngineResult<ConflictRecord> {
        self.bus.resolve_conflict(id)
    }

    pub fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        self.bus.conflicts().pending()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Schedule writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Replace the owner's rules for one weekday with `rules`.
    pub async fn set_weekly_day(
        &self,
        owner_id: &UserId,
        day_of_week: u8,
        rules: Vec<WeeklyAvailability>,
    ) -> EngineResult<()> {
        validate_weekly_day(&self.catalog, owner_id, day_of_week, &rules)?;

        let existing = self
            .store
            .fetch(&Query::AvailabilityForOwner(owner_id.clone()))
            .await?
            .iter()
            .map(RawDocument::decode::<WeeklyAvailability>)
            .collect::<EngineResult<Vec<_>>>()?;

        let keep: BTreeSet<String> = rules.iter().map(WeeklyAvailability::document_id).collect();
        for old in existing
            .iter()
            .filter(|r| r.day_of_week == day_of_week && !keep.contains(&r.document_id()))
        {
            self.store
                .delete(Collection::WeeklyAvailability, &old.document_id())
                .await?;
        }
        for rule in &rules {
            let doc = RawDocument::encode(rule.document_id(), rule)?;
            self.store.put(Collection::WeeklyAvailability, doc).await?;
        }
        info!(%owner_id, day_of_week, rules = rules.len(), "Replaced weekly availability");
        Ok(())
    }

    /// Validate and write an override. Returns the appointments it strands
    /// as `override_conflict` records, which are also published.
    pub async fn add_override(&self, candidate: ScheduleOverride) -> EngineResult<Vec<ConflictRecord>> {
        let existing = self
            .store
            .fetch(&Query::OverridesForOwner(candidate.owner_id.clone()))
            .await?
            .iter()
            .map(RawDocument::decode::<ScheduleOverride>)
            .collect::<EngineResult<Vec<_>>>()?;
        validate_override(&self.catalog, &candidate, &existing)?;

        let appointments = self
            .store
            .fetch(&Query::AppointmentsFor {
                user_id: candidate.owner_id.clone(),
                role: Role::Owner,
            })
            .await?
            .iter()
            .map(RawDocument::decode::<Appointment>)
            .collect::<EngineResult<Vec<_>>>()?;
        let conflicts = detect_override_conflicts(&candidate, &appointments);

        let doc = RawDocument::encode(candidate.id.to_string_repr(), &candidate)?;
        self.store.put(Collection::ScheduleOverrides, doc).await?;
        info!(
            owner_id = %candidate.owner_id,
            date = %candidate.date,
            kind = %candidate.override_type,
            stranded = conflicts.len(),
            "Override written"
        );

        Ok(conflicts
            .into_iter()
            .map(|record| self.bus.publish_conflict(record))
            .collect())
    }

    pub async fn remove_override(&self, id: &OverrideId) -> EngineResult<()> {
        self.store
            .delete(Collection::ScheduleOverrides, &id.to_string_repr())
            .await?;
        info!(override_id = %id, "Override removed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Appointments
    // ═══════════════════════════════════════════════════════════════════════

    async fn load_appointment(&self, id: &AppointmentId) -> EngineResult<Appointment> {
        let docs = self.store.fetch(&Query::AppointmentById(*id)).await?;
        docs.first()
            .ok_or_else(|| EngineError::NotFound(format!("appointment {id}")))?
            .decode()
    }

    async fn save_appointment(&self, appointment: &Appointment) -> EngineResult<()> {
        let doc = RawDocument::encode(appointment.id.to_string_repr(), appointment)?;
        self.store.put(Collection::Appointments, doc).await
    }

    /// Start a booking: conflict check first, then an availability check,
    /// then a `pending` write.
    pub async fn request_booking(&self, request: BookingRequest) -> EngineResult<BookingOutcome> {
        let slot = self.catalog.require(&request.time_slot_id)?.clone();

        if let Some(conflict) = self
            .check_booking_conflict(&request.owner_id, &slot.id, request.date, None)
            .await?
        {
            warn!(
                owner_id = %request.owner_id,
                slot = %slot.id,
                date = %request.date,
                "Booking request hit an existing appointment"
            );
            return Ok(BookingOutcome::Conflict { conflict });
        }

        let view = self
            .resolve_available_slots(&request.owner_id, request.date)
            .await?;
        if !view.slots.contains(&slot.id) {
            return Err(EngineError::Validation(format!(
                "{} is not offered by {} on {}",
                slot.id, request.owner_id, request.date
            )));
        }

        let mut appointment = Appointment::new(
            request.owner_id,
            request.counterparty_id,
            &slot,
            request.date,
        );
        appointment.price = request.price;
        self.save_appointment(&appointment).await?;
        info!(appointment = %appointment.id, slot = %slot.id, "Booking requested");
        Ok(BookingOutcome::Requested { appointment })
    }

    /// React to the payment collaborator.
    pub async fn handle_payment_signal(&self, notice: PaymentNotice) -> EngineResult<Appointment> {
        let mut appointment = self.load_appointment(&notice.appointment_id).await?;
        if apply_payment_signal(&mut appointment, notice.signal)? {
            self.save_appointment(&appointment).await?;
            self.close_conflicts_if_cancelled(&appointment);
        }
        Ok(appointment)
    }

    /// Move an appointment along its lifecycle.
    pub async fn update_appointment_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> EngineResult<Appointment> {
        let mut appointment = self.load_appointment(id).await?;
        let previous = appointment.status;
        appointment.transition_to(status)?;
        if previous != status {
            self.save_appointment(&appointment).await?;
            info!(appointment = %id, from = %previous, to = %status, "Appointment status changed");
            self.close_conflicts_if_cancelled(&appointment);
        }
        Ok(appointment)
    }

    /// Conflicts against a cancelled appointment resolve as soon as the
    /// cancellation is stored, whether or not its key is watched.
    fn close_conflicts_if_cancelled(&self, appointment: &Appointment) {
        if appointment.status == AppointmentStatus::Cancelled {
            self.bus.resolve_for_appointment(&appointment.id);
        }
    }

    /// Cancel an appointment. Its slot reopens and the conflicts it caused
    /// resolve.
    pub async fn cancel_appointment(&self, id: &AppointmentId) -> EngineResult<Appointment> {
        self.update_appointment_status(id, AppointmentStatus::Cancelled)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Diagnostics and lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection().status()
    }

    pub fn connection_diagnostics(&self) -> ConnectionDiagnostics {
        self.connection().diagnostics()
    }

    pub fn sync_diagnostics(&self) -> SyncDiagnostics {
        self.orchestrator.diagnostics()
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// Stop every watch, the sweep and the connection timers, and drop all
    /// registrations.
    pub async fn shutdown(&self) {
        info!("Shutting down availability engine");
        self.orchestrator.shutdown().await;
        self.bus.shutdown().await;
        info!("Availability engine shutdown complete");
    }
}
