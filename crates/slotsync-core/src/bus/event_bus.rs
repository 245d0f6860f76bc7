//! The event bus service

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::events::{BusEvent, BusMessage, EventCategory};
use crate::config::BusConfig;
use crate::conflict::{ConflictQueue, ConflictRecord};
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::error::{EngineError, EngineResult};
use crate::listeners::{Listeners, Subscription};
use crate::sync::dataset::Dataset;
use crate::types::{AppointmentId, AppointmentStatus, ConflictId};

/// Publish counters, mainly for tests and diagnostics
#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
    conflicts: AtomicU64,
}

/// Snapshot of the bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_failures: u64,
    pub conflicts: u64,
}

/// Typed publish/subscribe hub
///
/// One instance per engine. Category handlers run synchronously inside
/// `publish`; the same events are mirrored to an async broadcast stream for
/// consumers that prefer `recv().await`.
pub struct EventBus {
    categories: HashMap<EventCategory, Listeners<BusEvent>>,
    conflict_listeners: Listeners<ConflictRecord>,
    queue: ConflictQueue,
    connection: Arc<ConnectionManager>,
    stream_tx: broadcast::Sender<BusMessage>,
    counters: Counters,
    shut_down: AtomicBool,
}

impl EventBus {
    pub fn new(config: &BusConfig, connection: Arc<ConnectionManager>) -> Self {
        let (stream_tx, _) = broadcast::channel(config.stream_capacity.max(1));
        let categories = EventCategory::ALL
            .into_iter()
            .map(|c| (c, Listeners::new(category_channel(c))))
            .collect();
        Self {
            categories,
            conflict_listeners: Listeners::new("conflict"),
            queue: ConflictQueue::with_retention(config.resolved_conflict_retention),
            connection,
            stream_tx,
            counters: Counters::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }

    fn listeners(&self, category: EventCategory) -> Option<&Listeners<BusEvent>> {
        self.categories.get(&category)
    }

    /// Register a handler for one category.
    pub fn subscribe<F>(&self, category: EventCategory, handler: F) -> EngineResult<Subscription>
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        Ok(self
            .listeners(category)
            .map(|l| l.subscribe(handler))
            .unwrap_or_else(Subscription::empty))
    }

    /// Fan an event out to its category's handlers.
    ///
    /// Publishing a cancelled appointment auto-resolves the conflicts it
    /// caused. Returns the number of handlers that ran without panicking.
    pub fn publish(&self, event: BusEvent) -> usize {
        if self.shut_down.load(Ordering::SeqCst) {
            debug!(key = %event.key, "Dropping event published after shutdown");
            return 0;
        }
        let category = event.category();
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let (registered, delivered) = match self.listeners(category) {
            Some(listeners) => (listeners.len(), listeners.emit(&event)),
            None => (0, 0),
        };
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .handler_failures
            .fetch_add(registered.saturating_sub(delivered) as u64, Ordering::Relaxed);
        debug!(
            %category,
            key = %event.key,
            action = %event.action,
            version = event.version,
            delivered,
            "Published bus event"
        );

        if let Dataset::Appointments(records) = &event.data {
            for appt in records
                .values()
                .filter(|a| a.status == AppointmentStatus::Cancelled)
            {
                self.resolve_for_appointment(&appt.id);
            }
        }

        let _ = self.stream_tx.send(BusMessage::Change(event));
        delivered
    }

    /// Register a handler on the conflict channel.
    pub fn subscribe_conflicts<F>(&self, handler: F) -> EngineResult<Subscription>
    where
        F: Fn(&ConflictRecord) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        Ok(self.conflict_listeners.subscribe(handler))
    }

    /// Queue a conflict and notify conflict listeners.
    ///
    /// A collision that is already open is not queued or announced again;
    /// the open record is returned instead of `record`.
    pub fn publish_conflict(&self, record: ConflictRecord) -> ConflictRecord {
        if self.shut_down.load(Ordering::SeqCst) {
            return record;
        }
        if let Some(existing) = self.queue.push(record.clone()) {
            return existing;
        }
        info!(
            conflict = %record.id,
            kind = ?record.kind,
            "Conflict published"
        );
        self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
        self.conflict_listeners.emit(&record);
        let _ = self.stream_tx.send(BusMessage::Conflict(record.clone()));
        record
    }

    /// Resolve the open conflicts caused by a now cancelled appointment and
    /// notify listeners of each one.
    pub fn resolve_for_appointment(&self, appointment_id: &AppointmentId) -> Vec<ConflictRecord> {
        let resolved = self.queue.resolve_for_appointment(appointment_id);
        for record in &resolved {
            self.conflict_listeners.emit(record);
            let _ = self.stream_tx.send(BusMessage::Conflict(record.clone()));
        }
        resolved
    }

    /// Resolve a queued conflict by operator action and notify listeners.
    pub fn resolve_conflict(&self, id: &ConflictId) -> EngineResult<ConflictRecord> {
        let record = self.queue.resolve(id)?;
        self.conflict_listeners.emit(&record);
        let _ = self.stream_tx.send(BusMessage::Conflict(record.clone()));
        Ok(record)
    }

    pub fn conflicts(&self) -> &ConflictQueue {
        &self.queue
    }

    /// Register a handler on the connection channel.
    pub fn subscribe_connection<F>(&self, handler: F) -> EngineResult<Subscription>
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        Ok(self.connection.subscribe(handler))
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Async mirror of every change and conflict
    pub fn stream(&self) -> broadcast::Receiver<BusMessage> {
        self.stream_tx.subscribe()
    }

    /// Registered handlers across categories and the conflict channel
    pub fn listener_count(&self) -> usize {
        self.categories.values().map(Listeners::len).sum::<usize>() + self.conflict_listeners.len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
        }
    }

    /// Drop every registration and cancel the connection timers.
    ///
    /// Further subscribe calls fail with [`EngineError::ShutDown`] and
    /// publishes are ignored.
    pub fn cleanup(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(listeners = self.listener_count(), "Cleaning up event bus");
        for listeners in self.categories.values() {
            listeners.clear();
        }
        self.conflict_listeners.clear();
        self.connection.stop();
    }

    /// `cleanup` plus waiting for the connection driver to exit
    pub async fn shutdown(&self) {
        self.cleanup();
        self.connection.shutdown().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

fn category_channel(category: EventCategory) -> &'static str {
    match category {
        EventCategory::Availability => "availability",
        EventCategory::Appointment => "appointment",
        EventCategory::Override => "override",
        EventCategory::Presence => "presence",
    }
}
