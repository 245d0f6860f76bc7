//! Resolution queue for detected conflicts

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{ConflictRecord, Resolution};
use crate::error::{EngineError, EngineResult};
use crate::types::{AppointmentId, ConflictId};

/// Resolved records kept for inspection when no limit is configured
pub const DEFAULT_RESOLVED_RETENTION: usize = 128;

/// Conflict records awaiting resolution, in arrival order
///
/// At most one open record exists per collision; resolved records are kept
/// up to a retention limit, oldest dropped first.
#[derive(Debug)]
pub struct ConflictQueue {
    records: RwLock<Vec<ConflictRecord>>,
    resolved_retention: usize,
}

impl Default for ConflictQueue {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RESOLVED_RETENTION)
    }
}

impl ConflictQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(resolved_retention: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            resolved_retention,
        }
    }

    /// Queue `record` unless an open record already describes the same
    /// collision. Returns that existing record when one does.
    pub fn push(&self, record: ConflictRecord) -> Option<ConflictRecord> {
        let mut records = self.records.write();
        if let Some(existing) = records
            .iter()
            .find(|r| !r.resolved && r.same_collision(&record))
        {
            debug!(conflict = %existing.id, "Collision already queued");
            return Some(existing.clone());
        }
        records.push(record);
        None
    }

    /// Unresolved records
    pub fn pending(&self) -> Vec<ConflictRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| !r.resolved)
            .cloned()
            .collect()
    }

    /// Every record, resolved or not
    pub fn all(&self) -> Vec<ConflictRecord> {
        self.records.read().clone()
    }

    pub fn get(&self, id: &ConflictId) -> Option<ConflictRecord> {
        self.records.read().iter().find(|r| &r.id == id).cloned()
    }

    /// Mark a record resolved by explicit operator action.
    ///
    /// Resolving an already resolved record is a no-op.
    pub fn resolve(&self, id: &ConflictId) -> EngineResult<ConflictRecord> {
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("conflict {id}")))?;
        if record.resolved {
            return Ok(record.clone());
        }
        record.mark_resolved(Resolution::Manual);
        let resolved = record.clone();
        info!(conflict = %id, "Conflict resolved manually");
        prune_resolved(&mut records, self.resolved_retention);
        Ok(resolved)
    }

    /// Resolve every open record whose conflicting appointment is
    /// `appointment_id`. Returns the records that changed.
    pub fn resolve_for_appointment(&self, appointment_id: &AppointmentId) -> Vec<ConflictRecord> {
        let mut records = self.records.write();
        let mut resolved = Vec::new();
        for record in records.iter_mut() {
            if !record.resolved && record.conflicting_appointment() == Some(appointment_id) {
                record.mark_resolved(Resolution::ConflictingCancelled);
                resolved.push(record.clone());
            }
        }
        if !resolved.is_empty() {
            info!(
                appointment = %appointment_id,
                count = resolved.len(),
                "Conflicts auto-resolved after cancellation"
            );
            prune_resolved(&mut records, self.resolved_retention);
        }
        resolved
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

/// Drop the oldest resolved records beyond `retention`.
fn prune_resolved(records: &mut Vec<ConflictRecord>, retention: usize) {
    let resolved = records.iter().filter(|r| r.resolved).count();
    let mut excess = resolved.saturating_sub(retention);
    if excess == 0 {
        return;
    }
    records.retain(|r| {
        if excess > 0 && r.resolved {
            excess -= 1;
            false
        } else {
            true
        }
    });
}
