//! Durable projection of the registry: written on every mutation, read once at startup.

use crate::engine::{PendingEntry, Timer, TimerId, TimerStatus, WorkItemId};
use crate::error::StoreError;
use crate::store::DurableStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed store namespace for the timer snapshot
pub const SNAPSHOT_NAMESPACE: &str = "multi_timer_state";

/// Bump when the record layout changes
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub id: TimerId,
    pub work_item_id: WorkItemId,
    pub status: TimerStatus,
    pub elapsed_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub description: String,
    pub pending_entry: PendingEntry,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    timers: Vec<TimerRecord>,
}

impl TimerRecord {
    /// Only active timers are worth persisting
    fn from_timer(timer: &Timer) -> Option<Self> {
        if !timer.status.is_active() {
            return None;
        }
        match (timer.work_item_id, timer.pending_entry.as_ref()) {
            (Some(work_item_id), Some(entry)) => Some(Self {
                id: timer.id.clone(),
                work_item_id,
                status: timer.status,
                elapsed_seconds: timer.elapsed_seconds,
                started_at: timer.started_at,
                description: timer.description.clone(),
                pending_entry: entry.clone(),
            }),
            _ => {
                warn!(
                    "[SNAPSHOT] Active timer {} has no work item or draft, not persisted",
                    timer.id
                );
                None
            }
        }
    }

    /// Rebuild a timer exactly as stored; no time is added for the closed period
    pub(crate) fn into_timer(self) -> Option<Timer> {
        if !self.status.is_active() {
            warn!(
                "[RECOVERY] Snapshot record {} has status {}, dropping",
                self.id,
                self.status.as_str()
            );
            return None;
        }
        Some(Timer {
            id: self.id,
            work_item_id: Some(self.work_item_id),
            status: self.status,
            elapsed_seconds: self.elapsed_seconds,
            started_at: self.started_at,
            description: self.description,
            pending_entry: Some(self.pending_entry),
        })
    }
}

/// Serialize the active timers followed by records read at startup but not yet
/// restored; `None` when nothing is worth keeping
pub fn encode(timers: &[Timer], pending: &[TimerRecord]) -> Result<Option<String>, StoreError> {
    let records: Vec<TimerRecord> = timers
        .iter()
        .filter_map(TimerRecord::from_timer)
        .chain(pending.iter().cloned())
        .collect();
    if records.is_empty() {
        return Ok(None);
    }
    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        timers: records,
    };
    Ok(Some(serde_json::to_string(&envelope)?))
}

pub fn decode(raw: &str) -> Result<Vec<TimerRecord>, StoreError> {
    let envelope: SnapshotEnvelope = serde_json::from_str(raw)?;
    if envelope.version != SNAPSHOT_VERSION {
        warn!(
            "[RECOVERY] Snapshot version {} differs from current {}, reading anyway",
            envelope.version, SNAPSHOT_VERSION
        );
    }
    Ok(envelope.timers)
}

/// Sole writer of the snapshot namespace
pub struct Snapshotter {
    store: Arc<dyn DurableStore>,
    namespace: String,
}

impl Snapshotter {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_namespace(store, SNAPSHOT_NAMESPACE)
    }

    pub fn with_namespace(store: Arc<dyn DurableStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
        }
    }

    /// Write the active timers plus records still awaiting restore, or delete
    /// the snapshot once there is nothing left to keep
    pub fn persist(&self, timers: &[Timer], pending: &[TimerRecord]) -> Result<(), StoreError> {
        match encode(timers, pending)? {
            Some(raw) => {
                self.store.write(&self.namespace, &raw)?;
                debug!("[SNAPSHOT] Persisted {} bytes", raw.len());
            }
            None => {
                self.store.delete(&self.namespace)?;
                debug!("[SNAPSHOT] No active timers, snapshot cleared");
            }
        }
        Ok(())
    }

    /// Raw stored value, if any
    pub fn read_raw(&self) -> Result<Option<String>, StoreError> {
        self.store.read(&self.namespace)
    }

    /// Read once at initialization. A corrupt snapshot is deleted and treated as empty.
    pub fn load(&self) -> Result<Vec<TimerRecord>, StoreError> {
        let raw = match self.store.read(&self.namespace)? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };
        match decode(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    "[RECOVERY] Snapshot is unreadable ({}), discarding it and starting fresh",
                    e
                );
                self.store.delete(&self.namespace)?;
                Ok(Vec::new())
            }
        }
    }
}
