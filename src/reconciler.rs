use crate::engine::{EntryId, Timer, TimerId};
use crate::error::{EngineError, EngineResult, LedgerError};
use crate::ledger::{LedgerEntryRequest, LedgerService};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Turns a stopped timer into exactly one ledger write.
///
/// No internal retry: failures go back to the caller, who keeps the timer intact.
/// At most one write per timer is outstanding at any time.
pub struct Reconciler {
    ledger: Arc<dyn LedgerService>,
    in_flight: Mutex<HashSet<TimerId>>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn LedgerService>) -> Self {
        Self {
            ledger,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Draft + elapsed + end time → ledger request. `None` for a timer without a draft.
    pub fn build_request(timer: &Timer, ended_at: DateTime<Utc>) -> Option<LedgerEntryRequest> {
        let entry = timer.pending_entry()?;
        Some(LedgerEntryRequest {
            work_item_id: entry.work_item_id,
            started_at: entry.started_at,
            ended_at,
            elapsed_seconds: timer.elapsed_seconds(),
            description: timer.description().to_string(),
        })
    }

    pub fn is_in_flight(&self, id: &TimerId) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Reserve the single write slot for `id`; `Conflict` if already taken
    pub(crate) fn claim(&self, id: &TimerId) -> EngineResult<()> {
        let mut set = self.in_flight.lock().map_err(EngineError::poisoned)?;
        if !set.insert(id.clone()) {
            warn!("[LEDGER] Save already in progress for timer {}, rejecting", id);
            return Err(EngineError::Conflict(id.clone()));
        }
        Ok(())
    }

    pub(crate) fn release(&self, id: &TimerId) {
        match self.in_flight.lock() {
            Ok(mut set) => {
                set.remove(id);
            }
            Err(e) => error!("[LEDGER] Mutex poisoned releasing timer {}: {}", id, e),
        }
    }

    /// Issue the one write for this stop
    pub async fn reconcile(
        &self,
        timer_id: &TimerId,
        request: &LedgerEntryRequest,
    ) -> Result<EntryId, LedgerError> {
        info!(
            "[LEDGER] Saving timer {}: task {}, {}s",
            timer_id, request.work_item_id, request.elapsed_seconds
        );
        match self.ledger.create_entry(request).await {
            Ok(entry_id) => {
                info!("[LEDGER] Timer {} saved as entry {}", timer_id, entry_id);
                Ok(entry_id)
            }
            Err(e) => {
                warn!(
                    "[LEDGER] Save failed for timer {} (retryable: {}): {}",
                    timer_id,
                    e.is_retryable(),
                    e
                );
                Err(e)
            }
        }
    }
}
