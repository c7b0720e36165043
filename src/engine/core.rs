use crate::engine::{PendingEntry, Timer, TimerStatus, WorkItemId};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

impl Timer {
    /// Idle only: bind the timer to a work item. Status unchanged.
    pub(crate) fn select(&mut self, work_item_id: WorkItemId) -> EngineResult<()> {
        match self.status {
            TimerStatus::Idle => {
                self.work_item_id = Some(work_item_id);
                Ok(())
            }
            TimerStatus::Running | TimerStatus::Paused => {
                warn!(
                    "[FSM] Invalid select on {} timer {} (work item is fixed until Idle)",
                    self.status.as_str(),
                    self.id
                );
                Err(EngineError::precondition(
                    "work item can only be changed while the timer is idle",
                ))
            }
        }
    }

    /// Free-text annotation. Allowed in any state; the draft follows along.
    pub(crate) fn describe(&mut self, description: String) {
        if let Some(entry) = self.pending_entry.as_mut() {
            entry.description = description.clone();
        }
        self.description = description;
    }

    /// Transition: Idle → Running
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        match self.status {
            TimerStatus::Idle => {
                let work_item_id = self.work_item_id.ok_or_else(|| {
                    warn!("[FSM] Start rejected for timer {}: no work item selected", self.id);
                    EngineError::precondition("no work item selected")
                })?;

                self.status = TimerStatus::Running;
                self.elapsed_seconds = 0;
                self.started_at = Some(now);
                self.pending_entry = Some(PendingEntry {
                    work_item_id,
                    started_at: now,
                    description: self.description.clone(),
                });
                Ok(())
            }
            TimerStatus::Running => {
                warn!("[FSM] Invalid transition: Running → Running (timer {})", self.id);
                Err(EngineError::precondition("timer is already running"))
            }
            TimerStatus::Paused => {
                warn!(
                    "[FSM] Invalid transition: Paused → Running via start (timer {}), use resume",
                    self.id
                );
                Err(EngineError::precondition(
                    "timer is paused, resume it instead of starting",
                ))
            }
        }
    }

    /// One clock tick. Running only.
    #[cfg(test)]
    pub(crate) fn tick(&mut self) -> EngineResult<()> {
        self.advance(1)
    }

    /// Coalesced jump of `seconds` ticks, applied at once after a burst
    pub(crate) fn advance(&mut self, seconds: u64) -> EngineResult<()> {
        if self.status != TimerStatus::Running {
            warn!(
                "[FSM] Tick delivered to {} timer {}",
                self.status.as_str(),
                self.id
            );
            return Err(EngineError::precondition("only running timers tick"));
        }
        let before = self.elapsed_seconds;
        self.elapsed_seconds = before.saturating_add(seconds);
        if before.checked_add(seconds).is_none() {
            warn!(
                "[TIMER] Elapsed seconds overflow prevented for timer {}: {} + {} saturated",
                self.id, before, seconds
            );
        }
        Ok(())
    }

    /// Transition: Running → Paused. Elapsed is frozen.
    pub(crate) fn pause(&mut self) -> EngineResult<()> {
        match self.status {
            TimerStatus::Running => {
                self.status = TimerStatus::Paused;
                if let Some(entry) = self.pending_entry.as_mut() {
                    entry.description = self.description.clone();
                }
                Ok(())
            }
            TimerStatus::Paused => {
                warn!("[FSM] Invalid transition: Paused → Paused (timer {})", self.id);
                Err(EngineError::precondition("timer is already paused"))
            }
            TimerStatus::Idle => {
                warn!("[FSM] Invalid transition: Idle → Paused (timer {})", self.id);
                Err(EngineError::precondition("cannot pause an idle timer"))
            }
        }
    }

    /// Transition: Paused → Running. Elapsed is kept.
    pub(crate) fn resume(&mut self) -> EngineResult<()> {
        match self.status {
            TimerStatus::Paused => {
                self.status = TimerStatus::Running;
                Ok(())
            }
            TimerStatus::Running => {
                warn!("[FSM] Invalid transition: Running → Running via resume (timer {})", self.id);
                Err(EngineError::precondition("timer is already running"))
            }
            TimerStatus::Idle => {
                warn!("[FSM] Invalid transition: Idle → Running via resume (timer {})", self.id);
                Err(EngineError::precondition(
                    "cannot resume an idle timer, use start instead",
                ))
            }
        }
    }

    /// Check that a stop is legal without changing anything
    pub(crate) fn ensure_stoppable(&self) -> EngineResult<()> {
        if self.status.is_active() {
            Ok(())
        } else {
            warn!("[FSM] Invalid transition: Idle → Idle via stop (timer {})", self.id);
            Err(EngineError::precondition("timer is not running or paused"))
        }
    }

    /// Explicit discard: any non-Idle state → Idle. Returns the elapsed time dropped.
    pub(crate) fn reset(&mut self) -> EngineResult<u64> {
        self.ensure_stoppable()?;
        let dropped = self.elapsed_seconds;
        self.clear();
        debug!("[TIMER] Timer {} reset, {}s discarded", self.id, dropped);
        Ok(dropped)
    }

    /// Back to Idle after a confirmed save or a discard.
    /// Work item and description stay selected for the next entry.
    pub(crate) fn clear(&mut self) {
        self.status = TimerStatus::Idle;
        self.elapsed_seconds = 0;
        self.started_at = None;
        self.pending_entry = None;
    }
}
