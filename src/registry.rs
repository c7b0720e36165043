use crate::activity::ActivitySignal;
use crate::clock::{Clock, TickSource};
use crate::directory::WorkItemDirectory;
use crate::engine::snapshot::{Snapshotter, TimerRecord};
use crate::engine::{Operation, StopOutcome, Timer, TimerId, TimerStatus};
use crate::error::{EngineError, EngineResult};
use crate::ledger::LedgerService;
use crate::reconciler::Reconciler;
use crate::store::DurableStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

struct RegistryInner {
    /// Creation order
    timers: Vec<Timer>,
    ticks: TickSource,
    /// Every id handed out this session, so none is ever reused
    issued: HashSet<TimerId>,
    /// Snapshot records read at construction and not yet restored. Written
    /// back with every snapshot so early mutations cannot drop them.
    pending: Vec<TimerRecord>,
    /// Bumped per mutation; orders activity publishes made outside the lock
    publish_seq: u64,
}

impl RegistryInner {
    fn position(&self, id: &TimerId) -> Option<usize> {
        self.timers.iter().position(|t| &t.id == id)
    }
}

/// What `restore` did with the persisted snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Dropped because their work item no longer exists
    pub pruned: usize,
    /// Kept although the directory could not be reached to confirm them
    pub unverified: usize,
}

/// Owns all timers and is the sole mutation entry point.
///
/// Every successful mutation writes one snapshot and evaluates the activity
/// signal before returning. The snapshot is read once in `new`; records not
/// yet restored are written back with every snapshot until `restore` runs. All transitions are applied under one lock; the only
/// suspension point is the ledger write inside `stop(.., true)`.
pub struct TimerRegistry {
    inner: Mutex<RegistryInner>,
    clock: Arc<dyn Clock>,
    snapshotter: Snapshotter,
    activity: Arc<ActivitySignal>,
    reconciler: Reconciler,
    restored: AtomicBool,
}

impl TimerRegistry {
    pub fn new(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn LedgerService>,
        max_catch_up_secs: u64,
    ) -> Self {
        let snapshotter = Snapshotter::new(store);
        let pending = match snapshotter.load() {
            Ok(records) => records,
            Err(e) => {
                error!(
                    "[RECOVERY] Failed to read snapshot: {}. Starting with no timers.",
                    e
                );
                Vec::new()
            }
        };
        let issued = pending.iter().map(|r| r.id.clone()).collect();
        Self {
            inner: Mutex::new(RegistryInner {
                timers: Vec::new(),
                ticks: TickSource::new(max_catch_up_secs),
                issued,
                pending,
                publish_seq: 0,
            }),
            clock,
            snapshotter,
            activity: Arc::new(ActivitySignal::new()),
            reconciler: Reconciler::new(ledger),
            restored: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, RegistryInner>> {
        self.inner.lock().map_err(EngineError::poisoned)
    }

    fn not_found(id: &TimerId) -> EngineError {
        warn!("[REGISTRY] Unknown timer id {} (registry is the only mutation path)", id);
        EngineError::NotFound(id.clone())
    }

    /// Snapshot + activity evaluation, once per successful mutation.
    /// Store failures are logged; the in-memory transition stands.
    fn after_mutation(&self, mut inner: MutexGuard<'_, RegistryInner>) {
        if let Err(e) = self.snapshotter.persist(&inner.timers, &inner.pending) {
            error!("[SNAPSHOT] Failed to persist timer state: {}", e);
        }
        let active = inner.timers.iter().any(Timer::is_active);
        inner.publish_seq += 1;
        let seq = inner.publish_seq;
        drop(inner);
        // Subscribers may read the registry; the sequence drops overtaken values
        self.activity.publish(seq, active);
    }

    /// Keep tick delivery in line with the timer's status
    fn sync_subscription(inner: &mut RegistryInner, pos: usize, now: std::time::Instant) {
        let id = inner.timers[pos].id.clone();
        match inner.timers[pos].status {
            TimerStatus::Running => {
                if !inner.ticks.is_subscribed(&id) {
                    inner.ticks.subscribe(id, now);
                }
            }
            TimerStatus::Paused | TimerStatus::Idle => {
                inner.ticks.unsubscribe(&id);
            }
        }
    }

    pub fn activity(&self) -> &Arc<ActivitySignal> {
        &self.activity
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn any_timer_active(&self) -> bool {
        self.activity.current()
    }

    /// Add an Idle timer and return its new identity
    pub fn create_timer(&self) -> EngineResult<TimerId> {
        let mut inner = self.lock()?;
        let id = loop {
            let candidate = TimerId::generate();
            if !inner.issued.contains(&candidate) {
                break candidate;
            }
        };
        inner.issued.insert(id.clone());
        inner.timers.push(Timer::new(id.clone()));
        info!("[REGISTRY] Timer {} created ({} total)", id, inner.timers.len());
        self.after_mutation(inner);
        Ok(id)
    }

    /// Remove a timer in any state. Active timers are discarded without save.
    /// A ledger write already in flight is left to finish; its result is dropped.
    pub fn remove_timer(&self, id: &TimerId) -> EngineResult<()> {
        let mut inner = self.lock()?;
        let pos = inner.position(id).ok_or_else(|| Self::not_found(id))?;
        let timer = inner.timers.remove(pos);

        let had_subscription = inner.ticks.unsubscribe(id);
        if timer.status == TimerStatus::Running && !had_subscription {
            error!(
                "[CLOCK] Running timer {} had no tick subscription at removal",
                id
            );
        }
        if inner.ticks.is_subscribed(id) {
            error!("[CLOCK] Tick subscription leak: timer {} still subscribed after removal", id);
        }

        if timer.is_active() {
            info!(
                "[REGISTRY] Timer {} removed while {}, {}s discarded without save",
                id,
                timer.status.as_str(),
                timer.elapsed_seconds
            );
        } else {
            info!("[REGISTRY] Timer {} removed", id);
        }
        if self.reconciler.is_in_flight(id) {
            info!(
                "[REGISTRY] Timer {} has a save in flight; its result will be discarded",
                id
            );
        }
        self.after_mutation(inner);
        Ok(())
    }

    pub fn get(&self, id: &TimerId) -> EngineResult<Timer> {
        let inner = self.lock()?;
        inner
            .timers
            .iter()
            .find(|t| &t.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    /// All timers in creation order
    pub fn list(&self) -> EngineResult<Vec<Timer>> {
        Ok(self.lock()?.timers.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.timers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of timers currently receiving ticks
    pub fn tick_subscriptions(&self) -> usize {
        self.lock().map(|inner| inner.ticks.len()).unwrap_or(0)
    }

    /// Apply one transition to the identified timer
    pub fn mutate(&self, id: &TimerId, operation: Operation) -> EngineResult<Timer> {
        self.apply(id, operation).map(|(timer, _)| timer)
    }

    /// `mutate`, also returning the seconds a reset dropped
    fn apply(&self, id: &TimerId, operation: Operation) -> EngineResult<(Timer, u64)> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let pos = inner.position(id).ok_or_else(|| Self::not_found(id))?;
        if self.reconciler.is_in_flight(id) {
            warn!(
                "[REGISTRY] {} rejected for timer {}: save in progress",
                operation.name(),
                id
            );
            return Err(EngineError::Conflict(id.clone()));
        }

        let op_name = operation.name();
        let mut dropped = 0;
        {
            let timer = &mut inner.timers[pos];
            match operation {
                Operation::Select(work_item_id) => timer.select(work_item_id)?,
                Operation::Describe(text) => timer.describe(text),
                Operation::Start => timer.start(self.clock.wall())?,
                Operation::Pause => timer.pause()?,
                Operation::Resume => timer.resume()?,
                Operation::Reset => dropped = timer.reset()?,
            }
        }
        Self::sync_subscription(inner, pos, self.clock.now());

        let updated = inner.timers[pos].clone();
        debug!(
            "[TIMER] {} applied to timer {} → {} ({}s)",
            op_name,
            id,
            updated.status.as_str(),
            updated.elapsed_seconds
        );
        self.after_mutation(guard);
        Ok((updated, dropped))
    }

    /// Stop a Running or Paused timer.
    ///
    /// `save = false` discards unconditionally. `save = true` freezes the timer
    /// as Paused, hands the draft to the reconciler, and clears it only once the
    /// ledger confirms. On failure the timer stays Paused with elapsed time and
    /// draft intact and the ledger error is returned.
    pub async fn stop(&self, id: &TimerId, save: bool) -> EngineResult<StopOutcome> {
        if !save {
            let (_, elapsed_seconds) = self.apply(id, Operation::Reset)?;
            return Ok(StopOutcome::Discarded { elapsed_seconds });
        }

        let (request, claim) = {
            let mut guard = self.lock()?;
            let inner = &mut *guard;
            let pos = inner.position(id).ok_or_else(|| Self::not_found(id))?;
            inner.timers[pos].ensure_stoppable()?;
            self.reconciler.claim(id)?;
            let claim = scopeguard::guard(id.clone(), |id| self.reconciler.release(&id));

            let timer = &mut inner.timers[pos];
            if timer.status == TimerStatus::Running {
                timer.pause()?;
            }
            let request = Reconciler::build_request(timer, self.clock.wall()).ok_or_else(|| {
                error!("[LEDGER] Timer {} is {} without a draft entry", id, timer.status.as_str());
                EngineError::precondition("timer has no pending entry")
            })?;
            Self::sync_subscription(inner, pos, self.clock.now());
            self.after_mutation(guard);
            (request, claim)
        };

        let result = self.reconciler.reconcile(id, &request).await;

        let mut inner = self.lock()?;
        let pos = match inner.position(id) {
            Some(pos) => pos,
            None => {
                info!(
                    "[LEDGER] Timer {} was removed during save; result discarded ({:?})",
                    id, result
                );
                drop(claim);
                return Ok(StopOutcome::Detached {
                    entry_id: result.ok(),
                });
            }
        };

        match result {
            Ok(entry_id) => {
                let timer = &mut inner.timers[pos];
                let elapsed_seconds = timer.elapsed_seconds;
                timer.clear();
                drop(claim);
                self.after_mutation(inner);
                Ok(StopOutcome::Saved {
                    entry_id,
                    elapsed_seconds,
                })
            }
            Err(e) => {
                // Nothing cleared: the user can retry the save or discard explicitly
                drop(claim);
                drop(inner);
                Err(EngineError::Ledger(e))
            }
        }
    }

    /// `stop(save = false)` from any non-Idle state
    pub fn reset(&self, id: &TimerId) -> EngineResult<Timer> {
        self.mutate(id, Operation::Reset)
    }

    /// Deliver due ticks to every running timer. Returns the ticks delivered.
    pub fn pump_clock(&self) -> EngineResult<u64> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.ticks.is_empty() {
            return Ok(0);
        }
        let due = inner.ticks.poll(self.clock.now());
        if due.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0u64;
        let mut stale = Vec::new();
        for (id, ticks) in due {
            match inner.timers.iter_mut().find(|t| t.id == id) {
                Some(timer) => match timer.advance(ticks) {
                    Ok(()) => delivered += ticks,
                    Err(e) => {
                        error!("[CLOCK] Subscription out of sync for timer {}: {}", id, e);
                        stale.push(id);
                    }
                },
                None => {
                    error!("[CLOCK] Tick subscription leak: timer {} no longer exists", id);
                    stale.push(id);
                }
            }
        }
        for id in &stale {
            inner.ticks.unsubscribe(id);
        }

        self.after_mutation(guard);
        Ok(delivered)
    }

    /// Rebuild the timers read from the snapshot at construction whose work item
    /// still resolves. Never fails on bad data: stale entries are pruned,
    /// unreadable snapshots were already dropped by `new`.
    pub async fn restore(&self, directory: &dyn WorkItemDirectory) -> EngineResult<RestoreReport> {
        let mut report = RestoreReport::default();
        if self.restored.swap(true, Ordering::SeqCst) {
            warn!("[RECOVERY] Snapshot already restored this session, skipping");
            return Ok(report);
        }

        // Records were loaded at construction; validation awaits without the lock
        let records = self.lock()?.pending.clone();
        if records.is_empty() {
            info!("[RECOVERY] No saved timers found, starting fresh");
            return Ok(report);
        }

        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            match directory.resolve(record.work_item_id).await {
                Ok(Some(_)) => kept.push(record),
                Ok(None) => {
                    debug!(
                        "[RECOVERY] Work item {} no longer exists, dropping timer {}",
                        record.work_item_id, record.id
                    );
                    report.pruned += 1;
                }
                Err(e) => {
                    warn!(
                        "[RECOVERY] Could not verify work item {} ({}), keeping timer {}",
                        record.work_item_id, e, record.id
                    );
                    report.unverified += 1;
                    kept.push(record);
                }
            }
        }

        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let now = self.clock.now();
        inner.pending.clear();
        for record in kept {
            if inner.position(&record.id).is_some() {
                warn!("[RECOVERY] Duplicate timer id {} in snapshot, skipping", record.id);
                continue;
            }
            let Some(timer) = record.into_timer() else {
                continue;
            };
            inner.timers.push(timer);
            // Missed time is not replayed: ticks count from now
            let pos = inner.timers.len() - 1;
            Self::sync_subscription(inner, pos, now);
            report.restored += 1;
        }

        info!(
            "[RECOVERY] Restored {} timers ({} pruned, {} unverified)",
            report.restored, report.pruned, report.unverified
        );
        self.after_mutation(guard);
        Ok(report)
    }

    /// Explicit snapshot, for shutdown and panic paths
    pub fn persist_now(&self) -> EngineResult<()> {
        let inner = self.lock()?;
        self.snapshotter.persist(&inner.timers, &inner.pending)?;
        Ok(())
    }

    /// Non-blocking `persist_now` for the panic hook, which may run on the
    /// thread that still holds the registry lock
    pub fn try_persist_now(&self) -> EngineResult<()> {
        let inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::Poisoned(e)) => return Err(EngineError::poisoned(e)),
            Err(TryLockError::WouldBlock) => {
                return Err(EngineError::Internal("registry lock is held".to_string()))
            }
        };
        self.snapshotter.persist(&inner.timers, &inner.pending)?;
        Ok(())
    }

    /// Drive the clock on the current tokio runtime. Missed intervals are
    /// skipped; the tick source coalesces the gap into one jump.
    pub fn spawn_clock_driver(
        registry: Arc<TimerRegistry>,
        period: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match registry.pump_clock() {
                    Ok(0) => {}
                    Ok(n) => debug!("[CLOCK] Delivered {} ticks", n),
                    Err(e) => error!("[CLOCK] Tick delivery failed: {}", e),
                }
            }
        })
    }
}
