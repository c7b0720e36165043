//! Clock source: monotonic + wall time, and per-timer tick subscriptions.

use crate::engine::TimerId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Time provider. `now()` is monotonic and drives ticking; `wall()` is for display and ledger timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock. Monotonic and wall time advance together unless
/// `jump_wall` is used to simulate a system clock change.
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Mutex<Duration>,
    wall_skew: Mutex<chrono::Duration>,
}

impl ManualClock {
    pub fn new(wall_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            offset: Mutex::new(Duration::ZERO),
            wall_skew: Mutex::new(chrono::Duration::zero()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Move only the wall clock (NTP correction, manual change)
    pub fn jump_wall(&self, by: chrono::Duration) {
        if let Ok(mut skew) = self.wall_skew.lock() {
            *skew += by;
        }
    }

    fn offset(&self) -> Duration {
        self.offset.lock().map(|o| *o).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn wall(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or_else(|_| chrono::Duration::zero());
        let skew = self
            .wall_skew
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + offset + skew
    }
}

/// Default gap above which a burst is treated as suspension or a clock anomaly
pub const DEFAULT_MAX_CATCH_UP_SECS: u64 = 5 * 60;

/// Tick subscription table. Each subscriber is credited whole monotonic
/// seconds since its last credit, as one jump per pump.
pub struct TickSource {
    /// Subscriber → instant up to which ticks were credited
    subscriptions: HashMap<TimerId, Instant>,
    max_catch_up_secs: u64,
}

impl TickSource {
    pub fn new(max_catch_up_secs: u64) -> Self {
        Self {
            subscriptions: HashMap::new(),
            max_catch_up_secs: max_catch_up_secs.max(1),
        }
    }

    /// Start delivering ticks to `id`, counting from `now`
    pub fn subscribe(&mut self, id: TimerId, now: Instant) {
        self.subscriptions.insert(id, now);
    }

    /// Returns false if there was no subscription
    pub fn unsubscribe(&mut self, id: &TimerId) -> bool {
        self.subscriptions.remove(id).is_some()
    }

    pub fn is_subscribed(&self, id: &TimerId) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Compute due ticks per subscriber at `now`. Sub-second remainders carry over.
    pub fn poll(&mut self, now: Instant) -> Vec<(TimerId, u64)> {
        let mut due = Vec::new();
        for (id, credited_until) in self.subscriptions.iter_mut() {
            let gap = now.saturating_duration_since(*credited_until);
            let whole = gap.as_secs();
            if whole == 0 {
                continue;
            }
            if whole > self.max_catch_up_secs {
                warn!(
                    "[CLOCK] Tick gap of {}s for timer {} exceeds {}s, clamping to one tick",
                    whole, id, self.max_catch_up_secs
                );
                *credited_until = now;
                due.push((id.clone(), 1));
            } else {
                *credited_until += Duration::from_secs(whole);
                due.push((id.clone(), whole));
            }
        }
        due
    }
}
