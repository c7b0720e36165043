//! Process-wide "a timer is running or paused" signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error};

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Typed subject for the activity flag.
///
/// Callbacks run synchronously inside `publish`, after the registry lock is
/// released. They may read the registry but must not mutate it.
pub struct ActivitySignal {
    subscribers: Mutex<Vec<(SubscriberId, Callback)>>,
    next_id: AtomicU64,
    tx: watch::Sender<bool>,
    /// Sequence of the last accepted publish. Held while callbacks run so
    /// deliveries never interleave.
    last_seq: Mutex<u64>,
}

impl ActivitySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tx,
            last_seq: Mutex::new(0),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push((id, Arc::new(callback))),
            Err(e) => error!("[ACTIVITY] Mutex poisoned on subscribe: {}", e),
        }
        id
    }

    /// Returns false if the handle was unknown
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        match self.subscribers.lock() {
            Ok(mut subs) => {
                let before = subs.len();
                subs.retain(|(sid, _)| *sid != id);
                subs.len() != before
            }
            Err(e) => {
                error!("[ACTIVITY] Mutex poisoned on unsubscribe: {}", e);
                false
            }
        }
    }

    /// Async consumers (e.g. a refresh poller) can await changes here
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Record the flag evaluated by mutation number `seq`. A publish overtaken
    /// by a later mutation is dropped. Subscribers are notified only when the
    /// value changes. Returns true if it changed.
    pub(crate) fn publish(&self, seq: u64, active: bool) -> bool {
        let mut last = match self.last_seq.lock() {
            Ok(last) => last,
            Err(e) => {
                error!("[ACTIVITY] Mutex poisoned on publish: {}", e);
                return false;
            }
        };
        if seq <= *last {
            debug!("[ACTIVITY] Dropping publish #{} overtaken by #{}", seq, *last);
            return false;
        }
        *last = seq;

        let changed = self.tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
        if !changed {
            return false;
        }

        debug!("[ACTIVITY] any_timer_active → {}", active);
        // Callbacks run outside the subscriber lock so they may (un)subscribe
        let callbacks: Vec<Callback> = match self.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(e) => {
                error!("[ACTIVITY] Mutex poisoned on publish: {}", e);
                return true;
            }
        };
        for callback in callbacks {
            callback(active);
        }
        drop(last);
        true
    }
}

impl Default for ActivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_notifies_only_on_change() {
        let signal = ActivitySignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        signal.subscribe(move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!signal.publish(1, false));
        assert!(signal.publish(2, true));
        assert!(!signal.publish(3, true));
        assert!(signal.publish(4, false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_overtaken_publish_is_dropped() {
        let signal = ActivitySignal::new();
        assert!(signal.publish(5, true));
        assert!(!signal.publish(4, false));
        assert!(signal.current());
        assert!(signal.publish(6, false));
        assert!(!signal.current());
    }

    #[test]
    fn test_unsubscribe_removes_callback() {
        let signal = ActivitySignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let id = signal.subscribe(move |v| seen_cb.lock().unwrap().push(v));

        signal.publish(1, true);
        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
        signal.publish(2, false);

        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_receiver_sees_latest_value() {
        let signal = ActivitySignal::new();
        let mut rx = signal.watch();
        signal.publish(1, true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(signal.current());
    }
}
