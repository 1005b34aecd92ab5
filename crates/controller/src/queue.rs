//! Keyed work queue and the runner loop that drives reconciles.
//!
//! A key is pending at most once, never runs twice concurrently, and has at most
//! one requeue timer. A key pushed while its reconcile is in flight is marked
//! dirty and re-queued when that reconcile finishes.

use std::collections::VecDeque;
use std::sync::Arc;

use keel_core::ObjectKey;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::{Controller, ReconcileOutcome};

#[derive(Debug, Default)]
pub struct WorkQueue {
    order: VecDeque<ObjectKey>,
    pending: FxHashSet<ObjectKey>,
    in_flight: FxHashSet<ObjectKey>,
    dirty: FxHashSet<ObjectKey>,
    timers: FxHashMap<ObjectKey, Instant>,
    coalesced: u64,
}

impl WorkQueue {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }
    pub fn in_flight(&self) -> usize { self.in_flight.len() }
    pub fn scheduled(&self) -> usize { self.timers.len() }
    /// Pushes absorbed by an already pending or running key.
    pub fn coalesced(&self) -> u64 { self.coalesced }

    pub fn push(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            self.coalesced += 1;
            return;
        }
        if self.pending.insert(key.clone()) {
            self.order.push_back(key);
        } else {
            self.coalesced += 1;
        }
    }

    /// Next key to run; it stays in flight until [`WorkQueue::done`].
    pub fn pop(&mut self) -> Option<ObjectKey> {
        let key = self.order.pop_front()?;
        self.pending.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    pub fn done(&mut self, key: &ObjectKey) {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            self.push(key.clone());
        }
    }

    /// Arrange for `key` to be pushed at `at`, replacing any earlier timer for it.
    pub fn schedule(&mut self, key: ObjectKey, at: Instant) {
        self.timers.insert(key, at);
    }

    /// Drop the timer for `key`, if any.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.timers.remove(key);
    }

    /// Push every key whose timer expired by `now`.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let due: Vec<ObjectKey> = self.timers.iter().filter(|(_, at)| **at <= now).map(|(k, _)| k.clone()).collect();
        for key in &due {
            self.timers.remove(key);
            self.push(key.clone());
        }
        due.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().min().copied()
    }
}

/// Spawn the runner: keys sent on the returned channel are reconciled by up to `workers`
/// concurrent tasks, each finished key is requeued after the interval its outcome names
/// and forgotten when the outcome names none.
/// Dropping the sender stops intake; the runner exits once in-flight reconciles finish.
pub fn spawn_runner(controller: Arc<Controller>, workers: usize, cap: usize) -> (mpsc::Sender<ObjectKey>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ObjectKey>(cap);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(ObjectKey, ReconcileOutcome)>();
    let workers = workers.max(1);

    let handle = tokio::spawn(async move {
        let mut queue = WorkQueue::new();
        let mut running = 0usize;
        let mut open = true;
        loop {
            while open && running < workers {
                let Some(key) = queue.pop() else { break };
                running += 1;
                let controller = Arc::clone(&controller);
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let outcome = controller.reconcile(&key).await;
                    let _ = done_tx.send((key, outcome));
                });
            }
            metrics::gauge!("reconcile_queue_depth", queue.len() as f64);
            if !open && running == 0 {
                break;
            }

            let deadline = queue.next_deadline();
            tokio::select! {
                maybe = rx.recv(), if open => match maybe {
                    Some(key) => queue.push(key),
                    None => {
                        debug!("key channel closed; finishing in-flight reconciles");
                        open = false;
                    }
                },
                Some((key, outcome)) = done_rx.recv() => {
                    running -= 1;
                    if let Some(e) = &outcome.error {
                        warn!(%key, error = %e, "reconcile failed; will retry");
                    }
                    queue.done(&key);
                    match outcome.requeue_after {
                        Some(after) => queue.schedule(key, Instant::now() + after),
                        None => queue.forget(&key),
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() && open => {
                    let fired = queue.fire_due(Instant::now());
                    debug!(fired, "requeue timers fired");
                }
            }
        }
        info!(coalesced = queue.coalesced(), "runner stopped");
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn k(name: &str) -> ObjectKey { ObjectKey::namespaced("default", name) }

    #[test]
    fn duplicate_pending_keys_coalesce() {
        let mut q = WorkQueue::new();
        q.push(k("a"));
        q.push(k("b"));
        q.push(k("a"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.coalesced(), 1);
        assert_eq!(q.pop(), Some(k("a")));
        assert_eq!(q.pop(), Some(k("b")));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn key_pushed_while_in_flight_runs_again_after_done() {
        let mut q = WorkQueue::new();
        q.push(k("a"));
        let running = q.pop().unwrap();
        q.push(k("a"));
        assert!(q.is_empty(), "in-flight key is not handed out twice");
        assert_eq!(q.pop(), None);
        q.done(&running);
        assert_eq!(q.pop(), Some(k("a")));
    }

    #[test]
    fn done_without_new_push_leaves_queue_empty() {
        let mut q = WorkQueue::new();
        q.push(k("a"));
        let running = q.pop().unwrap();
        q.done(&running);
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 0);
    }

    #[test]
    fn one_timer_per_key() {
        let mut q = WorkQueue::new();
        let now = Instant::now();
        q.schedule(k("a"), now + Duration::from_secs(20));
        q.schedule(k("a"), now + Duration::from_secs(5));
        q.schedule(k("b"), now + Duration::from_secs(30));
        assert_eq!(q.scheduled(), 2);
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(5)));

        assert_eq!(q.fire_due(now + Duration::from_secs(10)), 1);
        assert_eq!(q.pop(), Some(k("a")));
        assert_eq!(q.scheduled(), 1);
    }

    #[test]
    fn forgotten_key_has_no_timer() {
        let mut q = WorkQueue::new();
        let now = Instant::now();
        q.schedule(k("a"), now + Duration::from_secs(20));
        q.forget(&k("a"));
        q.forget(&k("b"));
        assert_eq!(q.scheduled(), 0);
        assert_eq!(q.next_deadline(), None);
        assert_eq!(q.fire_due(now + Duration::from_secs(60)), 0);
    }
}
