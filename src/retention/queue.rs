//! Deduplicating work queue for reconcile requests.
//!
//! Guarantees:
//! - A request waiting in the queue is stored once, however often it is added.
//! - A request is handed to at most one worker at a time. Adding it while a
//!   worker holds it marks it dirty; it is queued again when the worker calls
//!   [`WorkQueue::done`].
//! - Delayed adds keep the earliest deadline per request.
//! - Failed requests back off exponentially until [`WorkQueue::forget`] is
//!   called for them.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use super::reconciler::ReconcileRequest;
use crate::config::ControllerConfig;

#[derive(Default)]
struct State {
    queue: VecDeque<ReconcileRequest>,
    /// Requests that need processing: queued, or re-added while in flight.
    dirty: HashSet<ReconcileRequest>,
    processing: HashSet<ReconcileRequest>,
    /// Delayed requests and when they become ready.
    waiting: HashMap<ReconcileRequest, Instant>,
    failures: HashMap<ReconcileRequest, u32>,
    shutting_down: bool,
}

impl State {
    /// Returns whether the request was pushed onto the queue.
    fn add(&mut self, request: ReconcileRequest) -> bool {
        if self.shutting_down || self.dirty.contains(&request) {
            return false;
        }
        self.dirty.insert(request.clone());
        if self.processing.contains(&request) {
            return false;
        }
        self.queue.push_back(request);
        true
    }

    fn promote_due(&mut self, now: Instant) {
        let due: Vec<ReconcileRequest> = self
            .waiting
            .iter()
            .filter(|(_, ready_at)| **ready_at <= now)
            .map(|(request, _)| request.clone())
            .collect();
        for request in due {
            self.waiting.remove(&request);
            self.add(request);
        }
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.waiting.values().min().copied()
    }
}

pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    config: ControllerConfig,
}

impl WorkQueue {
    /// Create a queue using the controller's backoff settings.
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            config,
        }
    }

    pub fn add(&self, request: ReconcileRequest) {
        if self.state.lock().add(request) {
            self.notify.notify_waiters();
        }
    }

    /// Add `request` once `delay` has passed.
    pub fn add_after(&self, request: ReconcileRequest, delay: Duration) {
        if delay.is_zero() {
            self.add(request);
            return;
        }

        let ready_at = Instant::now() + delay;
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        state
            .waiting
            .entry(request)
            .and_modify(|existing| *existing = (*existing).min(ready_at))
            .or_insert(ready_at);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Add `request` after its backoff delay and count one more failure.
    ///
    /// Returns the delay applied.
    pub fn add_rate_limited(&self, request: ReconcileRequest) -> Duration {
        let failures = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(request.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.config.backoff_for(failures);
        self.add_after(request, delay);
        delay
    }

    /// Reset the failure count of `request`.
    pub fn forget(&self, request: &ReconcileRequest) {
        self.state.lock().failures.remove(request);
    }

    /// Consecutive failures recorded for `request`.
    pub fn num_requeues(&self, request: &ReconcileRequest) -> u32 {
        self.state
            .lock()
            .failures
            .get(request)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next request. Returns `None` once the queue shuts down.
    ///
    /// The caller must pass the request to [`WorkQueue::done`] when finished.
    pub async fn get(&self) -> Option<ReconcileRequest> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready_at = {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(request) = state.queue.pop_front() {
                    state.dirty.remove(&request);
                    state.processing.insert(request.clone());
                    return Some(request);
                }
                state.next_ready_at()
            };

            match ready_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark `request` as finished, queueing it again if it was re-added
    /// while in flight.
    pub fn done(&self, request: &ReconcileRequest) {
        let mut state = self.state.lock();
        state.processing.remove(request);
        if state.dirty.contains(request) && !state.shutting_down {
            state.queue.push_back(request.clone());
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Number of requests ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out requests and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
