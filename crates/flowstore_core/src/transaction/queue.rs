//! Single-worker priority queue.

use super::context::{CompletionContext, Delivery};
use super::spec::{panic_message, Priority, TransactionHandle};
use crate::db::SharedStore;
use crate::logging::{sanitize_message, MAX_EVENT_TEXT_CHARS};
use log::{debug, error, info, warn};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Result of `TransactionQueue::enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Same spec reference already pending (or already run); nothing changed.
    Duplicate,
    /// Queue is shut down.
    Rejected,
}

#[derive(Debug)]
pub enum QueueError {
    Spawn(io::Error),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to spawn queue worker: {err}"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
        }
    }
}

struct Queued {
    spec: TransactionHandle,
    sequence: u64,
}

impl Queued {
    fn priority(&self) -> Priority {
        self.spec.priority()
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    pending: BinaryHeap<Queued>,
    accepting: bool,
    executing: bool,
    next_sequence: u64,
}

struct QueueShared {
    name: String,
    state: Mutex<QueueState>,
    wake: Condvar,
    idle: Condvar,
    store: SharedStore,
    context: Arc<dyn CompletionContext>,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Worker code never panics while holding the state lock.
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn log_name(&self) -> String {
        sanitize_message(&self.name, MAX_EVENT_TEXT_CHARS)
    }
}

/// One dedicated worker thread draining a priority queue of specs against a
/// store.
///
/// # Invariants
/// - Work runs strictly one unit at a time, priority first, FIFO within a
///   priority.
/// - `enqueue` and `cancel*` only take the state lock; they never wait for
///   running work.
pub struct TransactionQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionQueue {
    /// Spawns the worker thread named `name`.
    ///
    /// # Errors
    /// - Returns `QueueError::Spawn` when the OS refuses the thread.
    pub fn start(
        name: impl Into<String>,
        store: SharedStore,
        context: Arc<dyn CompletionContext>,
    ) -> Result<Self, QueueError> {
        let shared = Arc::new(QueueShared {
            name: name.into(),
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                accepting: true,
                executing: false,
                next_sequence: 0,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
            store,
            context,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || run_worker(worker_shared))
            .map_err(|err| {
                error!(
                    "event=queue_start module=queue status=error queue={} error_code=spawn_failed error={}",
                    shared.log_name(),
                    err
                );
                QueueError::Spawn(err)
            })?;

        info!(
            "event=queue_start module=queue status=ok queue={}",
            shared.log_name()
        );
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Inserts `spec` by priority. Never blocks on running work.
    pub fn enqueue(&self, spec: TransactionHandle) -> EnqueueOutcome {
        let mut state = self.shared.lock();
        if !state.accepting {
            warn!(
                "event=enqueue module=queue status=rejected queue={} tag={}",
                self.shared.log_name(),
                sanitize_message(spec.tag(), MAX_EVENT_TEXT_CHARS)
            );
            return EnqueueOutcome::Rejected;
        }
        let already_pending = state
            .pending
            .iter()
            .any(|queued| Arc::ptr_eq(&queued.spec, &spec));
        if already_pending || spec.is_consumed() {
            debug!(
                "event=enqueue module=queue status=duplicate queue={} tag={}",
                self.shared.log_name(),
                sanitize_message(spec.tag(), MAX_EVENT_TEXT_CHARS)
            );
            return EnqueueOutcome::Duplicate;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        debug!(
            "event=enqueue module=queue status=ok queue={} tag={} priority={:?} sequence={}",
            self.shared.log_name(),
            sanitize_message(spec.tag(), MAX_EVENT_TEXT_CHARS),
            spec.priority(),
            sequence
        );
        state.pending.push(Queued { spec, sequence });
        drop(state);
        self.shared.wake.notify_one();
        EnqueueOutcome::Queued
    }

    /// Removes `spec` if it has not started. Running work is never preempted.
    pub fn cancel(&self, spec: &TransactionHandle) -> bool {
        let mut state = self.shared.lock();
        let before = state.pending.len();
        state
            .pending
            .retain(|queued| !Arc::ptr_eq(&queued.spec, spec));
        let removed = before != state.pending.len();
        self.after_removal(&state, if removed { 1 } else { 0 }, "cancel");
        removed
    }

    /// Removes every pending spec tagged `tag`; returns how many were removed.
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let mut state = self.shared.lock();
        let before = state.pending.len();
        state.pending.retain(|queued| queued.spec.tag() != tag);
        let removed = before - state.pending.len();
        self.after_removal(&state, removed, "cancel_by_tag");
        removed
    }

    fn after_removal(&self, state: &QueueState, removed: usize, event: &str) {
        if removed > 0 {
            info!(
                "event={} module=queue status=ok queue={} removed={}",
                event,
                self.shared.log_name(),
                removed
            );
        }
        if state.pending.is_empty() && !state.executing {
            self.shared.idle.notify_all();
        }
    }

    /// Number of specs waiting to run (excludes the one executing).
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.lock().accepting
    }

    /// Blocks until nothing is pending or executing, or `timeout` elapses.
    /// Returns `true` when the queue went idle. Meant for tests and tools.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.pending.is_empty() || state.executing {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.idle.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Stops accepting work, discards pending specs, lets the running unit
    /// finish, then joins the worker. Idempotent.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.shared.lock();
            state.accepting = false;
            let discarded = state.pending.len();
            state.pending.clear();
            discarded
        };
        self.shared.wake.notify_all();

        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return;
        };
        // A callback running on this worker may ask for shutdown; the loop
        // exits on its own once the callback returns.
        if worker.thread().id() == std::thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            error!(
                "event=queue_shutdown module=queue status=error queue={} error_code=join_failed",
                self.shared.log_name()
            );
            return;
        }
        info!(
            "event=queue_shutdown module=queue status=ok queue={} discarded={}",
            self.shared.log_name(),
            discarded
        );
    }
}

impl Drop for TransactionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TransactionQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionQueue")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .finish()
    }
}

fn next_spec(shared: &QueueShared) -> Option<TransactionHandle> {
    let mut state = shared.lock();
    loop {
        if !state.accepting {
            return None;
        }
        if let Some(queued) = state.pending.pop() {
            state.executing = true;
            return Some(queued.spec);
        }
        state = match shared.wake.wait(state) {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
}

fn finish_unit(shared: &QueueShared) {
    let mut state = shared.lock();
    state.executing = false;
    if state.pending.is_empty() {
        shared.idle.notify_all();
    }
}

/// Readiness predicates are caller code; a panic counts as a failed unit.
fn check_ready(shared: &QueueShared, spec: &TransactionHandle, tag: &str) -> bool {
    match catch_unwind(AssertUnwindSafe(|| spec.is_ready())) {
        Ok(ready) => {
            if !ready {
                debug!(
                    "event=execute module=queue status=skipped queue={} tag={} reason=not_ready",
                    shared.log_name(),
                    tag
                );
            }
            ready
        }
        Err(payload) => {
            error!(
                "event=execute module=queue status=error queue={} tag={} error_code=readiness_panicked error={}",
                shared.log_name(),
                tag,
                sanitize_message(&panic_message(payload.as_ref()), MAX_EVENT_TEXT_CHARS)
            );
            false
        }
    }
}

fn schedule_delivery(shared: &QueueShared, delivery: Delivery, tag: &str) {
    let context = &shared.context;
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| context.schedule(delivery))) {
        error!(
            "event=deliver module=queue status=error queue={} tag={} error_code=schedule_panicked error={}",
            shared.log_name(),
            tag,
            sanitize_message(&panic_message(payload.as_ref()), MAX_EVENT_TEXT_CHARS)
        );
    }
}

fn run_worker(shared: Arc<QueueShared>) {
    while let Some(spec) = next_spec(&shared) {
        let tag = sanitize_message(spec.tag(), MAX_EVENT_TEXT_CHARS);

        if !check_ready(&shared, &spec, &tag) {
            finish_unit(&shared);
            continue;
        }

        let Some(work) = spec.take_work() else {
            finish_unit(&shared);
            continue;
        };

        let started_at = Instant::now();
        let outcome = work.run(&shared.store, spec.runs_in_store_transaction());
        match &outcome.failure {
            None => debug!(
                "event=execute module=queue status=ok queue={} tag={} has_result={} duration_ms={}",
                shared.log_name(),
                tag,
                outcome.has_result,
                started_at.elapsed().as_millis()
            ),
            Some(failure) => error!(
                "event=execute module=queue status=error queue={} tag={} duration_ms={} error_code=execution_failed error={}",
                shared.log_name(),
                tag,
                started_at.elapsed().as_millis(),
                sanitize_message(failure, MAX_EVENT_TEXT_CHARS)
            ),
        }

        if let Some(delivery) = outcome.delivery {
            schedule_delivery(&shared, delivery, &tag);
        }
        finish_unit(&shared);
    }
    debug!(
        "event=worker_exit module=queue status=ok queue={}",
        shared.log_name()
    );
}
