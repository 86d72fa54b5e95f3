//! Unit-of-work specification and its builder.

use super::context::Delivery;
use super::ExecutionError;
use crate::db::{SharedStore, Store, StoreError};
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Scheduling tier. Ordering: `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Tag and priority of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub tag: String,
    pub priority: Priority,
}

impl TransactionInfo {
    pub fn new(tag: impl Into<String>, priority: Priority) -> Self {
        Self {
            tag: tag.into(),
            priority,
        }
    }

    /// Reads the caller is waiting on.
    pub fn fetch() -> Self {
        Self::new("fetch", Priority::High)
    }

    pub fn save() -> Self {
        Self::new("save", Priority::Normal)
    }

    pub fn background() -> Self {
        Self::new("background", Priority::Low)
    }
}

impl Default for TransactionInfo {
    fn default() -> Self {
        Self::new("transaction", Priority::Normal)
    }
}

/// Result of an execution step; `None` means "nothing to deliver".
pub type StepResult<T> = Result<Option<T>, ExecutionError>;

/// Shared handle to a spec. Queue identity is the handle's address.
pub type TransactionHandle = Arc<TransactionSpec>;

type Step<T> = Box<dyn FnOnce(&mut dyn Store) -> StepResult<T> + Send>;
type Hook<T> = Box<dyn FnOnce(Option<&T>) + Send>;
type Readiness = Box<dyn Fn() -> bool + Send + Sync>;

enum Callback<T> {
    Split {
        success: Option<Box<dyn FnOnce(T) + Send>>,
        error: Option<Box<dyn FnOnce(ExecutionError) + Send>>,
    },
    Combined(Box<dyn FnOnce(Result<T, ExecutionError>) + Send>),
}

struct Work<T> {
    step: Step<T>,
    after_commit: Option<Hook<T>>,
    callback: Callback<T>,
}

/// What the worker learns from running one unit.
pub(crate) struct WorkOutcome {
    pub failure: Option<String>,
    pub has_result: bool,
    pub delivery: Option<Delivery>,
}

pub(crate) trait ErasedWork: Send {
    fn run(self: Box<Self>, store: &SharedStore, in_store_transaction: bool) -> WorkOutcome;
}

impl<T: Send + 'static> ErasedWork for Work<T> {
    fn run(self: Box<Self>, store: &SharedStore, in_store_transaction: bool) -> WorkOutcome {
        let Work {
            step,
            after_commit,
            callback,
        } = *self;

        match execute_step(store, in_store_transaction, step) {
            Ok(result) => {
                if let Some(hook) = after_commit {
                    if catch_unwind(AssertUnwindSafe(|| hook(result.as_ref()))).is_err() {
                        error!("event=after_commit module=queue status=error error_code=hook_panicked");
                    }
                }
                let has_result = result.is_some();
                let delivery: Option<Delivery> = match (result, callback) {
                    (Some(value), Callback::Split {
                        success: Some(success),
                        ..
                    }) => Some(Box::new(move || success(value))),
                    (Some(value), Callback::Combined(done)) => {
                        Some(Box::new(move || done(Ok(value))))
                    }
                    _ => None,
                };
                WorkOutcome {
                    failure: None,
                    has_result,
                    delivery,
                }
            }
            Err(err) => {
                let failure = Some(err.to_string());
                let delivery: Option<Delivery> = match callback {
                    Callback::Split {
                        error: Some(on_error),
                        ..
                    } => Some(Box::new(move || on_error(err))),
                    Callback::Combined(done) => Some(Box::new(move || done(Err(err)))),
                    Callback::Split { error: None, .. } => None,
                };
                WorkOutcome {
                    failure,
                    has_result: false,
                    delivery,
                }
            }
        }
    }
}

/// Runs `step` with the store locked, optionally inside begin/commit.
fn execute_step<T>(store: &SharedStore, in_store_transaction: bool, step: Step<T>) -> StepResult<T> {
    let mut guard = store
        .lock()
        .map_err(|_| ExecutionError::Store(StoreError::Poisoned))?;
    let store: &mut dyn Store = &mut *guard;

    if in_store_transaction {
        store.begin()?;
    }

    let result = match catch_unwind(AssertUnwindSafe(|| step(&mut *store))) {
        Ok(result) => result,
        Err(payload) => Err(ExecutionError::Panicked(panic_message(payload.as_ref()))),
    };

    if !in_store_transaction {
        return result;
    }

    match result {
        Ok(value) => match store.commit() {
            Ok(()) => Ok(value),
            Err(err) => {
                rollback_logged(store, "commit_failed");
                Err(err.into())
            }
        },
        Err(err) => {
            rollback_logged(store, "step_failed");
            Err(err)
        }
    }
}

fn rollback_logged(store: &mut dyn Store, cause: &str) {
    if let Err(rollback_err) = store.rollback() {
        error!(
            "event=rollback module=queue status=error cause={} error={}",
            cause, rollback_err
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One schedulable unit of work.
///
/// Owned by the queue once enqueued; the execution step is consumed on the
/// first run, so a spec can never execute twice.
pub struct TransactionSpec {
    info: TransactionInfo,
    in_store_transaction: bool,
    readiness: Option<Readiness>,
    work: Mutex<Option<Box<dyn ErasedWork>>>,
}

impl TransactionSpec {
    /// Starts a spec around `step`, which runs on the queue's worker thread.
    pub fn builder<T, F>(step: F) -> TransactionBuilder<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Store) -> StepResult<T> + Send + 'static,
    {
        TransactionBuilder {
            info: TransactionInfo::default(),
            in_store_transaction: false,
            readiness: None,
            work: Work {
                step: Box::new(step),
                after_commit: None,
                callback: Callback::Split {
                    success: None,
                    error: None,
                },
            },
        }
    }

    pub fn tag(&self) -> &str {
        &self.info.tag
    }

    pub fn priority(&self) -> Priority {
        self.info.priority
    }

    pub fn info(&self) -> &TransactionInfo {
        &self.info
    }

    pub fn runs_in_store_transaction(&self) -> bool {
        self.in_store_transaction
    }

    /// Evaluates the readiness predicate; specs without one are always ready.
    pub fn is_ready(&self) -> bool {
        self.readiness.as_ref().map_or(true, |ready| ready())
    }

    /// Whether the execution step has already been taken by a worker.
    pub fn is_consumed(&self) -> bool {
        self.work
            .lock()
            .map(|work| work.is_none())
            .unwrap_or(true)
    }

    pub(crate) fn take_work(&self) -> Option<Box<dyn ErasedWork>> {
        self.work.lock().ok().and_then(|mut work| work.take())
    }
}

impl Debug for TransactionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSpec")
            .field("tag", &self.info.tag)
            .field("priority", &self.info.priority)
            .field("in_store_transaction", &self.in_store_transaction)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Builder returned by `TransactionSpec::builder`.
pub struct TransactionBuilder<T> {
    info: TransactionInfo,
    in_store_transaction: bool,
    readiness: Option<Readiness>,
    work: Work<T>,
}

impl<T: Send + 'static> TransactionBuilder<T> {
    pub fn info(mut self, info: TransactionInfo) -> Self {
        self.info = info;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.info.tag = tag.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.info.priority = priority;
        self
    }

    /// Predicate checked immediately before execution; `false` drops the
    /// spec without running it or any callback.
    pub fn ready_when<F>(mut self, ready: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.readiness = Some(Box::new(ready));
        self
    }

    /// Runs the step between store `begin` and `commit`; failures roll back.
    pub fn in_store_transaction(mut self, enabled: bool) -> Self {
        self.in_store_transaction = enabled;
        self
    }

    /// Hook run on the worker after a successful (committed) step, before
    /// the next unit starts.
    pub fn after_commit<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Option<&T>) + Send + 'static,
    {
        self.work.after_commit = Some(Box::new(hook));
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.work.callback = match self.work.callback {
            Callback::Split { error, .. } => Callback::Split {
                success: Some(Box::new(callback)),
                error,
            },
            Callback::Combined(_) => Callback::Split {
                success: Some(Box::new(callback)),
                error: None,
            },
        };
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ExecutionError) + Send + 'static,
    {
        self.work.callback = match self.work.callback {
            Callback::Split { success, .. } => Callback::Split {
                success,
                error: Some(Box::new(callback)),
            },
            Callback::Combined(_) => Callback::Split {
                success: None,
                error: Some(Box::new(callback)),
            },
        };
        self
    }

    /// Single callback for both outcomes; replaces `on_success`/`on_error`.
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<T, ExecutionError>) + Send + 'static,
    {
        self.work.callback = Callback::Combined(Box::new(callback));
        self
    }

    pub fn build(self) -> TransactionHandle {
        Arc::new(TransactionSpec {
            info: self.info,
            in_store_transaction: self.in_store_transaction,
            readiness: self.readiness,
            work: Mutex::new(Some(Box::new(self.work))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Priority, TransactionInfo, TransactionSpec};
    use crate::db::{
        open_store_in_memory, share, Store, StoreError, StoreOutput, StoreResult, StoredValue,
    };
    use crate::transaction::ExecutionError;
    use std::sync::{mpsc, Arc, Mutex};

    /// Records transaction control calls; commit and rollback both fail.
    struct RefusesCommit {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RefusesCommit {
        fn record(&self, call: &'static str) {
            self.calls.lock().expect("calls lock").push(call);
        }
    }

    impl Store for RefusesCommit {
        fn execute(&mut self, _sql: &str, _bound: &[StoredValue]) -> StoreResult<StoreOutput> {
            Ok(StoreOutput::RowCount(0))
        }

        fn execute_batch(&mut self, _sql: &str) -> StoreResult<()> {
            Ok(())
        }

        fn begin(&mut self) -> StoreResult<()> {
            self.record("begin");
            Ok(())
        }

        fn commit(&mut self) -> StoreResult<()> {
            self.record("commit");
            Err(StoreError::UnexpectedOutput("commit refused"))
        }

        fn rollback(&mut self) -> StoreResult<()> {
            self.record("rollback");
            Err(StoreError::UnexpectedOutput("rollback refused"))
        }
    }

    #[test]
    fn priority_orders_high_above_low() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(TransactionInfo::fetch().priority, Priority::High);
    }

    #[test]
    fn work_is_consumed_once() {
        let spec = TransactionSpec::builder(|_store: &mut dyn Store| Ok(Some(1))).build();
        assert!(!spec.is_consumed());
        assert!(spec.take_work().is_some());
        assert!(spec.is_consumed());
        assert!(spec.take_work().is_none());
    }

    #[test]
    fn failed_step_rolls_back_and_reports_error() {
        let store = share(open_store_in_memory().expect("store"));
        store
            .lock()
            .expect("lock")
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
            .expect("schema");

        let (tx, rx) = mpsc::channel();
        let spec = TransactionSpec::builder(|store: &mut dyn Store| -> super::StepResult<()> {
            store.execute("INSERT INTO t (id) VALUES (1)", &[])?;
            Err(ExecutionError::Failed("abort".to_string()))
        })
        .in_store_transaction(true)
        .on_error(move |err| tx.send(err.to_string()).expect("send"))
        .build();

        let work = spec.take_work().expect("work");
        let outcome = work.run(&store, spec.runs_in_store_transaction());
        assert_eq!(outcome.failure.as_deref(), Some("abort"));
        (outcome.delivery.expect("error delivery"))();
        assert_eq!(rx.recv().expect("error delivered"), "abort");

        let count = store
            .lock()
            .expect("lock")
            .execute("SELECT id FROM t", &[])
            .expect("select");
        assert_eq!(count, StoreOutput::Rows(Vec::new()));
    }

    #[test]
    fn panicking_step_is_reported_as_panicked() {
        let store = share(open_store_in_memory().expect("store"));
        let spec = TransactionSpec::builder(|_store: &mut dyn Store| -> super::StepResult<()> {
            panic!("boom")
        })
        .build();

        let outcome = spec
            .take_work()
            .expect("work")
            .run(&store, spec.runs_in_store_transaction());
        assert!(outcome
            .failure
            .expect("failure recorded")
            .contains("boom"));
    }

    #[test]
    fn failed_commit_rolls_back_and_reports_commit_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let store = share(RefusesCommit {
            calls: Arc::clone(&calls),
        });
        let spec = TransactionSpec::builder(|_store: &mut dyn Store| Ok(Some(7)))
            .in_store_transaction(true)
            .build();

        let outcome = spec
            .take_work()
            .expect("work")
            .run(&store, spec.runs_in_store_transaction());

        assert!(outcome
            .failure
            .expect("commit failure recorded")
            .contains("commit refused"));
        assert!(!outcome.has_result);
        assert_eq!(
            calls.lock().expect("calls lock").as_slice(),
            ["begin", "commit", "rollback"]
        );
    }
}
