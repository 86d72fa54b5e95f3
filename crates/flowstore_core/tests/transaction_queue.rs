use flowstore_core::db::{open_store_in_memory, share, SharedStore, Store, StoreOutput, StoredValue};
use flowstore_core::transaction::{Delivery, StepResult};
use flowstore_core::{
    CompletionContext, EnqueueOutcome, ExecutionError, InlineContext, PollingContext, Priority, TransactionHandle,
    TransactionQueue, TransactionSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn memory_store() -> SharedStore {
    share(open_store_in_memory().unwrap())
}

fn start_queue(name: &str) -> TransactionQueue {
    TransactionQueue::start(name, memory_store(), Arc::new(InlineContext)).unwrap()
}

/// Occupies the worker until the returned sender fires (or is dropped).
fn hold_worker(queue: &TransactionQueue) -> (Sender<()>, TransactionHandle) {
    let (release, wait) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel();
    let gate = TransactionSpec::builder(move |_store: &mut dyn Store| -> StepResult<()> {
        started_tx.send(()).unwrap();
        let _ = wait.recv();
        Ok(None)
    })
    .tag("gate")
    .priority(Priority::High)
    .build();
    assert_eq!(queue.enqueue(Arc::clone(&gate)), EnqueueOutcome::Queued);
    started_rx.recv_timeout(TIMEOUT).unwrap();
    (release, gate)
}

fn labelled(label: &'static str, priority: Priority, sink: &Sender<&'static str>) -> TransactionHandle {
    let sink = sink.clone();
    TransactionSpec::builder(move |_store: &mut dyn Store| Ok(Some(label)))
        .priority(priority)
        .on_success(move |label| sink.send(label).unwrap())
        .build()
}

fn drain(rx: &Receiver<&'static str>, count: usize) -> Vec<&'static str> {
    (0..count).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect()
}

#[test]
fn dequeues_by_priority_then_enqueue_order() {
    let queue = start_queue("test-order");
    let (release, _gate) = hold_worker(&queue);
    let (tx, rx) = mpsc::channel();

    queue.enqueue(labelled("low", Priority::Low, &tx));
    queue.enqueue(labelled("high", Priority::High, &tx));
    queue.enqueue(labelled("normal", Priority::Normal, &tx));
    queue.enqueue(labelled("normal-2", Priority::Normal, &tx));
    queue.enqueue(labelled("high-2", Priority::High, &tx));
    assert_eq!(queue.pending(), 5);

    release.send(()).unwrap();
    assert_eq!(
        drain(&rx, 5),
        vec!["high", "high-2", "normal", "normal-2", "low"]
    );
    assert!(queue.wait_idle(TIMEOUT));
}

#[test]
fn three_tier_example_runs_high_normal_low() {
    let queue = start_queue("test-three-tier");
    let (release, _gate) = hold_worker(&queue);
    let (tx, rx) = mpsc::channel();

    for (label, priority) in [
        ("LOW", Priority::Low),
        ("HIGH", Priority::High),
        ("NORMAL", Priority::Normal),
    ] {
        queue.enqueue(labelled(label, priority, &tx));
    }
    release.send(()).unwrap();
    assert_eq!(drain(&rx, 3), vec!["HIGH", "NORMAL", "LOW"]);
}

#[test]
fn same_spec_enqueued_twice_runs_once() {
    let queue = start_queue("test-duplicate");
    let (release, _gate) = hold_worker(&queue);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let spec = TransactionSpec::builder(move |_store: &mut dyn Store| -> StepResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    })
    .build();

    assert_eq!(queue.enqueue(Arc::clone(&spec)), EnqueueOutcome::Queued);
    assert_eq!(queue.enqueue(Arc::clone(&spec)), EnqueueOutcome::Duplicate);
    assert_eq!(queue.pending(), 1);

    release.send(()).unwrap();
    assert!(queue.wait_idle(TIMEOUT));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(queue.enqueue(spec), EnqueueOutcome::Duplicate);
    assert!(queue.wait_idle(TIMEOUT));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_removes_only_pending_work() {
    let queue = start_queue("test-cancel");
    let (release, gate) = hold_worker(&queue);
    let (tx, rx) = mpsc::channel();

    let first = labelled("first", Priority::Normal, &tx);
    let second = labelled("second", Priority::Normal, &tx);
    queue.enqueue(Arc::clone(&first));
    queue.enqueue(Arc::clone(&second));

    assert!(queue.cancel(&first));
    assert!(!queue.cancel(&first));
    assert!(!queue.cancel(&gate), "running work is never cancelled");

    release.send(()).unwrap();
    assert_eq!(drain(&rx, 1), vec!["second"]);
    assert!(queue.wait_idle(TIMEOUT));
    assert!(rx.try_recv().is_err());
}

#[test]
fn cancel_by_tag_removes_every_matching_spec() {
    let queue = start_queue("test-cancel-tag");
    let (release, _gate) = hold_worker(&queue);
    let (tx, rx) = mpsc::channel();

    for label in ["sync-a", "sync-b"] {
        let sink = tx.clone();
        let spec = TransactionSpec::builder(move |_store: &mut dyn Store| Ok(Some(label)))
            .tag("sync")
            .on_success(move |label| sink.send(label).unwrap())
            .build();
        queue.enqueue(spec);
    }
    queue.enqueue(labelled("other", Priority::Low, &tx));

    assert_eq!(queue.cancel_by_tag("sync"), 2);
    assert_eq!(queue.cancel_by_tag("sync"), 0);
    assert_eq!(queue.pending(), 1);

    release.send(()).unwrap();
    assert_eq!(drain(&rx, 1), vec!["other"]);
}

#[test]
fn spec_that_is_not_ready_is_dropped_without_callback() {
    let queue = start_queue("test-readiness");
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let (tx, rx) = mpsc::channel();

    let spec = TransactionSpec::builder(move |_store: &mut dyn Store| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Some(()))
    })
    .ready_when(|| false)
    .on_result(move |result| tx.send(result.is_ok()).unwrap())
    .build();
    queue.enqueue(spec);

    assert!(queue.wait_idle(TIMEOUT));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn panicking_readiness_drops_only_that_unit() {
    let queue = start_queue("test-readiness-panic");
    let (tx, rx) = mpsc::channel();

    let broken_tx = tx.clone();
    let broken = TransactionSpec::builder(|_store: &mut dyn Store| Ok(Some("broken")))
        .ready_when(|| panic!("readiness check failed"))
        .on_success(move |label| broken_tx.send(label).unwrap())
        .build();
    assert_eq!(queue.enqueue(broken), EnqueueOutcome::Queued);
    assert_eq!(queue.enqueue(labelled("next", Priority::Normal, &tx)), EnqueueOutcome::Queued);

    assert_eq!(drain(&rx, 1), vec!["next"]);
    assert!(queue.wait_idle(TIMEOUT));
    assert!(rx.try_recv().is_err());
    queue.shutdown();
}

/// Panics on its first delivery, then runs deliveries inline.
#[derive(Default)]
struct RefusesFirstDelivery {
    calls: AtomicUsize,
}

impl CompletionContext for RefusesFirstDelivery {
    fn schedule(&self, delivery: Delivery) {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("context refused delivery");
        }
        delivery();
    }
}

#[test]
fn panicking_completion_context_keeps_worker_alive() {
    let queue = TransactionQueue::start(
        "test-context-panic",
        memory_store(),
        Arc::new(RefusesFirstDelivery::default()),
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();

    queue.enqueue(labelled("lost", Priority::Normal, &tx));
    assert!(queue.wait_idle(TIMEOUT));
    queue.enqueue(labelled("delivered", Priority::Normal, &tx));

    assert_eq!(drain(&rx, 1), vec!["delivered"]);
    assert!(queue.wait_idle(TIMEOUT));
    queue.shutdown();
}

#[test]
fn failures_are_reported_per_unit_and_worker_survives() {
    let queue = start_queue("test-failures");
    let (release, _gate) = hold_worker(&queue);
    let (err_tx, err_rx) = mpsc::channel();
    let (ok_tx, ok_rx) = mpsc::channel();

    let failing_sink = err_tx.clone();
    queue.enqueue(
        TransactionSpec::builder(|store: &mut dyn Store| -> StepResult<()> {
            store.execute("SELECT * FROM missing_table", &[])?;
            Ok(Some(()))
        })
        .on_error(move |err| failing_sink.send(err).unwrap())
        .build(),
    );
    queue.enqueue(
        TransactionSpec::builder(|_store: &mut dyn Store| -> StepResult<()> {
            panic!("worker must survive this")
        })
        .on_error(move |err| err_tx.send(err).unwrap())
        .build(),
    );
    queue.enqueue(
        TransactionSpec::builder(|_store: &mut dyn Store| Ok(Some(42_i64)))
            .priority(Priority::Low)
            .on_success(move |value| ok_tx.send(value).unwrap())
            .build(),
    );

    release.send(()).unwrap();
    let first = err_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(first, ExecutionError::Store(_)));
    let second = err_rx.recv_timeout(TIMEOUT).unwrap();
    match second {
        ExecutionError::Panicked(message) => assert!(message.contains("worker must survive")),
        other => panic!("expected panic error, got {other:?}"),
    }
    assert_eq!(ok_rx.recv_timeout(TIMEOUT).unwrap(), 42);
}

#[test]
fn failed_store_transaction_rolls_back() {
    let store = memory_store();
    store
        .lock()
        .unwrap()
        .execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY);")
        .unwrap();
    let queue = TransactionQueue::start("test-rollback", Arc::clone(&store), Arc::new(InlineContext))
        .unwrap();
    let (tx, rx) = mpsc::channel();

    queue.enqueue(
        TransactionSpec::builder(|store: &mut dyn Store| -> StepResult<()> {
            store.execute("INSERT INTO items (id) VALUES (1)", &[])?;
            Err(ExecutionError::Failed("abort after insert".to_string()))
        })
        .in_store_transaction(true)
        .build(),
    );
    queue.enqueue(
        TransactionSpec::builder(|store: &mut dyn Store| {
            Ok(Some(store.execute("SELECT id FROM items", &[])?.row_count()))
        })
        .on_success(move |count| tx.send(count).unwrap())
        .build(),
    );

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 0);
}

#[test]
fn post_commit_hook_finishes_before_the_next_unit_starts() {
    let queue = start_queue("test-hooks");
    let (release, _gate) = hold_worker(&queue);
    let log = Arc::new(Mutex::new(Vec::new()));

    let hook_log = Arc::clone(&log);
    let step_log = Arc::clone(&log);
    queue.enqueue(
        TransactionSpec::builder(|_store: &mut dyn Store| Ok(Some(1)))
            .in_store_transaction(true)
            .after_commit(move |result: Option<&i32>| {
                thread::sleep(Duration::from_millis(20));
                hook_log.lock().unwrap().push(format!("hook-a:{result:?}"));
            })
            .build(),
    );
    queue.enqueue(
        TransactionSpec::builder(move |_store: &mut dyn Store| -> StepResult<()> {
            step_log.lock().unwrap().push("step-b".to_string());
            Ok(None)
        })
        .build(),
    );

    release.send(()).unwrap();
    assert!(queue.wait_idle(TIMEOUT));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["hook-a:Some(1)".to_string(), "step-b".to_string()]
    );
}

#[test]
fn shutdown_discards_pending_and_lets_running_work_finish() {
    let queue = start_queue("test-shutdown");
    let (tx, rx) = mpsc::channel();
    let (release, wait) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel();
    let gate_sink = tx.clone();
    queue.enqueue(
        TransactionSpec::builder(move |_store: &mut dyn Store| {
            started_tx.send(()).unwrap();
            let _ = wait.recv();
            Ok(Some("in-flight"))
        })
        .on_success(move |label| gate_sink.send(label).unwrap())
        .build(),
    );
    started_rx.recv_timeout(TIMEOUT).unwrap();
    queue.enqueue(labelled("discarded", Priority::High, &tx));

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();
    });
    queue.shutdown();
    releaser.join().unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "in-flight");
    assert!(rx.try_recv().is_err());
    assert_eq!(queue.pending(), 0);
    assert_eq!(
        queue.enqueue(labelled("late", Priority::High, &tx)),
        EnqueueOutcome::Rejected
    );
    queue.shutdown();
}

#[test]
fn polling_context_defers_delivery_to_the_owning_thread() {
    let context = Arc::new(PollingContext::new());
    let queue = TransactionQueue::start("test-polling", memory_store(), context.clone()).unwrap();
    let delivered_on = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&delivered_on);

    queue.enqueue(
        TransactionSpec::builder(|_store: &mut dyn Store| Ok(Some(())))
            .on_success(move |()| {
                *slot.lock().unwrap() = Some(thread::current().id());
            })
            .build(),
    );
    assert!(queue.wait_idle(TIMEOUT));
    assert!(delivered_on.lock().unwrap().is_none());

    assert_eq!(context.wait_and_run(TIMEOUT), 1);
    assert_eq!(*delivered_on.lock().unwrap(), Some(thread::current().id()));
}

#[test]
fn store_output_distinguishes_rows_and_counts() {
    let store = memory_store();
    let mut guard = store.lock().unwrap();
    guard
        .execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY);")
        .unwrap();
    let inserted = guard
        .execute("INSERT INTO items (id) VALUES (?), (?)", &[StoredValue::Integer(1), StoredValue::Integer(2)])
        .unwrap();
    assert_eq!(inserted, StoreOutput::RowCount(2));
    let rows = guard.execute("SELECT id FROM items", &[]).unwrap().into_rows().unwrap();
    assert_eq!(rows.len(), 2);
}
