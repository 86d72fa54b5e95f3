//! Completion contexts: where result callbacks run.

use super::spec::panic_message;
use crate::logging::{sanitize_message, MAX_EVENT_TEXT_CHARS};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A result callback bound to its value, ready to run.
pub type Delivery = Box<dyn FnOnce() + Send>;

/// Receives deliveries from queue workers.
///
/// Implementations must not run the delivery on the caller's stack when the
/// caller expects a different thread; `InlineContext` is the one exception
/// and is meant for tests and tools.
pub trait CompletionContext: Send + Sync {
    fn schedule(&self, delivery: Delivery);
}

fn run_guarded(delivery: Delivery, context: &str) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(delivery)) {
        error!(
            "event=callback_delivery module={} status=error error_code=callback_panicked payload={}",
            context,
            sanitize_message(&panic_message(payload.as_ref()), MAX_EVENT_TEXT_CHARS)
        );
    }
}

/// Runs deliveries immediately on the worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl CompletionContext for InlineContext {
    fn schedule(&self, delivery: Delivery) {
        run_guarded(delivery, "inline_context");
    }
}

/// Holds deliveries until the owning thread drains them, the way a UI main
/// loop would.
#[derive(Default)]
pub struct PollingContext {
    pending: Mutex<VecDeque<Delivery>>,
    ready: Condvar,
}

impl PollingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Runs every delivery queued so far, in arrival order. Returns the count.
    pub fn run_pending(&self) -> usize {
        let drained: Vec<Delivery> = match self.pending.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        let count = drained.len();
        for delivery in drained {
            run_guarded(delivery, "polling_context");
        }
        count
    }

    /// Blocks until at least one delivery arrives or `timeout` elapses, then
    /// drains. Returns the number of deliveries run.
    pub fn wait_and_run(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        {
            let mut queue = match self.pending.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            while queue.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    return 0;
                }
                queue = match self.ready.wait_timeout(queue, deadline - now) {
                    Ok((queue, _)) => queue,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }
        self.run_pending()
    }
}

impl CompletionContext for PollingContext {
    fn schedule(&self, delivery: Delivery) {
        match self.pending.lock() {
            Ok(mut queue) => queue.push_back(delivery),
            Err(poisoned) => poisoned.into_inner().push_back(delivery),
        }
        self.ready.notify_all();
    }
}

/// Dedicated delivery thread fed through a channel.
pub struct CallbackExecutor {
    name: String,
    sender: Mutex<Option<Sender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackExecutor {
    pub fn start(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Delivery>();
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for delivery in receiver {
                    run_guarded(delivery, "callback_executor");
                }
            })?;

        info!(
            "event=executor_start module=callback_executor status=ok name={}",
            sanitize_message(&name, MAX_EVENT_TEXT_CHARS)
        );
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops accepting deliveries, runs the ones already sent, and joins.
    pub fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("event=executor_shutdown module=callback_executor status=error error_code=join_failed");
            }
        }
    }
}

impl CompletionContext for CallbackExecutor {
    fn schedule(&self, delivery: Delivery) {
        let sent = match self.sender.lock() {
            Ok(sender) => sender.as_ref().map(|sender| sender.send(delivery).is_ok()),
            Err(_) => None,
        };
        if sent != Some(true) {
            warn!(
                "event=callback_delivery module=callback_executor status=dropped name={}",
                sanitize_message(&self.name, MAX_EVENT_TEXT_CHARS)
            );
        }
    }
}

impl Drop for CallbackExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
