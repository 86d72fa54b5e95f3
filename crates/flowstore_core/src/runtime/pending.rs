//! Builder handed back by coordinator operations before they are queued.

use super::CoordinatorError;
use crate::transaction::{
    EnqueueOutcome, ExecutionError, Priority, TransactionBuilder, TransactionHandle,
    TransactionInfo, TransactionQueue,
};
use std::sync::Arc;

/// An operation prepared by the `Coordinator` but not yet queued.
///
/// Adjust scheduling and attach callbacks, then `submit`.
#[must_use = "operations do nothing until submitted"]
pub struct PendingOperation<T> {
    queue: Arc<TransactionQueue>,
    builder: TransactionBuilder<T>,
}

impl<T: Send + 'static> PendingOperation<T> {
    pub(crate) fn new(queue: Arc<TransactionQueue>, builder: TransactionBuilder<T>) -> Self {
        Self { queue, builder }
    }

    pub fn info(mut self, info: TransactionInfo) -> Self {
        self.builder = self.builder.info(info);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.builder = self.builder.priority(priority);
        self
    }

    /// Tag used by `Coordinator::cancel_by_tag`.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.builder = self.builder.tag(tag);
        self
    }

    pub fn ready_when<F>(mut self, ready: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.builder = self.builder.ready_when(ready);
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.builder = self.builder.on_success(callback);
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ExecutionError) + Send + 'static,
    {
        self.builder = self.builder.on_error(callback);
        self
    }

    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<T, ExecutionError>) + Send + 'static,
    {
        self.builder = self.builder.on_result(callback);
        self
    }

    /// Name of the queue this operation will run on.
    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Queues the operation and returns its handle for cancellation.
    ///
    /// # Errors
    /// - `CoordinatorError::ShutDown` when the target queue is shut down.
    pub fn submit(self) -> Result<TransactionHandle, CoordinatorError> {
        let spec = self.builder.build();
        match self.queue.enqueue(Arc::clone(&spec)) {
            EnqueueOutcome::Queued | EnqueueOutcome::Duplicate => Ok(spec),
            EnqueueOutcome::Rejected => Err(CoordinatorError::ShutDown),
        }
    }
}
