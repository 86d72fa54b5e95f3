//! Prioritized units of work and the single-worker queues that run them.
//!
//! # Responsibility
//! - Model a unit of work: priority, tag, readiness predicate, execution
//!   step, post-commit hook and completion callbacks.
//! - Serialize execution of queued units against a store on one dedicated
//!   worker thread per queue.
//! - Deliver results through an injected completion context.
//!
//! # Invariants
//! - Dequeue order is priority (HIGH > NORMAL > LOW), then enqueue order.
//! - A spec executes at most once; duplicates are identified by reference.
//! - Post-commit hooks of one unit finish before the next unit starts.
//! - A failing or panicking unit never takes the worker down.

use crate::convert::ConvertError;
use crate::db::StoreError;
use crate::model::EntityError;
use crate::query::QueryError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod context;
mod queue;
mod spec;

pub use context::{CallbackExecutor, CompletionContext, Delivery, InlineContext, PollingContext};
pub use queue::{EnqueueOutcome, QueueError, TransactionQueue};
pub(crate) use spec::panic_message;
pub use spec::{
    Priority, StepResult, TransactionBuilder, TransactionHandle, TransactionInfo, TransactionSpec,
};

/// Failure of one queued unit of work. Reported to that unit only.
#[derive(Debug)]
pub enum ExecutionError {
    Store(StoreError),
    Query(QueryError),
    Entity(EntityError),
    Convert(ConvertError),
    Panicked(String),
    Failed(String),
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Query(err) => write!(f, "query error: {err}"),
            Self::Entity(err) => write!(f, "entity error: {err}"),
            Self::Convert(err) => write!(f, "conversion error: {err}"),
            Self::Panicked(message) => write!(f, "unit of work panicked: {message}"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Entity(err) => Some(err),
            Self::Convert(err) => Some(err),
            Self::Panicked(_) | Self::Failed(_) => None,
        }
    }
}

impl From<StoreError> for ExecutionError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}

impl From<QueryError> for ExecutionError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<EntityError> for ExecutionError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

impl From<ConvertError> for ExecutionError {
    fn from(value: ConvertError) -> Self {
        Self::Convert(value)
    }
}
