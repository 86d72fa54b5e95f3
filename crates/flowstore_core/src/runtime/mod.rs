//! Coordinator: routes operations to queues and wires cache and
//! notification updates around their execution.
//!
//! # Responsibility
//! - Turn fetch/save/update/delete requests into transaction specs.
//! - Own the shared queue plus any per-entity dedicated queues.
//! - Update the model cache and dispatch change events after commit, on the
//!   worker that ran the unit.
//!
//! # Invariants
//! - Builder-level errors (mode conflicts, unbound placeholders, key arity,
//!   value conversion) surface from the operation call, before enqueue.
//! - The coordinator holds no global state; embedders construct and pass it.

use crate::model::EntityError;
use crate::query::QueryError;
use crate::transaction::QueueError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod config;
mod coordinator;
mod pending;

pub use config::{ConfigError, CoordinatorConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_SHARED_QUEUE_NAME};
pub use coordinator::{Coordinator, Saved};
pub use pending::PendingOperation;

#[derive(Debug)]
pub enum CoordinatorError {
    Config(ConfigError),
    Queue(QueueError),
    Query(QueryError),
    Entity(EntityError),
    /// The target queue no longer accepts work.
    ShutDown,
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Queue(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "invalid query: {err}"),
            Self::Entity(err) => write!(f, "{err}"),
            Self::ShutDown => write!(f, "coordinator is shut down"),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Queue(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Entity(err) => Some(err),
            Self::ShutDown => None,
        }
    }
}

impl From<ConfigError> for CoordinatorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<QueueError> for CoordinatorError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

impl From<QueryError> for CoordinatorError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<EntityError> for CoordinatorError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}
