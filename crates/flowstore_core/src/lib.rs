//! Client-side data-access runtime over an embedded SQLite store.
//!
//! Operations enter as prioritized units of work, run serialized on a queue
//! worker, then update the model cache and notify change listeners before
//! their result is delivered through a completion context.

pub mod cache;
pub mod convert;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod query;
pub mod runtime;
pub mod transaction;

pub use cache::{ModelCache, PkSignature};
pub use convert::{ConvertError, LogicalType, TypeConverter, TypeConverterRegistry, Value};
pub use db::{open_store, open_store_in_memory, share, SharedStore, SqliteStore, Store, StoreError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{ColumnAccessor, Entity, EntityDescriptor, EntityError};
pub use notify::{ChangeAction, ChangeEvent, ChangeListener, ChangeNotifier, Subscription};
pub use query::{BindMode, Condition, ConditionBuilder, Joiner, QueryError};
pub use runtime::{ConfigError, Coordinator, CoordinatorConfig, CoordinatorError, PendingOperation, Saved};
pub use transaction::{
    CallbackExecutor, CompletionContext, EnqueueOutcome, ExecutionError, InlineContext,
    PollingContext, Priority, TransactionHandle, TransactionInfo, TransactionQueue,
    TransactionSpec,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
