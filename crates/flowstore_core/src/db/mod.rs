//! Store abstraction consumed by the scheduling core.
//!
//! # Responsibility
//! - Define the connection-level contract (`execute`, transaction control)
//!   that queue workers drive.
//! - Provide the SQLite-backed implementation and its bootstrap helpers.
//!
//! # Invariants
//! - A `Store` is driven by at most one worker at a time (`SharedStore` is a
//!   mutex-guarded handle).
//! - Storable values are `rusqlite::types::Value`; logical values are
//!   converted before they reach a store.
//!
//! # See also
//! - `transaction::queue` for the worker that drives stores.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

mod open;
mod sqlite_store;

pub use open::{open_store, open_store_in_memory};
pub use sqlite_store::SqliteStore;

/// Value representation accepted and produced by stores.
pub type StoredValue = rusqlite::types::Value;

/// Mutex-guarded store handle shared between a coordinator and its queues.
pub type SharedStore = Arc<Mutex<dyn Store>>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Poisoned,
    UnexpectedOutput(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Poisoned => write!(f, "store handle poisoned by a panicking worker"),
            Self::UnexpectedOutput(expected) => {
                write!(f, "unexpected store output; expected {expected}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Poisoned | Self::UnexpectedOutput(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One result row with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    columns: Arc<[String]>,
    values: Vec<StoredValue>,
}

impl StoredRow {
    pub fn new(columns: Arc<[String]>, values: Vec<StoredValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[StoredValue] {
        &self.values
    }

    /// Returns the value stored under `column` (case-insensitive, like SQLite).
    pub fn get(&self, column: &str) -> Option<&StoredValue> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .and_then(|index| self.values.get(index))
    }
}

/// Output of one `Store::execute` call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutput {
    Rows(Vec<StoredRow>),
    RowCount(usize),
}

impl StoreOutput {
    pub fn into_rows(self) -> StoreResult<Vec<StoredRow>> {
        match self {
            Self::Rows(rows) => Ok(rows),
            Self::RowCount(_) => Err(StoreError::UnexpectedOutput("rows")),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::RowCount(count) => *count,
        }
    }
}

/// Connection/statement contract driven by queue workers.
pub trait Store: Send {
    /// Runs one statement with positional bound values.
    fn execute(&mut self, sql: &str, bound: &[StoredValue]) -> StoreResult<StoreOutput>;

    /// Runs a batch of statements without bound values (schema setup, pragmas).
    fn execute_batch(&mut self, sql: &str) -> StoreResult<()>;

    fn begin(&mut self) -> StoreResult<()>;
    fn commit(&mut self) -> StoreResult<()>;
    fn rollback(&mut self) -> StoreResult<()>;
}

/// Wraps a concrete store into a `SharedStore` handle.
pub fn share<S: Store + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}
