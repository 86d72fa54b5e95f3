//! Entity metadata consumed by the coordinator.
//!
//! # Responsibility
//! - Describe how an entity type maps to a table through an explicitly
//!   registered accessor table.
//!
//! # Invariants
//! - Every entity type has at least one primary-key column.
//! - Table and column names are plain SQL identifiers; they are spliced into
//!   statements unquoted.

use crate::convert::ConvertError;
use crate::query::QueryError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity;

pub use entity::{ColumnAccessor, Entity, EntityDescriptor, Getter, Setter};

pub type EntityResult<T> = Result<T, EntityError>;

#[derive(Debug, Clone, PartialEq)]
pub enum EntityError {
    InvalidDescriptor(String),
    MissingPrimaryKey { table: &'static str },
    PrimaryKeyArity { table: &'static str, expected: usize, found: usize },
    MissingColumn { table: &'static str, column: &'static str },
    RowNotFound { table: &'static str },
    Convert(ConvertError),
    Query(QueryError),
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDescriptor(message) => write!(f, "invalid entity descriptor: {message}"),
            Self::MissingPrimaryKey { table } => {
                write!(f, "entity `{table}` declares no primary-key column")
            }
            Self::PrimaryKeyArity {
                table,
                expected,
                found,
            } => write!(
                f,
                "entity `{table}` has {expected} primary-key columns, got {found} values"
            ),
            Self::MissingColumn { table, column } => {
                write!(f, "result row for `{table}` lacks column `{column}`")
            }
            Self::RowNotFound { table } => {
                write!(f, "no `{table}` row matches the primary key")
            }
            Self::Convert(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EntityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Convert(err) => Some(err),
            Self::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConvertError> for EntityError {
    fn from(value: ConvertError) -> Self {
        Self::Convert(value)
    }
}

impl From<QueryError> for EntityError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}
