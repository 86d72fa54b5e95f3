//! Condition value objects and the builder that renders them to SQL.
//!
//! # Responsibility
//! - Describe single predicates (`Condition`) and ordered sets of them.
//! - Render condition sets into SQL fragments with type conversion applied.
//!
//! # Invariants
//! - A condition set is either fully literal or fully placeholder.
//! - The joiner attached to condition `i` connects it to condition `i + 1`;
//!   the last condition's joiner is never emitted.

use crate::convert::ConvertError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod builder;
pub mod condition;

pub use builder::{BindMode, ConditionBuilder, Rendered};
pub use condition::{Collation, Column, Condition, Joiner, Operand, Operator};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    ModeConflict { set_mode: BindMode, condition_mode: BindMode },
    ArityMismatch { expected: usize, found: usize },
    NotPlaceholderMode,
    EmptyConditionSet,
    UnboundPlaceholders { count: usize },
    Convert(ConvertError),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModeConflict {
                set_mode,
                condition_mode,
            } => write!(
                f,
                "cannot add a {condition_mode} condition to a {set_mode} condition set"
            ),
            Self::ArityMismatch { expected, found } => write!(
                f,
                "placeholder count mismatch: expected {expected} values, got {found}"
            ),
            Self::NotPlaceholderMode => {
                write!(f, "condition set is not operating in placeholder mode")
            }
            Self::EmptyConditionSet => {
                write!(f, "no previous condition to attach a joiner to")
            }
            Self::UnboundPlaceholders { count } => write!(
                f,
                "condition set still has {count} unbound placeholders; call replace_params first"
            ),
            Self::Convert(err) => write!(f, "{err}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Convert(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConvertError> for QueryError {
    fn from(value: ConvertError) -> Self {
        Self::Convert(value)
    }
}
