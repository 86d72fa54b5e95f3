//! Logical values and their conversion to storable form.
//!
//! # Responsibility
//! - Define `Value`, the typed operand used by conditions and entity
//!   accessors.
//! - Map logical values to `StoredValue` and back via
//!   `TypeConverterRegistry`.
//!
//! # Invariants
//! - `Value::Null` converts to and from SQL `NULL` for every logical type.
//! - Custom values are only storable when a converter for their Rust type is
//!   registered.

use std::any::{Any, TypeId};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

mod registry;

pub use registry::{TypeConverter, TypeConverterRegistry};

pub type ConvertResult<T> = Result<T, ConvertError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    NoConverter { type_name: &'static str },
    Mismatch { expected: &'static str, found: String },
    Invalid(String),
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoConverter { type_name } => {
                write!(f, "no type converter registered for `{type_name}`")
            }
            Self::Mismatch { expected, found } => {
                write!(f, "expected {expected} value, found {found}")
            }
            Self::Invalid(message) => write!(f, "invalid value: {message}"),
        }
    }
}

impl Error for ConvertError {}

/// Logical type tag of a `Value`, used to pick a conversion when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Bool,
    Integer,
    Real,
    Text,
    Blob,
    Uuid,
    Custom { id: TypeId, name: &'static str },
}

impl LogicalType {
    pub fn custom<T: Any>() -> Self {
        Self::Custom {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Uuid => "uuid",
            Self::Custom { name, .. } => name,
        }
    }
}

/// Type-erased payload of a user-defined logical type.
///
/// Equality is identity of the shared payload.
#[derive(Clone)]
pub struct CustomValue {
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            payload: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn payload_type_id(&self) -> TypeId {
        self.payload.as_ref().type_id()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub(crate) fn payload(&self) -> &(dyn Any + Send + Sync) {
        self.payload.as_ref()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl Debug for CustomValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CustomValue({})", self.type_name)
    }
}

/// Typed operand or column value before conversion to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Custom(CustomValue),
}

impl Value {
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Self::Custom(CustomValue::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short description used in mismatch errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Integer(_) => "integer".to_string(),
            Self::Real(_) => "real".to_string(),
            Self::Text(_) => "text".to_string(),
            Self::Blob(_) => "blob".to_string(),
            Self::Uuid(_) => "uuid".to_string(),
            Self::Custom(custom) => custom.type_name().to_string(),
        }
    }

    pub fn as_integer(&self) -> ConvertResult<i64> {
        match self {
            Self::Integer(value) => Ok(*value),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_real(&self) -> ConvertResult<f64> {
        match self {
            Self::Real(value) => Ok(*value),
            Self::Integer(value) => Ok(*value as f64),
            other => Err(mismatch("real", other)),
        }
    }

    pub fn as_bool(&self) -> ConvertResult<bool> {
        match self {
            Self::Bool(value) => Ok(*value),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_uuid(&self) -> ConvertResult<Uuid> {
        match self {
            Self::Uuid(value) => Ok(*value),
            other => Err(mismatch("uuid", other)),
        }
    }

    pub fn into_text(self) -> ConvertResult<String> {
        match self {
            Self::Text(value) => Ok(value),
            other => Err(mismatch("text", &other)),
        }
    }

    pub fn into_blob(self) -> ConvertResult<Vec<u8>> {
        match self {
            Self::Blob(value) => Ok(value),
            other => Err(mismatch("blob", &other)),
        }
    }

    /// Clones a custom payload of type `T` out of this value.
    pub fn to_custom<T: Any + Clone>(&self) -> ConvertResult<T> {
        match self {
            Self::Custom(custom) => custom.downcast_ref::<T>().cloned().ok_or_else(|| {
                ConvertError::Mismatch {
                    expected: std::any::type_name::<T>(),
                    found: custom.type_name().to_string(),
                }
            }),
            other => Err(mismatch(std::any::type_name::<T>(), other)),
        }
    }

    /// Optional accessor helpers: `Null` maps to `None`.
    pub fn as_optional_integer(&self) -> ConvertResult<Option<i64>> {
        match self {
            Self::Null => Ok(None),
            other => other.as_integer().map(Some),
        }
    }

    pub fn into_optional_text(self) -> ConvertResult<Option<String>> {
        match self {
            Self::Null => Ok(None),
            other => other.into_text().map(Some),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> ConvertError {
    ConvertError::Mismatch {
        expected,
        found: found.describe(),
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
