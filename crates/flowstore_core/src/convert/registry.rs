//! Converter registry mapping logical values to storable values and back.

use super::{ConvertError, ConvertResult, CustomValue, LogicalType, Value};
use crate::db::StoredValue;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Typed conversion between a Rust model type and its stored form.
pub trait TypeConverter: Send + Sync + 'static {
    type Model: Any + Send + Sync;

    fn to_storable(&self, model: &Self::Model) -> StoredValue;
    fn from_storable(&self, stored: StoredValue) -> ConvertResult<Self::Model>;
}

trait ErasedConverter: Send + Sync {
    fn to_storable(&self, payload: &(dyn Any + Send + Sync)) -> ConvertResult<StoredValue>;
    fn from_storable(&self, stored: StoredValue) -> ConvertResult<Value>;
}

struct Erased<C>(C);

impl<C: TypeConverter> ErasedConverter for Erased<C> {
    fn to_storable(&self, payload: &(dyn Any + Send + Sync)) -> ConvertResult<StoredValue> {
        payload
            .downcast_ref::<C::Model>()
            .map(|model| self.0.to_storable(model))
            .ok_or(ConvertError::NoConverter {
                type_name: std::any::type_name::<C::Model>(),
            })
    }

    fn from_storable(&self, stored: StoredValue) -> ConvertResult<Value> {
        self.0
            .from_storable(stored)
            .map(|model| Value::Custom(CustomValue::new(model)))
    }
}

/// Registry of converters consulted by condition rendering and entity IO.
///
/// Built-in logical types (`bool`, `uuid`, and the SQLite-native kinds) need
/// no registration. Built once at startup and shared read-only.
#[derive(Clone, Default)]
pub struct TypeConverterRegistry {
    custom: HashMap<TypeId, Arc<dyn ErasedConverter>>,
}

impl TypeConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the converter for `C::Model`.
    pub fn register<C: TypeConverter>(&mut self, converter: C) -> &mut Self {
        self.custom
            .insert(TypeId::of::<C::Model>(), Arc::new(Erased(converter)));
        self
    }

    pub fn has_converter<T: Any>(&self) -> bool {
        self.custom.contains_key(&TypeId::of::<T>())
    }

    /// Converts one logical value into its storable representation.
    pub fn to_storable(&self, value: &Value) -> ConvertResult<StoredValue> {
        Ok(match value {
            Value::Null => StoredValue::Null,
            Value::Bool(flag) => StoredValue::Integer(i64::from(*flag)),
            Value::Integer(number) => StoredValue::Integer(*number),
            Value::Real(number) => StoredValue::Real(*number),
            Value::Text(text) => StoredValue::Text(text.clone()),
            Value::Blob(bytes) => StoredValue::Blob(bytes.clone()),
            Value::Uuid(id) => StoredValue::Text(id.hyphenated().to_string()),
            Value::Custom(custom) => {
                let converter = self.custom.get(&custom.payload_type_id()).ok_or(
                    ConvertError::NoConverter {
                        type_name: custom.type_name(),
                    },
                )?;
                converter.to_storable(custom.payload())?
            }
        })
    }

    /// Reads a stored value back as the requested logical type.
    pub fn from_storable(&self, stored: StoredValue, target: LogicalType) -> ConvertResult<Value> {
        if matches!(stored, StoredValue::Null) {
            return Ok(Value::Null);
        }

        match (target, stored) {
            (LogicalType::Integer, StoredValue::Integer(number)) => Ok(Value::Integer(number)),
            (LogicalType::Real, StoredValue::Real(number)) => Ok(Value::Real(number)),
            (LogicalType::Real, StoredValue::Integer(number)) => Ok(Value::Real(number as f64)),
            (LogicalType::Text, StoredValue::Text(text)) => Ok(Value::Text(text)),
            (LogicalType::Blob, StoredValue::Blob(bytes)) => Ok(Value::Blob(bytes)),
            (LogicalType::Bool, StoredValue::Integer(0)) => Ok(Value::Bool(false)),
            (LogicalType::Bool, StoredValue::Integer(1)) => Ok(Value::Bool(true)),
            (LogicalType::Bool, StoredValue::Integer(other)) => Err(ConvertError::Invalid(
                format!("bool column holds `{other}`, expected 0 or 1"),
            )),
            (LogicalType::Uuid, StoredValue::Text(text)) => Uuid::parse_str(&text)
                .map(Value::Uuid)
                .map_err(|_| ConvertError::Invalid(format!("invalid uuid text `{text}`"))),
            (LogicalType::Uuid, StoredValue::Blob(bytes)) => Uuid::from_slice(&bytes)
                .map(Value::Uuid)
                .map_err(|_| ConvertError::Invalid("uuid blob must be 16 bytes".to_string())),
            (LogicalType::Custom { id, name }, stored) => self
                .custom
                .get(&id)
                .ok_or(ConvertError::NoConverter { type_name: name })?
                .from_storable(stored),
            (target, stored) => Err(ConvertError::Mismatch {
                expected: target.name(),
                found: describe_stored(&stored).to_string(),
            }),
        }
    }
}

fn describe_stored(stored: &StoredValue) -> &'static str {
    match stored {
        StoredValue::Null => "null",
        StoredValue::Integer(_) => "integer",
        StoredValue::Real(_) => "real",
        StoredValue::Text(_) => "text",
        StoredValue::Blob(_) => "blob",
    }
}
