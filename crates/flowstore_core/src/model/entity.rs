//! Statically registered entity metadata.
//!
//! Each entity type exposes one `EntityDescriptor` built once at startup: an
//! accessor table of typed getter/setter function pointers per column. The
//! descriptor produces the primary-key signature, the primary-key condition
//! set, the mutation statements and row loading.

use super::{EntityError, EntityResult};
use crate::cache::PkSignature;
use crate::convert::{ConvertResult, LogicalType, TypeConverterRegistry, Value};
use crate::db::{StoredRow, StoredValue};
use crate::query::{Condition, ConditionBuilder, Rendered};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::HashSet;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

pub(crate) fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

pub type Getter<E> = fn(&E) -> Value;
pub type Setter<E> = fn(&mut E, Value) -> ConvertResult<()>;

/// A persisted model type with a registered accessor table.
pub trait Entity: Default + Clone + Send + Sync + 'static {
    fn descriptor() -> &'static EntityDescriptor<Self>;

    /// Table name, also used as the entity type identifier.
    fn table() -> &'static str {
        Self::descriptor().table()
    }
}

/// Typed accessors for one column.
pub struct ColumnAccessor<E> {
    name: &'static str,
    logical_type: LogicalType,
    primary_key: bool,
    get: Getter<E>,
    set: Setter<E>,
}

impl<E> ColumnAccessor<E> {
    pub fn new(name: &'static str, logical_type: LogicalType, get: Getter<E>, set: Setter<E>) -> Self {
        Self {
            name,
            logical_type,
            primary_key: false,
            get,
            set,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }
}

/// Table metadata and accessor table of one entity type.
pub struct EntityDescriptor<E> {
    table: &'static str,
    columns: Vec<ColumnAccessor<E>>,
    cacheable: bool,
    validated: OnceCell<Result<(), EntityError>>,
}

impl<E: Entity> EntityDescriptor<E> {
    pub fn new(table: &'static str, columns: Vec<ColumnAccessor<E>>) -> Self {
        Self {
            table,
            columns,
            cacheable: true,
            validated: OnceCell::new(),
        }
    }

    /// Opts this entity type out of the model cache.
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn columns(&self) -> &[ColumnAccessor<E>] {
        &self.columns
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn primary_columns(&self) -> impl Iterator<Item = &ColumnAccessor<E>> {
        self.columns.iter().filter(|column| column.primary_key)
    }

    /// Checks identifiers and primary-key presence once; later calls return
    /// the memoized outcome.
    pub fn validate(&self) -> EntityResult<()> {
        self.validated
            .get_or_init(|| self.check_definition())
            .clone()
    }

    fn check_definition(&self) -> EntityResult<()> {
        if !IDENTIFIER_RE.is_match(self.table) {
            return Err(EntityError::InvalidDescriptor(format!(
                "table name `{}` is not a plain SQL identifier",
                self.table
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !IDENTIFIER_RE.is_match(column.name) {
                return Err(EntityError::InvalidDescriptor(format!(
                    "column `{}.{}` is not a plain SQL identifier",
                    self.table, column.name
                )));
            }
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(EntityError::InvalidDescriptor(format!(
                    "column `{}.{}` is declared twice",
                    self.table, column.name
                )));
            }
        }

        if self.primary_columns().next().is_none() {
            return Err(EntityError::MissingPrimaryKey { table: self.table });
        }
        Ok(())
    }

    pub fn primary_key_values(&self, entity: &E) -> Vec<Value> {
        self.primary_columns()
            .map(|column| (column.get)(entity))
            .collect()
    }

    /// Storable primary-key tuple used as the cache key.
    pub fn primary_key_signature(
        &self,
        entity: &E,
        converters: &TypeConverterRegistry,
    ) -> EntityResult<PkSignature> {
        self.signature_of(&self.primary_key_values(entity), converters)
    }

    /// Signature for caller-supplied primary-key values, in column order.
    pub fn signature_of(
        &self,
        values: &[Value],
        converters: &TypeConverterRegistry,
    ) -> EntityResult<PkSignature> {
        let expected = self.primary_columns().count();
        if values.len() != expected {
            return Err(EntityError::PrimaryKeyArity {
                table: self.table,
                expected,
                found: values.len(),
            });
        }
        let stored = values
            .iter()
            .map(|value| converters.to_storable(value))
            .collect::<ConvertResult<Vec<StoredValue>>>()?;
        Ok(PkSignature::new(&stored))
    }

    /// Literal `pk=value AND ...` set for one entity.
    pub fn primary_conditions(&self, entity: &E) -> EntityResult<ConditionBuilder> {
        self.conditions_for_key(self.primary_key_values(entity))
    }

    /// Literal `pk=value AND ...` set for caller-supplied key values.
    pub fn conditions_for_key(&self, values: Vec<Value>) -> EntityResult<ConditionBuilder> {
        self.primary_key_template()
            .replace_params(values)
            .map_err(EntityError::from)
    }

    /// Placeholder set `pk=? AND ...` over every primary-key column.
    pub fn primary_key_template(&self) -> ConditionBuilder {
        let mut template = ConditionBuilder::new();
        for column in self.primary_columns() {
            // Placeholder-only sets cannot conflict.
            let _ = template.push(Condition::column(column.name).placeholder());
        }
        template
    }

    pub fn select_sql(&self, where_sql: &str, limit: Option<u32>) -> String {
        let mut sql = format!("SELECT * FROM {}", self.table);
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_sql);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    pub fn insert_statement(
        &self,
        entity: &E,
        converters: &TypeConverterRegistry,
    ) -> EntityResult<Rendered> {
        let names: Vec<&str> = self.columns.iter().map(|column| column.name).collect();
        let markers = vec!["?"; names.len()].join(", ");
        let values = self
            .columns
            .iter()
            .map(|column| converters.to_storable(&(column.get)(entity)))
            .collect::<ConvertResult<Vec<_>>>()?;

        Ok(Rendered {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table,
                names.join(", "),
                markers
            ),
            values,
        })
    }

    pub fn update_statement(
        &self,
        entity: &E,
        converters: &TypeConverterRegistry,
    ) -> EntityResult<Rendered> {
        let mut assigned: Vec<&ColumnAccessor<E>> = self
            .columns
            .iter()
            .filter(|column| !column.primary_key)
            .collect();
        if assigned.is_empty() {
            assigned = self.columns.iter().collect();
        }

        let assignments: Vec<String> = assigned
            .iter()
            .map(|column| format!("{}=?", column.name))
            .collect();
        let mut values = assigned
            .iter()
            .map(|column| converters.to_storable(&(column.get)(entity)))
            .collect::<ConvertResult<Vec<_>>>()?;

        let key = self.primary_conditions(entity)?.render_bound(converters)?;
        values.extend(key.values);

        Ok(Rendered {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                self.table,
                assignments.join(", "),
                key.sql
            ),
            values,
        })
    }

    pub fn delete_statement(
        &self,
        entity: &E,
        converters: &TypeConverterRegistry,
    ) -> EntityResult<Rendered> {
        let key = self.primary_conditions(entity)?.render_bound(converters)?;
        Ok(Rendered {
            sql: format!("DELETE FROM {} WHERE {}", self.table, key.sql),
            values: key.values,
        })
    }

    pub fn exists_statement(
        &self,
        entity: &E,
        converters: &TypeConverterRegistry,
    ) -> EntityResult<Rendered> {
        let key = self.primary_conditions(entity)?.render_bound(converters)?;
        Ok(Rendered {
            sql: format!("SELECT 1 FROM {} WHERE {} LIMIT 1", self.table, key.sql),
            values: key.values,
        })
    }

    /// Cache signature read straight from a result row.
    pub fn signature_from_row(&self, row: &StoredRow) -> EntityResult<PkSignature> {
        let mut parts = Vec::new();
        for column in self.primary_columns() {
            let value = row.get(column.name).ok_or(EntityError::MissingColumn {
                table: self.table,
                column: column.name,
            })?;
            parts.push(value);
        }
        Ok(PkSignature::new(parts))
    }

    /// Materializes an entity from a row; columns absent from the row keep
    /// their default values.
    pub fn load(&self, row: &StoredRow, converters: &TypeConverterRegistry) -> EntityResult<E> {
        let mut entity = E::default();
        for column in &self.columns {
            let Some(stored) = row.get(column.name) else {
                continue;
            };
            let value = converters.from_storable(stored.clone(), column.logical_type)?;
            (column.set)(&mut entity, value)?;
        }
        Ok(entity)
    }
}
