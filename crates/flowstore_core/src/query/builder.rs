//! Ordered condition sets and their SQL rendering.

use super::condition::{Condition, Joiner, Operand, Operator};
use super::{QueryError, QueryResult};
use crate::convert::{TypeConverterRegistry, Value};
use crate::db::StoredValue;
use std::fmt::{Display, Formatter, Write};

/// Whether a condition set carries literal values or unbound placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Literal,
    Placeholder,
}

impl Display for BindMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal => write!(f, "literal"),
            Self::Placeholder => write!(f, "placeholder"),
        }
    }
}

/// SQL fragment plus the storable values bound to its `?` markers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rendered {
    pub sql: String,
    pub values: Vec<StoredValue>,
}

/// Ordered set of conditions rendered as one `WHERE` fragment.
#[derive(Debug, Clone, Default)]
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    default_joiner: Joiner,
    mode: Option<BindMode>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `conditions` in order.
    ///
    /// # Errors
    /// - `ModeConflict` when literal and placeholder conditions are mixed.
    pub fn with_conditions(conditions: impl IntoIterator<Item = Condition>) -> QueryResult<Self> {
        let mut builder = Self::new();
        for condition in conditions {
            builder.push(condition)?;
        }
        Ok(builder)
    }

    /// Joiner used for conditions that carry none of their own.
    pub fn default_joiner(mut self, joiner: Joiner) -> Self {
        self.default_joiner = joiner;
        self
    }

    /// Appends one condition.
    pub fn push(&mut self, condition: Condition) -> QueryResult<&mut Self> {
        let condition_mode = mode_of(&condition);
        match self.mode {
            Some(set_mode) if set_mode != condition_mode => {
                return Err(QueryError::ModeConflict {
                    set_mode,
                    condition_mode,
                });
            }
            _ => self.mode = Some(condition_mode),
        }
        self.conditions.push(condition);
        Ok(self)
    }

    /// Connects the current last condition to `condition` with `OR`.
    pub fn or(&mut self, condition: Condition) -> QueryResult<&mut Self> {
        self.push_joined(Joiner::Or, condition)
    }

    /// Connects the current last condition to `condition` with `LIKE`.
    pub fn like(&mut self, condition: Condition) -> QueryResult<&mut Self> {
        self.push_joined(Joiner::Like, condition)
    }

    /// Connects the current last condition to `condition` with `GLOB`.
    pub fn glob(&mut self, condition: Condition) -> QueryResult<&mut Self> {
        self.push_joined(Joiner::Glob, condition)
    }

    fn push_joined(&mut self, joiner: Joiner, condition: Condition) -> QueryResult<&mut Self> {
        if self.conditions.is_empty() {
            return Err(QueryError::EmptyConditionSet);
        }
        if let Some(set_mode) = self.mode {
            let condition_mode = mode_of(&condition);
            if set_mode != condition_mode {
                return Err(QueryError::ModeConflict {
                    set_mode,
                    condition_mode,
                });
            }
        }
        if let Some(last) = self.conditions.last_mut() {
            last.set_joiner(joiner);
        }
        self.push(condition)
    }

    pub fn clear(&mut self) {
        self.conditions.clear();
        self.mode = None;
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn mode(&self) -> Option<BindMode> {
        self.mode
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Conditions on `column` (case-sensitive).
    pub fn conditions_matching_column(&self, column: &str) -> Vec<&Condition> {
        self.conditions
            .iter()
            .filter(|condition| condition.column_name() == column)
            .collect()
    }

    /// Conditions carrying `value` (unconverted) as an operand.
    pub fn conditions_matching_value(&self, value: &Value) -> Vec<&Condition> {
        self.conditions
            .iter()
            .filter(|condition| condition.has_value(value))
            .collect()
    }

    /// Renders literals inline: `name='James' OR number=6`.
    ///
    /// Placeholder sets render their `?` markers and bind nothing.
    pub fn render(&self, converters: &TypeConverterRegistry) -> QueryResult<Rendered> {
        self.render_with(|sql, value| {
            let stored = converters.to_storable(value)?;
            write_literal(sql, &stored);
            Ok(())
        })
    }

    /// Renders `?` markers and returns the converted values in bind order.
    pub fn render_bound(&self, converters: &TypeConverterRegistry) -> QueryResult<Rendered> {
        let mut values = Vec::new();
        let mut rendered = self.render_with(|sql, value| {
            values.push(converters.to_storable(value)?);
            sql.push('?');
            Ok(())
        })?;
        rendered.values = values;
        Ok(rendered)
    }

    /// Renders without type conversion, for diagnostics.
    pub fn raw(&self) -> String {
        self.render_with(|sql, value| {
            write_raw(sql, value);
            Ok(())
        })
        .map(|rendered| rendered.sql)
        .unwrap_or_default()
    }

    /// Fills placeholders positionally and returns a literal-mode set.
    ///
    /// # Errors
    /// - `NotPlaceholderMode` when the set holds literal conditions.
    /// - `ArityMismatch` when `values.len()` differs from the placeholder count.
    pub fn replace_params(&self, values: Vec<Value>) -> QueryResult<Self> {
        if self.mode != Some(BindMode::Placeholder) {
            return Err(QueryError::NotPlaceholderMode);
        }
        if values.len() != self.conditions.len() {
            return Err(QueryError::ArityMismatch {
                expected: self.conditions.len(),
                found: values.len(),
            });
        }

        let mut literal = Self::new().default_joiner(self.default_joiner);
        for (condition, value) in self.conditions.iter().zip(values) {
            literal.push(condition.bind(value))?;
        }
        Ok(literal)
    }

    fn render_with<F>(&self, mut write_value: F) -> QueryResult<Rendered>
    where
        F: FnMut(&mut String, &Value) -> QueryResult<()>,
    {
        let mut sql = String::new();
        let last = self.conditions.len().saturating_sub(1);

        for (index, condition) in self.conditions.iter().enumerate() {
            write_condition(&mut sql, condition, &mut write_value)?;
            if index < last {
                let joiner = condition.joiner_to_next().unwrap_or(self.default_joiner);
                sql.push(' ');
                sql.push_str(joiner.sql());
                sql.push(' ');
            }
        }

        Ok(Rendered {
            sql,
            values: Vec::new(),
        })
    }
}

fn mode_of(condition: &Condition) -> BindMode {
    if condition.is_placeholder() {
        BindMode::Placeholder
    } else {
        BindMode::Literal
    }
}

fn write_condition<F>(sql: &mut String, condition: &Condition, write_value: &mut F) -> QueryResult<()>
where
    F: FnMut(&mut String, &Value) -> QueryResult<()>,
{
    let operator = condition.operator();
    sql.push_str(condition.column_name());
    if operator.is_symbolic() {
        sql.push_str(operator.sql());
    } else {
        sql.push(' ');
        sql.push_str(operator.sql());
    }

    match condition.operand() {
        Operand::None => {}
        Operand::Placeholder => {
            if !operator.is_symbolic() {
                sql.push(' ');
            }
            sql.push('?');
        }
        Operand::Single(value) => {
            if !operator.is_symbolic() {
                sql.push(' ');
            }
            write_value(sql, value)?;
        }
        Operand::Range(low, high) => {
            sql.push(' ');
            write_value(sql, low)?;
            sql.push_str(" AND ");
            write_value(sql, high)?;
        }
        Operand::List(values) => {
            sql.push_str(" (");
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    sql.push(',');
                }
                write_value(sql, value)?;
            }
            sql.push(')');
        }
    }

    if let Some(collation) = condition.collation() {
        sql.push_str(" COLLATE ");
        sql.push_str(collation.sql());
    }
    Ok(())
}

fn write_literal(sql: &mut String, stored: &StoredValue) {
    match stored {
        StoredValue::Null => sql.push_str("NULL"),
        StoredValue::Integer(number) => {
            let _ = write!(sql, "{number}");
        }
        StoredValue::Real(number) if number.is_finite() => {
            let _ = write!(sql, "{number:?}");
        }
        // SQLite has no literal for NaN or infinity and binds them as NULL.
        StoredValue::Real(_) => sql.push_str("NULL"),
        StoredValue::Text(text) => push_quoted(sql, text),
        StoredValue::Blob(bytes) => {
            sql.push_str("X'");
            for byte in bytes {
                let _ = write!(sql, "{byte:02X}");
            }
            sql.push('\'');
        }
    }
}

fn write_raw(sql: &mut String, value: &Value) {
    match value {
        Value::Null => sql.push_str("NULL"),
        Value::Bool(flag) => {
            let _ = write!(sql, "{flag}");
        }
        Value::Integer(number) => {
            let _ = write!(sql, "{number}");
        }
        Value::Real(number) => {
            let _ = write!(sql, "{number:?}");
        }
        Value::Text(text) => push_quoted(sql, text),
        Value::Blob(bytes) => {
            let _ = write!(sql, "<{} bytes>", bytes.len());
        }
        Value::Uuid(id) => push_quoted(sql, &id.to_string()),
        Value::Custom(custom) => {
            let _ = write!(sql, "<{}>", custom.type_name());
        }
    }
}

/// SQL string escaping: wrap in single quotes, double embedded quotes.
fn push_quoted(sql: &mut String, text: &str) {
    sql.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            sql.push('\'');
        }
        sql.push(ch);
    }
    sql.push('\'');
}

#[cfg(test)]
mod tests {
    use super::{BindMode, ConditionBuilder};
    use crate::convert::{TypeConverterRegistry, Value};
    use crate::query::{Condition, QueryError};

    #[test]
    fn raw_skips_conversion() {
        let builder = ConditionBuilder::with_conditions([
            Condition::column("done").eq(true),
            Condition::column("title").eq("it's"),
        ])
        .expect("literal set");
        assert_eq!(builder.raw(), "done=true AND title='it''s'");

        let registry = TypeConverterRegistry::new();
        let rendered = builder.render(&registry).expect("render");
        assert_eq!(rendered.sql, "done=1 AND title='it''s'");
    }

    #[test]
    fn real_literals_keep_their_type() {
        let builder = ConditionBuilder::with_conditions([
            Condition::column("fraction").eq(6.0),
            Condition::column("ratio").lt(f64::NAN),
            Condition::column("ceiling").gt(f64::INFINITY),
        ])
        .expect("literal set");

        let rendered = builder
            .render(&TypeConverterRegistry::new())
            .expect("render");
        assert_eq!(rendered.sql, "fraction=6.0 AND ratio<NULL AND ceiling>NULL");
        assert!(builder.raw().starts_with("fraction=6.0 AND"));
    }

    #[test]
    fn clear_resets_mode() {
        let mut builder = ConditionBuilder::new();
        builder
            .push(Condition::column("id").placeholder())
            .expect("placeholder");
        assert_eq!(builder.mode(), Some(BindMode::Placeholder));

        builder.clear();
        assert_eq!(builder.mode(), None);
        builder
            .push(Condition::column("id").eq(1))
            .expect("literal after clear");
    }

    #[test]
    fn or_on_empty_set_is_rejected() {
        let mut builder = ConditionBuilder::new();
        let err = builder
            .or(Condition::column("id").eq(1))
            .expect_err("no previous condition");
        assert_eq!(err, QueryError::EmptyConditionSet);
        assert!(builder.is_empty());
    }

    #[test]
    fn matching_helpers_filter_by_column_and_value() {
        let builder = ConditionBuilder::with_conditions([
            Condition::column("name").eq("James"),
            Condition::column("age").between(10, 20),
            Condition::column("name").neq("Bob"),
        ])
        .expect("literal set");

        assert_eq!(builder.conditions_matching_column("name").len(), 2);
        assert_eq!(
            builder
                .conditions_matching_value(&Value::Integer(20))
                .len(),
            1
        );
    }
}
