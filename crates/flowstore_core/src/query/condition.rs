//! Single-predicate value objects.

use crate::convert::Value;

/// Comparison operator of one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    Glob,
    Between,
    In,
    NotIn,
    IsNull,
}

impl Operator {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Glob => "GLOB",
            Self::Between => "BETWEEN",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
        }
    }

    /// Symbolic operators are glued to the column (`a=1`), keywords are not.
    pub fn is_symbolic(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Lt | Self::Lte | Self::Gt | Self::Gte
        )
    }
}

/// Logical connective between a condition and the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Joiner {
    #[default]
    And,
    Or,
    Like,
    Glob,
}

impl Joiner {
    pub fn sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Like => "LIKE",
            Self::Glob => "GLOB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    Binary,
    NoCase,
    RTrim,
}

impl Collation {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Binary => "BINARY",
            Self::NoCase => "NOCASE",
            Self::RTrim => "RTRIM",
        }
    }
}

/// Operand values of one condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Single(Value),
    Range(Value, Value),
    List(Vec<Value>),
    /// Unbound `?` marker filled later by `ConditionBuilder::replace_params`.
    Placeholder,
}

/// One predicate: `column OP operand`, plus the joiner to the next predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    column: String,
    operator: Operator,
    operand: Operand,
    joiner: Option<Joiner>,
    collation: Option<Collation>,
}

impl Condition {
    /// Starts a condition on `name`.
    pub fn column(name: impl Into<String>) -> Column {
        Column { name: name.into() }
    }

    fn new(column: String, operator: Operator, operand: Operand) -> Self {
        Self {
            column,
            operator,
            operand,
            joiner: None,
            collation: None,
        }
    }

    /// Sets how this condition connects to the next one.
    pub fn joiner(mut self, joiner: Joiner) -> Self {
        self.joiner = Some(joiner);
        self
    }

    pub fn collate(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    pub fn column_name(&self) -> &str {
        &self.column
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn joiner_to_next(&self) -> Option<Joiner> {
        self.joiner
    }

    pub fn collation(&self) -> Option<Collation> {
        self.collation
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.operand, Operand::Placeholder)
    }

    /// Returns whether any operand value equals `value`.
    pub fn has_value(&self, value: &Value) -> bool {
        match &self.operand {
            Operand::Single(single) => single == value,
            Operand::Range(low, high) => low == value || high == value,
            Operand::List(values) => values.contains(value),
            Operand::None | Operand::Placeholder => false,
        }
    }

    pub(crate) fn set_joiner(&mut self, joiner: Joiner) {
        self.joiner = Some(joiner);
    }

    /// Rebuilds a placeholder condition with a bound value, keeping joiner
    /// and collation.
    pub(crate) fn bind(&self, value: Value) -> Self {
        Self {
            column: self.column.clone(),
            operator: self.operator,
            operand: Operand::Single(value),
            joiner: self.joiner,
            collation: self.collation,
        }
    }
}

/// Column handle returned by `Condition::column`.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
}

impl Column {
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.single(Operator::Eq, value.into())
    }

    pub fn neq(self, value: impl Into<Value>) -> Condition {
        self.single(Operator::Neq, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.single(Operator::Lt, value.into())
    }

    pub fn lte(self, value: impl Into<Value>) -> Condition {
        self.single(Operator::Lte, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.single(Operator::Gt, value.into())
    }

    pub fn gte(self, value: impl Into<Value>) -> Condition {
        self.single(Operator::Gte, value.into())
    }

    pub fn like(self, pattern: impl Into<Value>) -> Condition {
        self.single(Operator::Like, pattern.into())
    }

    pub fn not_like(self, pattern: impl Into<Value>) -> Condition {
        self.single(Operator::NotLike, pattern.into())
    }

    pub fn glob(self, pattern: impl Into<Value>) -> Condition {
        self.single(Operator::Glob, pattern.into())
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Condition {
        Condition::new(
            self.name,
            Operator::Between,
            Operand::Range(low.into(), high.into()),
        )
    }

    pub fn is_in<I, V>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::new(
            self.name,
            Operator::In,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<I, V>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::new(
            self.name,
            Operator::NotIn,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn is_null(self) -> Condition {
        Condition::new(self.name, Operator::IsNull, Operand::None)
    }

    /// `column=?`, to be bound later.
    pub fn placeholder(self) -> Condition {
        Condition::new(self.name, Operator::Eq, Operand::Placeholder)
    }

    fn single(self, operator: Operator, value: Value) -> Condition {
        Condition::new(self.name, operator, Operand::Single(value))
    }
}
