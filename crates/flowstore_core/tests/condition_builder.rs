use flowstore_core::convert::{ConvertResult, TypeConverter};
use flowstore_core::db::StoredValue;
use flowstore_core::query::{Collation, Operand};
use flowstore_core::{
    BindMode, Condition, ConditionBuilder, Joiner, QueryError, TypeConverterRegistry, Value,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
struct Celsius(f64);

struct CelsiusConverter;

impl TypeConverter for CelsiusConverter {
    type Model = Celsius;

    fn to_storable(&self, model: &Celsius) -> StoredValue {
        StoredValue::Real(model.0)
    }

    fn from_storable(&self, stored: StoredValue) -> ConvertResult<Celsius> {
        match stored {
            StoredValue::Real(value) => Ok(Celsius(value)),
            _ => Err(flowstore_core::ConvertError::Invalid(
                "celsius must be real".to_string(),
            )),
        }
    }
}

#[test]
fn renders_mixed_joiners_in_order() {
    let builder = ConditionBuilder::with_conditions([
        Condition::column("name").eq("James").joiner(Joiner::Or),
        Condition::column("number").eq(6).joiner(Joiner::And),
        Condition::column("fraction").eq(4.5).joiner(Joiner::And),
    ])
    .unwrap();

    let rendered = builder.render(&TypeConverterRegistry::new()).unwrap();
    assert_eq!(rendered.sql, "name='James' OR number=6 AND fraction=4.5");
    assert!(rendered.values.is_empty());
}

#[test]
fn joiner_of_each_condition_precedes_the_next_and_last_is_never_emitted() {
    let joiners = [Joiner::Or, Joiner::And, Joiner::Glob, Joiner::Like, Joiner::Or];
    let registry = TypeConverterRegistry::new();

    for count in 1..=joiners.len() {
        let conditions = (0..count).map(|index| {
            Condition::column(format!("c{index}"))
                .eq(index as i64)
                .joiner(joiners[index])
        });
        let builder = ConditionBuilder::with_conditions(conditions).unwrap();
        let sql = builder.render(&registry).unwrap().sql;

        let mut expected = String::new();
        for index in 0..count {
            expected.push_str(&format!("c{index}={index}"));
            if index + 1 < count {
                expected.push_str(&format!(" {} ", joiners[index].sql()));
            }
        }
        assert_eq!(sql, expected);
    }
}

#[test]
fn default_joiner_fills_conditions_without_their_own() {
    let builder = ConditionBuilder::with_conditions([
        Condition::column("a").eq(1),
        Condition::column("b").eq(2),
    ])
    .unwrap()
    .default_joiner(Joiner::Or);

    let sql = builder.render(&TypeConverterRegistry::new()).unwrap().sql;
    assert_eq!(sql, "a=1 OR b=2");
}

#[test]
fn or_attaches_joiner_to_the_previous_condition() {
    let mut builder = ConditionBuilder::new();
    builder.push(Condition::column("a").eq(1)).unwrap();
    builder.or(Condition::column("b").eq(2)).unwrap();
    builder.push(Condition::column("c").eq(3)).unwrap();

    let sql = builder.render(&TypeConverterRegistry::new()).unwrap().sql;
    assert_eq!(sql, "a=1 OR b=2 AND c=3");
}

#[test]
fn expands_multi_value_operators_and_collation() {
    let builder = ConditionBuilder::with_conditions([
        Condition::column("number").between(5, 10),
        Condition::column("id").is_in([1, 2]),
        Condition::column("kind").not_in(["a", "b"]),
        Condition::column("name")
            .eq("James")
            .collate(Collation::NoCase),
        Condition::column("deleted_at").is_null(),
        Condition::column("title").like("%draft%"),
    ])
    .unwrap();

    let sql = builder.render(&TypeConverterRegistry::new()).unwrap().sql;
    assert_eq!(
        sql,
        "number BETWEEN 5 AND 10 AND id IN (1,2) AND kind NOT IN ('a','b') \
         AND name='James' COLLATE NOCASE AND deleted_at IS NULL AND title LIKE '%draft%'"
    );
}

#[test]
fn bound_rendering_converts_values_in_order() {
    let id = Uuid::new_v4();
    let mut registry = TypeConverterRegistry::new();
    registry.register(CelsiusConverter);

    let builder = ConditionBuilder::with_conditions([
        Condition::column("done").eq(true),
        Condition::column("owner").eq(id),
        Condition::column("temperature").gt(Value::custom(Celsius(21.5))),
    ])
    .unwrap();

    let rendered = builder.render_bound(&registry).unwrap();
    assert_eq!(rendered.sql, "done=? AND owner=? AND temperature>?");
    assert_eq!(
        rendered.values,
        vec![
            StoredValue::Integer(1),
            StoredValue::Text(id.hyphenated().to_string()),
            StoredValue::Real(21.5),
        ]
    );
}

#[test]
fn unregistered_custom_value_fails_to_render() {
    let builder = ConditionBuilder::with_conditions([
        Condition::column("temperature").eq(Value::custom(Celsius(3.0))),
    ])
    .unwrap();

    let err = builder.render(&TypeConverterRegistry::new()).unwrap_err();
    assert!(matches!(err, QueryError::Convert(_)));
}

#[test]
fn placeholder_template_renders_markers_and_replaces_with_escaped_literals() {
    let template = ConditionBuilder::with_conditions([
        Condition::column("name").placeholder(),
        Condition::column("number").placeholder().joiner(Joiner::Or),
        Condition::column("flag").placeholder(),
    ])
    .unwrap();
    assert_eq!(template.mode(), Some(BindMode::Placeholder));

    let registry = TypeConverterRegistry::new();
    assert_eq!(
        template.render(&registry).unwrap().sql,
        "name=? AND number=? OR flag=?"
    );

    let literal = template
        .replace_params(vec![
            Value::from("O'Brien"),
            Value::from(3),
            Value::from(false),
        ])
        .unwrap();
    assert_eq!(literal.mode(), Some(BindMode::Literal));
    assert_eq!(
        literal.render(&registry).unwrap().sql,
        "name='O''Brien' AND number=3 OR flag=0"
    );
    assert!(matches!(
        literal.conditions()[0].operand(),
        Operand::Single(Value::Text(text)) if text == "O'Brien"
    ));
}

#[test]
fn replace_params_requires_exact_arity() {
    let template = ConditionBuilder::with_conditions([
        Condition::column("a").placeholder(),
        Condition::column("b").placeholder(),
    ])
    .unwrap();

    for values in [vec![], vec![Value::from(1)], vec![Value::from(1); 3]] {
        let found = values.len();
        let err = template.replace_params(values).unwrap_err();
        assert_eq!(err, QueryError::ArityMismatch { expected: 2, found });
    }
}

#[test]
fn replace_params_outside_placeholder_mode_is_rejected() {
    let literal = ConditionBuilder::with_conditions([Condition::column("a").eq(1)]).unwrap();
    assert_eq!(
        literal.replace_params(vec![Value::from(2)]).unwrap_err(),
        QueryError::NotPlaceholderMode
    );
}

#[test]
fn mixing_literal_and_placeholder_conditions_is_a_mode_conflict() {
    let err = ConditionBuilder::with_conditions([
        Condition::column("a").eq(1),
        Condition::column("b").placeholder(),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        QueryError::ModeConflict {
            set_mode: BindMode::Literal,
            condition_mode: BindMode::Placeholder,
        }
    );

    let mut template = ConditionBuilder::new();
    template.push(Condition::column("a").placeholder()).unwrap();
    let err = template.or(Condition::column("b").eq(2)).unwrap_err();
    assert!(matches!(err, QueryError::ModeConflict { .. }));
    assert_eq!(template.len(), 1);
    assert_eq!(template.conditions()[0].joiner_to_next(), None);
}
