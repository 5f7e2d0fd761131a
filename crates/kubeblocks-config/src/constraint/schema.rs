//! Conversion of constraint expressions into OpenAPI v3 schemas.

use serde_json::{Map, Value, json};

use crate::constraint::{
    ast::{BoundOp, Expr, Kind, StructExpr},
    eval::Evaluator,
    types::{MAX_REFERENCE_DEPTH, value_kind},
};

pub(crate) fn expr_schema(
    evaluator: &Evaluator<'_>,
    expr: &Expr,
    depth: usize,
) -> Map<String, Value> {
    if depth > MAX_REFERENCE_DEPTH {
        return Map::new();
    }

    match expr {
        Expr::Top => Map::new(),
        Expr::Kind(kinds) => type_schema(kinds),
        Expr::Literal(value) => object([("enum", json!([value]))]),
        Expr::Bound(op, bound @ Value::Number(_)) => match op {
            BoundOp::Greater => object([("exclusiveMinimum", bound.clone())]),
            BoundOp::GreaterEqual => object([("minimum", bound.clone())]),
            BoundOp::Less => object([("exclusiveMaximum", bound.clone())]),
            BoundOp::LessEqual => object([("maximum", bound.clone())]),
            BoundOp::NotEqual => object([("not", json!({"enum": [bound]}))]),
        },
        Expr::Bound(BoundOp::NotEqual, bound) => object([("not", json!({"enum": [bound]}))]),
        // String ordering has no schema counterpart
        Expr::Bound(..) => Map::new(),
        Expr::Regex {
            regex,
            negated: false,
        } => object([("pattern", Value::from(regex.as_str()))]),
        Expr::Regex {
            regex,
            negated: true,
        } => object([("not", json!({"pattern": regex.as_str()}))]),
        Expr::Reference(name) => evaluator
            .resolve(name)
            .map(|target| expr_schema(evaluator, target, depth + 1))
            .unwrap_or_default(),
        Expr::Struct(expr) => struct_schema(evaluator, expr, depth),
        Expr::List(element) => object([
            ("type", Value::from("array")),
            (
                "items",
                Value::Object(expr_schema(evaluator, element, depth + 1)),
            ),
        ]),
        Expr::Conjunction(parts) => {
            let schemas = parts
                .iter()
                .map(|part| expr_schema(evaluator, part, depth + 1))
                .collect::<Vec<_>>();
            merge_all(schemas)
        }
        Expr::Disjunction(alternatives) => {
            disjunction_schema(evaluator, expr, alternatives, depth)
        }
    }
}

fn struct_schema(
    evaluator: &Evaluator<'_>,
    expr: &StructExpr,
    depth: usize,
) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in &expr.fields {
        let schema = expr_schema(evaluator, &field.value, depth + 1);
        let has_default = schema.contains_key("default");
        properties.insert(field.name.clone(), Value::Object(schema));
        if !field.optional && !has_default {
            required.push(Value::from(field.name.as_str()));
        }
    }

    let mut schema = object([
        ("type", Value::from("object")),
        ("properties", Value::Object(properties)),
    ]);
    if !required.is_empty() {
        schema.insert("required".to_owned(), Value::Array(required));
    }
    if !expr.open {
        schema.insert("additionalProperties".to_owned(), Value::Bool(false));
    }
    schema
}

fn disjunction_schema(
    evaluator: &Evaluator<'_>,
    expr: &Expr,
    alternatives: &[(Expr, bool)],
    depth: usize,
) -> Map<String, Value> {
    let literals = alternatives
        .iter()
        .map(|(alternative, _)| match alternative {
            Expr::Literal(value) => Some(value.clone()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>();

    // A default like `int | *151` is an annotation of the other alternatives
    let constraining = alternatives
        .iter()
        .filter(|(alternative, default)| !(*default && matches!(alternative, Expr::Literal(_))))
        .collect::<Vec<_>>();

    let mut schema = match (literals, constraining.as_slice()) {
        (Some(values), _) => {
            let kind = common_kind(&values);
            let mut schema = object([("enum", Value::Array(values))]);
            if let Some(kind) = kind {
                schema.extend(type_schema(&[kind]));
            }
            schema
        }
        (None, [(single, _)]) => expr_schema(evaluator, single, depth + 1),
        (None, _) => {
            let any_of = constraining
                .iter()
                .map(|(alternative, _)| {
                    Value::Object(expr_schema(evaluator, alternative, depth + 1))
                })
                .collect();
            object([("anyOf", Value::Array(any_of))])
        }
    };

    if let Some(default) = expr.default_value() {
        schema.insert("default".to_owned(), default.clone());
    }
    schema
}

/// Merges the schemas of a conjunction, falling back to `allOf` when two parts constrain the
/// same keyword differently.
fn merge_all(schemas: Vec<Map<String, Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    let conflicting = schemas.iter().flatten().any(|(key, value)| {
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), value.clone());
                false
            }
            Some(existing) => existing != value,
        }
    });

    if conflicting {
        let all_of = schemas.into_iter().map(Value::Object).collect();
        return object([("allOf", Value::Array(all_of))]);
    }
    merged
}

fn type_schema(kinds: &[Kind]) -> Map<String, Value> {
    let mut types = kinds
        .iter()
        .map(|kind| match kind {
            Kind::Null => "null",
            Kind::Bool => "boolean",
            Kind::Int => "integer",
            Kind::Float => "number",
            Kind::String => "string",
            Kind::Struct => "object",
            Kind::List => "array",
        })
        .collect::<Vec<_>>();
    if types.contains(&"number") {
        types.retain(|kind| *kind != "integer");
    }

    match types.as_slice() {
        [] => Map::new(),
        [single] => object([("type", Value::from(*single))]),
        types => object([("type", json!(types))]),
    }
}

fn common_kind(values: &[Value]) -> Option<Kind> {
    let mut kinds = values.iter().map(value_kind);
    let first = kinds.next()?;
    kinds.all(|kind| kind == first).then_some(first)
}

fn object<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use crate::constraint::ConstraintSchema;

    #[test]
    fn mysql_definition() {
        let schema = ConstraintSchema::parse(
            indoc! {r#"
                #MysqlParameter: {
                    port: int & >=1 & <=65535
                    max_connections?: int & >=1 & <=100000 | *151
                    binlog_format?: "ROW" | "STATEMENT" | "MIXED"
                    datadir?: string & =~"^/"
                    ratio?: number & >0
                    plugins?: [...string]
                }
            "#},
            Some("MysqlParameter"),
        )
        .unwrap();

        assert_eq!(
            schema.to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "port": {"type": "integer", "minimum": 1, "maximum": 65535},
                    "max_connections": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 100_000,
                        "default": 151,
                    },
                    "binlog_format": {
                        "enum": ["ROW", "STATEMENT", "MIXED"],
                        "type": "string",
                    },
                    "datadir": {"type": "string", "pattern": "^/"},
                    "ratio": {"type": "number", "exclusiveMinimum": 0},
                    "plugins": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["port"],
                "additionalProperties": false,
            })
        );
    }

    #[test]
    fn conflicting_conjunction() {
        let schema = ConstraintSchema::parse("a: int & >=1 & >=2", None).unwrap();
        assert_eq!(
            schema.to_json_schema()["properties"]["a"],
            json!({
                "allOf": [{"type": "integer"}, {"minimum": 1}, {"minimum": 2}]
            })
        );
    }

    #[test]
    fn mixed_disjunction() {
        let schema = ConstraintSchema::parse("a?: int | string", None).unwrap();
        assert_eq!(
            schema.to_json_schema()["properties"]["a"],
            json!({"anyOf": [{"type": "integer"}, {"type": "string"}]})
        );
    }
}
