use std::{cmp::Ordering, fmt::Display};

use serde_json::Value;

use crate::constraint::{
    ast::{BoundOp, Expr, Kind, Script, StructExpr},
    types::{MAX_REFERENCE_DEPTH, value_kind},
};

/// A single violated constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// The `.` separated path of the field, empty for the root.
    pub path: String,
    pub message: String,
}

impl Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Every violation found while validating a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl Display for Violations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            violations => {
                write!(f, "{} errors", violations.len())?;
                for (i, violation) in violations.iter().enumerate() {
                    let separator = if i == 0 { ": " } else { "; " };
                    write!(f, "{separator}{violation}")?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) struct Evaluator<'a> {
    script: &'a Script,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(script: &'a Script) -> Self {
        Self { script }
    }

    /// Resolves `#Definition` and top-level field references.
    pub(crate) fn resolve(&self, name: &str) -> Option<&'a Expr> {
        match name.strip_prefix('#') {
            Some(definition) => self.script.definitions.get(definition),
            None => self
                .script
                .fields
                .iter()
                .find(|field| field.name == name)
                .map(|field| &field.value),
        }
    }

    /// Checks `value` against `expr`, returning every violation.
    pub(crate) fn check(&self, expr: &Expr, value: &Value, path: &str) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_into(expr, value, path, 0, &mut violations);
        violations
    }

    fn check_into(
        &self,
        expr: &Expr,
        value: &Value,
        path: &str,
        depth: usize,
        violations: &mut Vec<Violation>,
    ) {
        match expr {
            Expr::Top => {}
            Expr::Kind(kinds) => {
                if !kinds.iter().any(|kind| matches_kind(value, *kind)) {
                    let expected = kind_names(kinds);
                    let message = format!(
                        "conflicting values {value} and {expected} (mismatched types {actual} and {expected})",
                        actual = value_kind(value),
                    );
                    push_violation(violations, path, message);
                }
            }
            Expr::Literal(literal) => {
                if !values_equal(literal, value) {
                    let message = format!("conflicting values {literal} and {value}");
                    push_violation(violations, path, message);
                }
            }
            Expr::Bound(op, bound) => {
                if !bound_holds(*op, bound, value) {
                    let message = format!("invalid value {value} (out of bound {op}{bound})");
                    push_violation(violations, path, message);
                }
            }
            Expr::Regex { regex, negated } => {
                let matched = value.as_str().map(|s| regex.is_match(s));
                let op = if *negated { "!~" } else { "=~" };
                let message = match matched {
                    Some(matched) if matched != *negated => return,
                    Some(_) => format!(
                        "invalid value {value} (out of bound {op}{:?})",
                        regex.as_str()
                    ),
                    None => format!(
                        "invalid value {value} (mismatched types {} and string)",
                        value_kind(value)
                    ),
                };
                push_violation(violations, path, message);
            }
            Expr::Reference(name) => match self.resolve(name) {
                _ if depth > MAX_REFERENCE_DEPTH => {
                    let message = format!("reference {name} is nested too deeply");
                    push_violation(violations, path, message);
                }
                Some(target) => self.check_into(target, value, path, depth + 1, violations),
                None => push_violation(violations, path, format!("reference {name} not found")),
            },
            Expr::Struct(expr) => self.check_struct(expr, value, path, depth, violations),
            Expr::List(element) => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        let path = format!("{path}[{i}]");
                        self.check_into(element, item, &path, depth + 1, violations);
                    }
                }
                value => {
                    let message = format!(
                        "conflicting values {value} and [...] (mismatched types {} and list)",
                        value_kind(value)
                    );
                    push_violation(violations, path, message);
                }
            },
            // Only the first conflict of a conjunction is reported
            Expr::Conjunction(parts) => {
                for part in parts {
                    let before = violations.len();
                    self.check_into(part, value, path, depth + 1, violations);
                    if violations.len() > before {
                        break;
                    }
                }
            }
            Expr::Disjunction(alternatives) => {
                let mut failures = Vec::new();
                for (alternative, _) in alternatives {
                    let mut alternative_violations = Vec::new();
                    self.check_into(
                        alternative,
                        value,
                        path,
                        depth + 1,
                        &mut alternative_violations,
                    );
                    if alternative_violations.is_empty() {
                        return;
                    }
                    failures.extend(alternative_violations);
                }

                let details = failures
                    .iter()
                    .map(|failure| failure.message.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let message = format!(
                    "{} errors in empty disjunction: {details}",
                    failures.len()
                );
                push_violation(violations, path, message);
            }
        }
    }

    fn check_struct(
        &self,
        expr: &StructExpr,
        value: &Value,
        path: &str,
        depth: usize,
        violations: &mut Vec<Violation>,
    ) {
        let Value::Object(map) = value else {
            violations.push(Violation {
                path: path.to_owned(),
                message: format!(
                    "conflicting values {value} and {{...}} (mismatched types {} and struct)",
                    value_kind(value)
                ),
            });
            return;
        };

        for field in &expr.fields {
            let field_path = join_path(path, &field.name);
            match map.get(&field.name) {
                Some(child) => {
                    self.check_into(&field.value, child, &field_path, depth + 1, violations);
                }
                None if field.optional || self.default_value(&field.value, depth).is_some() => {}
                None => violations.push(Violation {
                    path: field_path,
                    message: "field is required but not present".to_owned(),
                }),
            }
        }

        if !expr.open {
            for key in map.keys() {
                if !expr.fields.iter().any(|field| &field.name == key) {
                    violations.push(Violation {
                        path: join_path(path, key),
                        message: "field not allowed".to_owned(),
                    });
                }
            }
        }
    }

    fn default_value<'e>(&self, expr: &'e Expr, depth: usize) -> Option<&'e Value>
    where
        'a: 'e,
    {
        match expr {
            Expr::Reference(name) if depth <= MAX_REFERENCE_DEPTH => self
                .resolve(name)
                .and_then(|target| self.default_value(target, depth + 1)),
            expr => expr.default_value(),
        }
    }
}

fn push_violation(violations: &mut Vec<Violation>, path: &str, message: String) {
    violations.push(Violation {
        path: path.to_owned(),
        message,
    });
}

pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn matches_kind(value: &Value, kind: Kind) -> bool {
    match (kind, value) {
        (Kind::Null, Value::Null)
        | (Kind::Bool, Value::Bool(_))
        | (Kind::Float, Value::Number(_))
        | (Kind::String, Value::String(_))
        | (Kind::Struct, Value::Object(_))
        | (Kind::List, Value::Array(_)) => true,
        (Kind::Int, Value::Number(n)) => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn kind_names(kinds: &[Kind]) -> String {
    match kinds {
        [Kind::Int, Kind::Float] => "number".to_owned(),
        kinds => kinds
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | "),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        (left, right) => left == right,
    }
}

fn bound_holds(op: BoundOp, bound: &Value, value: &Value) -> bool {
    if op == BoundOp::NotEqual {
        return !values_equal(bound, value);
    }

    let ordering = match (value, bound) {
        (Value::Number(value), Value::Number(bound)) => compare_numbers(value, bound),
        (Value::String(value), Value::String(bound)) => Some(value.as_str().cmp(bound.as_str())),
        _ => None,
    };

    match ordering {
        Some(ordering) => match op {
            BoundOp::Greater => ordering == Ordering::Greater,
            BoundOp::GreaterEqual => ordering != Ordering::Less,
            BoundOp::Less => ordering == Ordering::Less,
            BoundOp::LessEqual => ordering != Ordering::Greater,
            BoundOp::NotEqual => ordering != Ordering::Equal,
        },
        None => false,
    }
}

/// Compares integers exactly and falls back to floats for everything else.
fn compare_numbers(value: &serde_json::Number, bound: &serde_json::Number) -> Option<Ordering> {
    if let (Some(value), Some(bound)) = (value.as_u64(), bound.as_u64()) {
        return Some(value.cmp(&bound));
    }
    if let (Some(value), Some(bound)) = (value.as_i64(), bound.as_i64()) {
        return Some(value.cmp(&bound));
    }
    value.as_f64()?.partial_cmp(&bound.as_f64()?)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::constraint::parser::parse;

    fn check(script: &str, value: Value) -> Vec<String> {
        let script = parse(script).unwrap();
        let evaluator = Evaluator::new(&script);
        evaluator
            .check(evaluator.resolve("#Root").unwrap(), &value, "")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[rstest]
    #[case("#Root: int", json!(3306))]
    #[case("#Root: int & >=1 & <=65535", json!(3306))]
    #[case("#Root: number & >0.5", json!(1))]
    #[case("#Root: string & \"ON\" | \"OFF\"", json!("OFF"))]
    #[case("#Root: string & =~\"^[0-9]+[KMG]$\"", json!("128M"))]
    #[case("#Root: string & !~\"^tmp\"", json!("/data"))]
    #[case("#Root: int & !=0", json!(1))]
    #[case("#Root: [...int]", json!([1, 2, 3]))]
    #[case("#Root: {a?: int, b: int | *1}", json!({}))]
    #[case("#Root: {a: int, ...}", json!({"a": 1, "b": 2}))]
    #[case("#Root: #Other\n#Other: {a: string}", json!({"a": "x"}))]
    #[case("#Root: int", json!(2.0))]
    #[case("#Root: _", json!(null))]
    #[case("#Root: null | int", json!(null))]
    #[case("#Root: int & <=18446744073709551615", json!(18_446_744_073_709_551_615_u64))]
    fn valid(#[case] script: &str, #[case] value: Value) {
        assert_eq!(check(script, value), Vec::<String>::new());
    }

    #[rstest]
    #[case(
        "#Root: int",
        json!("abc"),
        &[r#"conflicting values "abc" and int (mismatched types string and int)"#]
    )]
    #[case("#Root: int & >=1", json!(0), &["invalid value 0 (out of bound >=1)"])]
    #[case(
        "#Root: {port: int & <=65535, user: string}",
        json!({"port": 70000, "user": 1}),
        &[
            "port: invalid value 70000 (out of bound <=65535)",
            "user: conflicting values 1 and string (mismatched types int and string)",
        ]
    )]
    #[case("#Root: {a: int}", json!({"a": 1, "b": 2}), &["b: field not allowed"])]
    #[case("#Root: {a: int}", json!({}), &["a: field is required but not present"])]
    #[case(
        "#Root: \"ON\" | \"OFF\"",
        json!("YES"),
        &[r#"2 errors in empty disjunction: conflicting values "ON" and "YES", conflicting values "OFF" and "YES""#]
    )]
    #[case("#Root: [...int]", json!([1, "2"]), &[r#"[1]: conflicting values "2" and int (mismatched types string and int)"#])]
    #[case("#Root: #Missing", json!(1), &["reference #Missing not found"])]
    fn invalid(#[case] script: &str, #[case] value: Value, #[case] expected: &[&str]) {
        assert_eq!(check(script, value), expected);
    }

    #[test]
    fn violations_display() {
        let violations = Violations(vec![
            Violation {
                path: "mysqld.port".to_owned(),
                message: "field not allowed".to_owned(),
            },
            Violation {
                path: String::new(),
                message: "invalid value".to_owned(),
            },
        ]);
        assert_eq!(
            violations.to_string(),
            "2 errors: mysqld.port: field not allowed; invalid value"
        );
    }
}
