//! Type extraction and the conversion of string values into the declared types.
//!
//! Config files are text, so every parsed value of formats like INI is a string. Before a file
//! is validated, values are converted into the type their field declares: `"5432"` becomes
//! `5432` for `port: int`, and `"512Mi"` becomes `536870912` for a field carrying
//! `@k8sResource(quantity)`.

use std::{
    collections::BTreeSet,
    fmt::Display,
    num::{ParseFloatError, ParseIntError},
    str::FromStr,
};

use kubeblocks_shared::{
    quantity::{ParseQuantityError, ParseStorageSizeError, Quantity, StorageSize, StorageUnit},
    time::{Duration, DurationParseError, DurationUnit},
};
use serde_json::{Number, Value};
use snafu::{ResultExt as _, Snafu};

use crate::constraint::ast::{Attribute, BoundOp, Expr, Kind};

/// The attribute marking Kubernetes quantities, e.g. `@k8sResource(quantity)`.
pub const K8S_RESOURCE_ATTRIBUTE: &str = "k8sResource";

/// The attribute marking storage sizes, the argument is the unit of the value, e.g.
/// `@storeResource(1MB)`.
pub const STORE_RESOURCE_ATTRIBUTE: &str = "storeResource";

/// The attribute marking durations, the argument is the unit of the value, e.g.
/// `@timeDurationResource(1s)`.
pub const TIME_DURATION_RESOURCE_ATTRIBUTE: &str = "timeDurationResource";

pub(crate) const MAX_REFERENCE_DEPTH: usize = 32;

#[derive(Debug, Snafu)]
pub enum CoerceError {
    #[snafu(display("failed to parse {value:?} as integer"))]
    InvalidInteger {
        value: String,
        source: ParseIntError,
    },

    #[snafu(display("failed to parse {value:?} as number"))]
    InvalidFloat {
        value: String,
        source: ParseFloatError,
    },

    #[snafu(display("{value:?} is not a valid boolean"))]
    InvalidBoolean { value: String },

    #[snafu(display("failed to parse {value:?} as quantity"))]
    InvalidQuantity {
        value: String,
        source: ParseQuantityError,
    },

    #[snafu(display("failed to parse {value:?} as storage size"))]
    InvalidStorageSize {
        value: String,
        source: ParseStorageSizeError,
    },

    #[snafu(display("failed to parse {value:?} as duration"))]
    InvalidDuration {
        value: String,
        source: DurationParseError,
    },

    #[snafu(display("{value} can not be represented as JSON number"))]
    NotRepresentable { value: f64 },

    #[snafu(display("invalid unit {argument:?} in attribute @{attribute}"))]
    InvalidUnit {
        attribute: &'static str,
        argument: String,
    },
}

/// The type of a field, as far as the conversion of string values is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Nullable,
    Float,
    Integer,
    Boolean,
    String,
    Object,
    Array,
    Quantity,
    StorageSize(StorageUnit),
    TimeDuration(DurationUnit),
}

impl Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nullable => f.write_str("null"),
            Self::Float => f.write_str("float"),
            Self::Integer => f.write_str("int"),
            Self::Boolean => f.write_str("bool"),
            Self::String => f.write_str("string"),
            Self::Object => f.write_str("struct"),
            Self::Array => f.write_str("list"),
            Self::Quantity => f.write_str("quantity"),
            Self::StorageSize(unit) => write!(f, "storage size in {unit}"),
            Self::TimeDuration(unit) => write!(f, "duration in {unit}"),
        }
    }
}

impl FieldType {
    /// Derives the field type from the kinds of values `expr` accepts.
    ///
    /// Mixed integer and float fields are floats, any other mix is left as string.
    pub(crate) fn from_kinds(kinds: &BTreeSet<Kind>) -> Self {
        let mut kinds = kinds.clone();
        if kinds.len() > 1 {
            kinds.remove(&Kind::Null);
        }

        match kinds.into_iter().collect::<Vec<_>>().as_slice() {
            [Kind::Int] => Self::Integer,
            [Kind::Float] | [Kind::Int, Kind::Float] => Self::Float,
            [Kind::Bool] => Self::Boolean,
            [Kind::Struct] => Self::Object,
            [Kind::List] => Self::Array,
            [Kind::Null] => Self::Nullable,
            _ => Self::String,
        }
    }

    /// Returns the type declared by a resource attribute, if `attributes` contain one.
    pub(crate) fn from_attributes(attributes: &[Attribute]) -> Result<Option<Self>, CoerceError> {
        for attribute in attributes {
            match attribute.name.as_str() {
                K8S_RESOURCE_ATTRIBUTE => return Ok(Some(Self::Quantity)),
                STORE_RESOURCE_ATTRIBUTE => {
                    let unit = unit_argument(&attribute.argument);
                    let unit = StorageUnit::from_str(unit).map_err(|_| {
                        InvalidUnitSnafu {
                            attribute: STORE_RESOURCE_ATTRIBUTE,
                            argument: &attribute.argument,
                        }
                        .build()
                    })?;
                    return Ok(Some(Self::StorageSize(unit)));
                }
                TIME_DURATION_RESOURCE_ATTRIBUTE => {
                    let unit = match unit_argument(&attribute.argument) {
                        "" => DurationUnit::Milliseconds,
                        unit => DurationUnit::from_str(unit).map_err(|_| {
                            InvalidUnitSnafu {
                                attribute: TIME_DURATION_RESOURCE_ATTRIBUTE,
                                argument: &attribute.argument,
                            }
                            .build()
                        })?,
                    };
                    return Ok(Some(Self::TimeDuration(unit)));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Converts a string value into this type.
    pub fn coerce(&self, value: &str) -> Result<Value, CoerceError> {
        let trimmed = value.trim();

        match self {
            Self::Integer => match trimmed.parse::<i64>() {
                Ok(int) => Ok(Value::from(int)),
                Err(_) => trimmed
                    .parse::<u64>()
                    .map(Value::from)
                    .context(InvalidIntegerSnafu { value }),
            },
            Self::Float => parse_number(trimmed).context(InvalidFloatSnafu { value })?,
            Self::Boolean => parse_bool(trimmed)
                .map(Value::Bool)
                .ok_or_else(|| InvalidBooleanSnafu { value }.build()),
            Self::Quantity => {
                if let Ok(number) = parse_number(trimmed) {
                    return number;
                }
                let quantity = Quantity::from_str(trimmed).context(InvalidQuantitySnafu { value })?;
                to_number(quantity.as_base_value())
            }
            Self::StorageSize(unit) => {
                if let Ok(number) = parse_number(trimmed) {
                    return number;
                }
                let size = StorageSize::from_str(trimmed).context(InvalidStorageSizeSnafu { value })?;
                to_number(size.as_unit(*unit))
            }
            Self::TimeDuration(unit) => {
                if let Ok(number) = parse_number(trimmed) {
                    return number;
                }
                let duration = Duration::from_str(trimmed).context(InvalidDurationSnafu { value })?;
                to_number(duration.as_unit(*unit))
            }
            Self::Nullable | Self::String | Self::Object | Self::Array => {
                Ok(Value::String(value.to_owned()))
            }
        }
    }
}

/// Returns the kinds of values `expr` accepts. References are resolved through `resolve`.
pub(crate) fn kinds<'a>(
    expr: &'a Expr,
    resolve: &dyn Fn(&str) -> Option<&'a Expr>,
    depth: usize,
) -> BTreeSet<Kind> {
    let all = || {
        BTreeSet::from([
            Kind::Null,
            Kind::Bool,
            Kind::Int,
            Kind::Float,
            Kind::String,
            Kind::Struct,
            Kind::List,
        ])
    };
    if depth > MAX_REFERENCE_DEPTH {
        return all();
    }

    match expr {
        Expr::Top | Expr::Bound(BoundOp::NotEqual, _) => all(),
        Expr::Kind(kinds) => kinds.iter().copied().collect(),
        Expr::Literal(value) => BTreeSet::from([value_kind(value)]),
        Expr::Bound(_, Value::String(_)) | Expr::Regex { .. } => BTreeSet::from([Kind::String]),
        Expr::Bound(..) => BTreeSet::from([Kind::Int, Kind::Float]),
        Expr::Reference(name) => {
            resolve(name).map_or_else(all, |target| kinds(target, resolve, depth + 1))
        }
        Expr::Struct(_) => BTreeSet::from([Kind::Struct]),
        Expr::List(_) => BTreeSet::from([Kind::List]),
        Expr::Conjunction(parts) => parts.iter().fold(all(), |acc, part| {
            acc.intersection(&kinds(part, resolve, depth + 1))
                .copied()
                .collect()
        }),
        Expr::Disjunction(alternatives) => alternatives
            .iter()
            .flat_map(|(alternative, _)| kinds(alternative, resolve, depth + 1))
            .collect(),
    }
}

pub(crate) fn value_kind(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Bool,
        Value::Number(n) if n.is_f64() => Kind::Float,
        Value::Number(_) => Kind::Int,
        Value::String(_) => Kind::String,
        Value::Array(_) => Kind::List,
        Value::Object(_) => Kind::Struct,
    }
}

/// Booleans are parsed like Go's `strconv.ParseBool`, which the config files of many databases
/// follow.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_number(value: &str) -> Result<Result<Value, CoerceError>, ParseFloatError> {
    if let Ok(int) = value.parse::<i64>() {
        return Ok(Ok(Value::from(int)));
    }
    if let Ok(uint) = value.parse::<u64>() {
        return Ok(Ok(Value::from(uint)));
    }
    value.parse::<f64>().map(to_number)
}

/// Integral values become integers, everything else a float.
fn to_number(value: f64) -> Result<Value, CoerceError> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| NotRepresentableSnafu { value }.build())
}

/// Strips the leading count from unit arguments like `1MB`.
fn unit_argument(argument: &str) -> &str {
    argument
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(FieldType::Integer, "5432", json!(5432))]
    #[case(FieldType::Integer, " 18446744073709551615 ", json!(18_446_744_073_709_551_615_u64))]
    #[case(FieldType::Float, "0.75", json!(0.75))]
    #[case(FieldType::Float, "100", json!(100))]
    #[case(FieldType::Boolean, "T", json!(true))]
    #[case(FieldType::Boolean, "0", json!(false))]
    #[case(FieldType::Quantity, "512Mi", json!(536_870_912))]
    #[case(FieldType::Quantity, "500m", json!(0.5))]
    #[case(FieldType::Quantity, "1024", json!(1024))]
    #[case(FieldType::StorageSize(StorageUnit::Megabytes), "1GB", json!(1024))]
    #[case(FieldType::StorageSize(StorageUnit::Kilobytes), "8M", json!(8192))]
    #[case(FieldType::StorageSize(StorageUnit::Megabytes), "128", json!(128))]
    #[case(FieldType::TimeDuration(DurationUnit::Seconds), "15min", json!(900))]
    #[case(FieldType::TimeDuration(DurationUnit::Milliseconds), "2s", json!(2000))]
    #[case(FieldType::TimeDuration(DurationUnit::Minutes), "90s", json!(1.5))]
    #[case(FieldType::String, "ON", json!("ON"))]
    fn coerce(#[case] field_type: FieldType, #[case] input: &str, #[case] expected: Value) {
        assert_eq!(field_type.coerce(input).unwrap(), expected);
    }

    #[rstest]
    #[case(FieldType::Integer, "not-a-number")]
    #[case(FieldType::Integer, "1.5")]
    #[case(FieldType::Float, "fast")]
    #[case(FieldType::Boolean, "ON")]
    #[case(FieldType::Quantity, "12XB")]
    #[case(FieldType::StorageSize(StorageUnit::Bytes), "12PB")]
    #[case(FieldType::TimeDuration(DurationUnit::Seconds), "5 parsecs")]
    fn coerce_fail(#[case] field_type: FieldType, #[case] input: &str) {
        assert!(field_type.coerce(input).is_err());
    }

    #[rstest]
    #[case(&[Kind::Int], FieldType::Integer)]
    #[case(&[Kind::Int, Kind::Float], FieldType::Float)]
    #[case(&[Kind::Null, Kind::Int], FieldType::Integer)]
    #[case(&[Kind::Null], FieldType::Nullable)]
    #[case(&[Kind::Bool, Kind::String], FieldType::String)]
    #[case(&[Kind::List], FieldType::Array)]
    fn from_kinds(#[case] kinds: &[Kind], #[case] expected: FieldType) {
        let kinds = kinds.iter().copied().collect();
        assert_eq!(FieldType::from_kinds(&kinds), expected);
    }

    #[rstest]
    #[case("k8sResource", "quantity", FieldType::Quantity)]
    #[case("storeResource", "1MB", FieldType::StorageSize(StorageUnit::Megabytes))]
    #[case("storeResource", "", FieldType::StorageSize(StorageUnit::Bytes))]
    #[case("timeDurationResource", "1s", FieldType::TimeDuration(DurationUnit::Seconds))]
    #[case("timeDurationResource", "", FieldType::TimeDuration(DurationUnit::Milliseconds))]
    fn from_attributes(#[case] name: &str, #[case] argument: &str, #[case] expected: FieldType) {
        let attributes = [Attribute {
            name: name.to_owned(),
            argument: argument.to_owned(),
        }];
        assert_eq!(FieldType::from_attributes(&attributes).unwrap(), Some(expected));
    }

    #[test]
    fn invalid_unit() {
        let attributes = [Attribute {
            name: STORE_RESOURCE_ATTRIBUTE.to_owned(),
            argument: "1XB".to_owned(),
        }];
        assert!(FieldType::from_attributes(&attributes).is_err());
    }
}
