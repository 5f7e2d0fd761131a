use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

/// A parsed constraint script.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Definitions like `#MysqlParameter: { ... }`, keyed by their name without `#`.
    pub definitions: BTreeMap<String, Expr>,

    /// Regular top-level fields, e.g. `mysqld: #MysqlParameter`.
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub optional: bool,
    pub value: Expr,
    pub attributes: Vec<Attribute>,
}

/// An attribute like `@storeResource(1MB)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub argument: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Struct,
    List,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum BoundOp {
    #[strum(serialize = ">")]
    Greater,

    #[strum(serialize = ">=")]
    GreaterEqual,

    #[strum(serialize = "<")]
    Less,

    #[strum(serialize = "<=")]
    LessEqual,

    #[strum(serialize = "!=")]
    NotEqual,
}

#[derive(Clone, Debug)]
pub struct StructExpr {
    pub fields: Vec<Field>,

    /// Whether fields not listed in [`StructExpr::fields`] are allowed. Structs of definitions
    /// are closed unless they end with `...`.
    pub open: bool,
}

#[derive(Clone, Debug)]
pub enum Expr {
    /// `_`, matches everything.
    Top,

    /// A basic type like `int` or `string`. `number` matches both [`Kind::Int`] and
    /// [`Kind::Float`].
    Kind(Vec<Kind>),

    /// A concrete value the data must be equal to.
    Literal(Value),

    Bound(BoundOp, Value),

    Regex { regex: Regex, negated: bool },

    /// A reference to a definition, e.g. `#MysqlParameter`.
    Reference(String),

    Struct(StructExpr),

    /// `[...T]`, a list of any length whose elements match `T`.
    List(Box<Expr>),

    /// `a & b`
    Conjunction(Vec<Expr>),

    /// `a | *b`, the flag marks default values.
    Disjunction(Vec<(Expr, bool)>),
}

impl Expr {
    /// Returns the default value of a disjunction, e.g. `151` for `int | *151`.
    pub fn default_value(&self) -> Option<&Value> {
        match self {
            Self::Disjunction(alternatives) => alternatives.iter().find_map(|(expr, default)| {
                match (expr, default) {
                    (Self::Literal(value), true) => Some(value),
                    _ => None,
                }
            }),
            Self::Conjunction(exprs) => exprs.iter().find_map(Self::default_value),
            _ => None,
        }
    }
}
