//! A validator for the constraint scripts of parameter definitions.
//!
//! Constraint scripts use a small subset of the CUE language:
//!
//! ```text
//! #MysqlParameter: {
//!     // the maximum permitted number of simultaneous client connections
//!     max_connections?: int & >=1 & <=100000 | *151
//!     binlog_format?: string & "ROW" | "STATEMENT" | "MIXED"
//!     innodb_buffer_pool_size?: int @k8sResource(quantity)
//!     ...
//! }
//!
//! mysqld: #MysqlParameter
//! ```
//!
//! A [`ConstraintSchema`] is parsed once and can validate any number of files. String values are
//! converted into the type declared by their field before the script is evaluated, see
//! [`FieldType`].

use serde_json::{Map, Value};
use snafu::{ResultExt as _, Snafu, ensure};
use tracing::debug;

use crate::{
    constraint::{
        ast::{Attribute, Expr, Field, Script, StructExpr},
        eval::{Evaluator, join_path},
        types::{MAX_REFERENCE_DEPTH, kinds},
    },
    options::ValidatorOptions,
};

mod ast;
mod eval;
mod lexer;
mod parser;
mod schema;
mod types;

pub use eval::{Violation, Violations};
pub use types::{
    CoerceError, FieldType, K8S_RESOURCE_ATTRIBUTE, STORE_RESOURCE_ATTRIBUTE,
    TIME_DURATION_RESOURCE_ATTRIBUTE,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unexpected character {character:?} at line {line}"))]
    UnexpectedCharacter { line: usize, character: char },

    #[snafu(display("unterminated {what} starting at line {line}"))]
    Unterminated { line: usize, what: &'static str },

    #[snafu(display("invalid number {literal:?} at line {line}"))]
    InvalidNumber { line: usize, literal: String },

    #[snafu(display("expected {expected} at line {line}, found {found}"))]
    UnexpectedToken {
        line: usize,
        expected: &'static str,
        found: String,
    },

    #[snafu(display("unexpected end of script, expected {expected}"))]
    UnexpectedEnd { expected: &'static str },

    #[snafu(display("definition #{name} is declared twice (line {line})"))]
    DuplicateDefinition { line: usize, name: String },

    #[snafu(display("invalid regular expression {pattern:?} at line {line}"))]
    InvalidRegex {
        line: usize,
        pattern: String,
        source: regex::Error,
    },

    #[snafu(display("the top-level key #{name} is not defined in the constraint script"))]
    DefinitionNotFound { name: String },

    #[snafu(display(
        "the constraint script has no top-level fields and {count} definitions, a top-level key is required"
    ))]
    NoRoot { count: usize },

    #[snafu(display("invalid resource attribute on field {path:?}"))]
    InvalidAttribute { path: String, source: CoerceError },

    #[snafu(display("failed to convert field {path:?} to {field_type}"))]
    Coerce {
        path: String,
        field_type: FieldType,
        source: CoerceError,
    },

    #[snafu(display("{violations}"))]
    Validation { violations: Violations },
}

/// A parsed constraint script together with the expression files are validated against.
#[derive(Clone, Debug)]
pub struct ConstraintSchema {
    script: Script,
    root: Expr,

    /// Whether [`ConstraintSchema::root`] is a definition describing the parameters of a single
    /// section rather than the whole file.
    root_is_definition: bool,
}

impl ConstraintSchema {
    /// Parses `script`.
    ///
    /// Files are validated against the definition named by `top_level_key` (with or without the
    /// leading `#`). Without a key, the top-level fields of the script describe the file, and a
    /// script consisting of a single definition uses that definition.
    pub fn parse(script: &str, top_level_key: Option<&str>) -> Result<Self> {
        let script = parser::parse(script)?;

        let top_level_key = top_level_key
            .map(|key| key.trim_start_matches('#'))
            .filter(|key| !key.is_empty());

        let (root, root_is_definition) = match top_level_key {
            Some(name) => {
                ensure!(
                    script.definitions.contains_key(name),
                    DefinitionNotFoundSnafu { name }
                );
                (Expr::Reference(format!("#{name}")), true)
            }
            None if !script.fields.is_empty() => (
                Expr::Struct(StructExpr {
                    fields: script.fields.clone(),
                    open: true,
                }),
                false,
            ),
            None => {
                let mut names = script.definitions.keys();
                let name = match (names.next(), names.next()) {
                    (Some(name), None) => name.clone(),
                    _ => {
                        return NoRootSnafu {
                            count: script.definitions.len(),
                        }
                        .fail();
                    }
                };
                (Expr::Reference(format!("#{name}")), true)
            }
        };

        Ok(Self {
            script,
            root,
            root_is_definition,
        })
    }

    /// Validates the parameters of a file.
    ///
    /// When the schema describes a single section (see [`ConstraintSchema::parse`]) and
    /// `section` is set, only the parameters of that section are validated. `data` itself is
    /// never modified, string values are converted on a copy.
    pub fn validate(
        &self,
        data: &Map<String, Value>,
        section: Option<&str>,
        options: &ValidatorOptions,
    ) -> Result<()> {
        let (mut value, path) = match (self.root_is_definition, section) {
            (true, Some(section)) => (
                data.get(section)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())),
                section.to_owned(),
            ),
            _ => (Value::Object(data.clone()), String::new()),
        };

        let evaluator = Evaluator::new(&self.script);
        if !options.disable_auto_transform {
            self.coerce(&evaluator, &self.root, &[], &mut value, &path, 0)?;
        }

        let violations = evaluator.check(&self.root, &value, &path);
        debug!(
            violations = violations.len(),
            section, "evaluated constraint script"
        );
        ensure!(
            violations.is_empty(),
            ValidationSnafu {
                violations: Violations(violations)
            }
        );
        Ok(())
    }

    /// Returns the type string values of the field at the `.` separated `path` are converted
    /// into, or [`None`] if the schema doesn't declare the field.
    pub fn field_type(&self, path: &str) -> Result<Option<FieldType>> {
        let evaluator = Evaluator::new(&self.script);
        let mut expr = &self.root;
        let mut attributes: &[Attribute] = &[];

        for (i, segment) in path.split('.').enumerate() {
            // The section of single-section schemas is implied
            if i == 0 && self.root_is_definition && segment_is_section(&evaluator, expr, segment)
            {
                continue;
            }
            let Some(field) = self
                .struct_fields(&evaluator, expr, 0)
                .into_iter()
                .find(|field| field.name == segment)
            else {
                return Ok(None);
            };
            expr = &field.value;
            attributes = &field.attributes;
        }

        self.resolve_field_type(&evaluator, expr, attributes, path)
            .map(Some)
    }

    /// Derives an OpenAPI v3 schema of the validated data, the shape of the `schemaInJSON`
    /// field of parameter definitions.
    pub fn to_json_schema(&self) -> Value {
        let evaluator = Evaluator::new(&self.script);
        Value::Object(schema::expr_schema(&evaluator, &self.root, 0))
    }

    fn coerce(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expr,
        attributes: &[Attribute],
        value: &mut Value,
        path: &str,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_REFERENCE_DEPTH {
            return Ok(());
        }

        match value {
            Value::String(raw) => {
                let field_type = self.resolve_field_type(evaluator, expr, attributes, path)?;
                if matches!(
                    field_type,
                    FieldType::String | FieldType::Nullable | FieldType::Object | FieldType::Array
                ) {
                    return Ok(());
                }
                *value = field_type
                    .coerce(raw)
                    .context(CoerceSnafu { path, field_type })?;
            }
            Value::Object(map) => {
                let fields = self.struct_fields(evaluator, expr, 0);
                for (key, child) in map.iter_mut() {
                    if let Some(field) = fields.iter().find(|field| &field.name == key) {
                        let child_path = join_path(path, key);
                        self.coerce(
                            evaluator,
                            &field.value,
                            &field.attributes,
                            child,
                            &child_path,
                            depth + 1,
                        )?;
                    }
                }
            }
            Value::Array(items) => {
                if let Some(element) = self.list_element(evaluator, expr, 0) {
                    for (i, item) in items.iter_mut().enumerate() {
                        let item_path = format!("{path}[{i}]");
                        self.coerce(evaluator, element, &[], item, &item_path, depth + 1)?;
                    }
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }

        Ok(())
    }

    fn resolve_field_type(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expr,
        attributes: &[Attribute],
        path: &str,
    ) -> Result<FieldType> {
        if let Some(field_type) =
            FieldType::from_attributes(attributes).context(InvalidAttributeSnafu { path })?
        {
            return Ok(field_type);
        }
        let resolve = |name: &str| evaluator.resolve(name);
        Ok(FieldType::from_kinds(&kinds(expr, &resolve, 0)))
    }

    /// Collects the fields of every struct `expr` can be, following references.
    fn struct_fields<'e>(
        &'e self,
        evaluator: &Evaluator<'e>,
        expr: &'e Expr,
        depth: usize,
    ) -> Vec<&'e Field> {
        if depth > MAX_REFERENCE_DEPTH {
            return Vec::new();
        }
        match expr {
            Expr::Struct(expr) => expr.fields.iter().collect(),
            Expr::Reference(name) => evaluator
                .resolve(name)
                .map(|target| self.struct_fields(evaluator, target, depth + 1))
                .unwrap_or_default(),
            Expr::Conjunction(parts) => parts
                .iter()
                .flat_map(|part| self.struct_fields(evaluator, part, depth + 1))
                .collect(),
            Expr::Disjunction(alternatives) => alternatives
                .iter()
                .flat_map(|(alternative, _)| self.struct_fields(evaluator, alternative, depth + 1))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn list_element<'e>(
        &'e self,
        evaluator: &Evaluator<'e>,
        expr: &'e Expr,
        depth: usize,
    ) -> Option<&'e Expr> {
        if depth > MAX_REFERENCE_DEPTH {
            return None;
        }
        match expr {
            Expr::List(element) => Some(&**element),
            Expr::Reference(name) => evaluator
                .resolve(name)
                .and_then(|target| self.list_element(evaluator, target, depth + 1)),
            Expr::Conjunction(parts) => parts
                .iter()
                .find_map(|part| self.list_element(evaluator, part, depth + 1)),
            Expr::Disjunction(alternatives) => alternatives
                .iter()
                .find_map(|(alternative, _)| self.list_element(evaluator, alternative, depth + 1)),
            _ => None,
        }
    }
}

fn segment_is_section(evaluator: &Evaluator<'_>, root: &Expr, segment: &str) -> bool {
    let Expr::Reference(name) = root else {
        return false;
    };
    // A parameter of the definition with the same name as the section wins
    !matches!(
        evaluator.resolve(name),
        Some(Expr::Struct(definition)) if definition.fields.iter().any(|field| field.name == segment)
    )
}
