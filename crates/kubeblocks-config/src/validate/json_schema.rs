use jsonschema::Validator;
use serde_json::{Map, Value};
use snafu::{ResultExt as _, ensure};

use crate::{
    constraint::{FieldType, Violation, Violations},
    options::ValidatorOptions,
    spec::FileFormatConfig,
    validate::{
        CoerceSnafu, ConfigValidator, InvalidJsonSchemaSnafu, Result, ValidationSnafu,
        parse_content,
    },
};

/// Validates files against an OpenAPI v3 style JSON schema.
///
/// String values are converted into the `type` their property declares before validating, the
/// same way [`super::ConstraintValidator`] converts them.
pub struct SchemaValidator {
    schema: Value,
    validator: Validator,
    format_config: FileFormatConfig,
    options: ValidatorOptions,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .field("format_config", &self.format_config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SchemaValidator {
    pub fn new(
        schema: &Value,
        format_config: FileFormatConfig,
        options: ValidatorOptions,
    ) -> Result<Self> {
        let validator = jsonschema::validator_for(schema).map_err(|error| {
            InvalidJsonSchemaSnafu {
                message: error.to_string(),
            }
            .build()
        })?;

        Ok(Self {
            schema: schema.clone(),
            validator,
            format_config,
            options,
        })
    }

    /// Selects the data validated by the schema. For INI files with a section, the schema
    /// describes the parameters of that section unless it declares the section itself.
    fn select(&self, data: &Map<String, Value>) -> (Value, String) {
        match self.format_config.section_name() {
            Some(section) if !has_property(&self.schema, section) => (
                data.get(section)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())),
                section.to_owned(),
            ),
            _ => (Value::Object(data.clone()), String::new()),
        }
    }
}

impl ConfigValidator for SchemaValidator {
    fn validate(&self, content: &str) -> Result<()> {
        let data = parse_content(content, &self.format_config)?;
        let (mut value, prefix) = self.select(&data);

        if !self.options.disable_auto_transform {
            coerce(&self.schema, &mut value, &prefix)?;
        }

        let violations = self
            .validator
            .iter_errors(&value)
            .map(|error| Violation {
                path: pointer_to_path(&prefix, &error.instance_path.to_string()),
                message: error.to_string(),
            })
            .collect::<Vec<_>>();

        ensure!(
            violations.is_empty(),
            ValidationSnafu {
                violations: Violations(violations)
            }
        );
        Ok(())
    }
}

/// Converts string leaves of `value` into the types `schema` declares for them.
fn coerce(schema: &Value, value: &mut Value, path: &str) -> Result<()> {
    match value {
        Value::String(raw) => {
            if let Some(field_type) = declared_type(schema) {
                *value = field_type
                    .coerce(raw)
                    .context(CoerceSnafu { path, field_type })?;
            }
        }
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let Some(property) = property_schema(schema, key) else {
                    continue;
                };
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                coerce(property, child, &child_path)?;
            }
        }
        Value::Array(items) => {
            if let Some(items_schema) = schema.get("items") {
                for (i, item) in items.iter_mut().enumerate() {
                    coerce(items_schema, item, &format!("{path}[{i}]"))?;
                }
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// The type string values are converted into, [`None`] if they stay strings.
fn declared_type(schema: &Value) -> Option<FieldType> {
    let types = match schema.get("type")? {
        Value::String(single) => vec![single.as_str()],
        Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
        _ => return None,
    };
    if types.contains(&"string") {
        return None;
    }

    match types.iter().find(|ty| **ty != "null").copied()? {
        "integer" => Some(FieldType::Integer),
        "number" => Some(FieldType::Float),
        "boolean" => Some(FieldType::Boolean),
        _ => None,
    }
}

fn property_schema<'a>(schema: &'a Value, key: &str) -> Option<&'a Value> {
    schema
        .get("properties")
        .and_then(|properties| properties.get(key))
        .or_else(|| {
            schema
                .get("additionalProperties")
                .filter(|additional| additional.is_object())
        })
}

fn has_property(schema: &Value, key: &str) -> bool {
    schema
        .get("properties")
        .is_some_and(|properties| properties.get(key).is_some())
}

/// Converts a JSON pointer like `/mysqld/port` into the `.` separated path used in errors.
fn pointer_to_path(prefix: &str, pointer: &str) -> String {
    pointer
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .fold(prefix.to_owned(), |path, segment| {
            if path.is_empty() {
                segment
            } else {
                format!("{path}.{segment}")
            }
        })
}
