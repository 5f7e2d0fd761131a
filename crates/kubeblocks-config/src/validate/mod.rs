//! Validation of rendered and patched config files against the schema of their parameters.
//!
//! Which validator is used depends on what the [`ParametersSchema`] of a file provides, see
//! [`new_config_validator`]. Validators never modify the content they check.

use std::fmt::Debug;

use snafu::{ResultExt as _, Snafu};
use tracing::debug;

use crate::{
    constraint::{self, ConstraintSchema, Violations},
    object::{self, ConfigObject, Map, ObjectRegistry},
    options::ValidatorOptions,
    spec::{FileFormat, FileFormatConfig, ParametersSchema},
};

mod json_schema;

pub use json_schema::SchemaValidator;

/// The name of the object content is parsed into.
const VALIDATED_OBJECT_NAME: &str = "validate";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to parse the content as {format}"))]
    ParseContent {
        format: FileFormat,
        source: object::Error,
    },

    #[snafu(display("failed to parse the constraint script"))]
    ParseConstraint { source: constraint::Error },

    #[snafu(display("invalid JSON schema: {message}"))]
    InvalidJsonSchema { message: String },

    #[snafu(display("failed to convert field {path:?} to {field_type}"))]
    Coerce {
        path: String,
        field_type: constraint::FieldType,
        source: constraint::CoerceError,
    },

    #[snafu(transparent)]
    Constraint { source: constraint::Error },

    #[snafu(display("{violations}"))]
    Validation { violations: Violations },
}

/// Checks the content of a single config file.
pub trait ConfigValidator: Debug + Send + Sync {
    fn validate(&self, content: &str) -> Result<()>;
}

/// Creates the validator for files described by `schema`.
///
/// A constraint script takes precedence over a JSON schema. Without either, every content is
/// accepted.
pub fn new_config_validator(
    schema: Option<&ParametersSchema>,
    format_config: &FileFormatConfig,
    options: &ValidatorOptions,
) -> Result<Box<dyn ConfigValidator>> {
    let Some(schema) = schema else {
        return Ok(Box::new(NoopValidator));
    };

    if let Some(script) = schema.cue.as_deref().filter(|cue| !cue.trim().is_empty()) {
        let validator = ConstraintValidator::new(
            script,
            schema.top_level_key.as_deref(),
            format_config.clone(),
            options.clone(),
        )?;
        return Ok(Box::new(validator));
    }

    if let Some(json_schema) = &schema.schema_in_json {
        let validator =
            SchemaValidator::new(json_schema, format_config.clone(), options.clone())?;
        return Ok(Box::new(validator));
    }

    Ok(Box::new(NoopValidator))
}

/// Validates files against a constraint script, see [`crate::constraint`].
#[derive(Debug)]
pub struct ConstraintValidator {
    schema: ConstraintSchema,
    format_config: FileFormatConfig,
    options: ValidatorOptions,
}

impl ConstraintValidator {
    pub fn new(
        script: &str,
        top_level_key: Option<&str>,
        format_config: FileFormatConfig,
        options: ValidatorOptions,
    ) -> Result<Self> {
        let schema =
            ConstraintSchema::parse(script, top_level_key).context(ParseConstraintSnafu)?;
        Ok(Self {
            schema,
            format_config,
            options,
        })
    }
}

impl ConfigValidator for ConstraintValidator {
    fn validate(&self, content: &str) -> Result<()> {
        let data = parse_content(content, &self.format_config)?;
        self.schema
            .validate(&data, self.format_config.section_name(), &self.options)?;
        Ok(())
    }
}

/// Accepts everything, used for files without a schema.
#[derive(Debug)]
pub struct NoopValidator;

impl ConfigValidator for NoopValidator {
    fn validate(&self, _content: &str) -> Result<()> {
        Ok(())
    }
}

fn parse_content(content: &str, format_config: &FileFormatConfig) -> Result<Map> {
    let format = format_config.format;
    let object: Box<dyn ConfigObject> = ObjectRegistry::builtin()
        .load_config(VALIDATED_OBJECT_NAME, content, format)
        .context(ParseContentSnafu { format })?;
    let data = object.all_parameters();
    debug!(parameters = data.len(), %format, "parsed content for validation");
    Ok(data)
}
