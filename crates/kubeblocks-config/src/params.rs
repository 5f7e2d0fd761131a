//! Routing of user supplied parameters into config files, and merging them into the current
//! content of those files.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tracing::{debug, instrument, warn};

use crate::{
    constraint::{self, ConstraintSchema},
    loader::{self, CfgOptions, ConfigFileCollection, FormatSource},
    object::{Map, ObjectRegistry},
    options::ValidatorOptions,
    spec::{ComponentConfigDescription, FileFormatConfig, ParamPairs, ParametersDefinitionSpec},
    validate::{self, new_config_validator},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load the config files"))]
    LoadConfigs { source: loader::Error },

    #[snafu(display("not support the config updated: {file}"))]
    UnsupportedFile { file: String },

    #[snafu(display("failed to merge the parameters into file {file:?}"))]
    MergeParameters { file: String, source: loader::Error },

    #[snafu(display("failed to generate config file"))]
    GenerateConfig { source: loader::Error },

    #[snafu(display("failed to validate updated config {file:?}"))]
    ValidateConfig {
        file: String,
        source: validate::Error,
    },

    #[snafu(display("failed to parse the constraint of file {file:?}"))]
    ParseConstraint {
        file: String,
        source: constraint::Error,
    },

    #[snafu(display("parameter {parameter:?} is not defined by any config file"))]
    UnknownParameter { parameter: String },

    #[snafu(display(
        "parameter {parameter:?} is defined by both {first_file:?} and {second_file:?}"
    ))]
    AmbiguousParameter {
        parameter: String,
        first_file: String,
        second_file: String,
    },
}

/// Where a parameter lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterMeta {
    pub template_name: String,
    pub file_name: String,
}

/// Maps the name of every parameter known to the definitions to the file defining it.
///
/// The parameters of a file are the ones its definition lists as static, dynamic or immutable
/// plus the ones declared by its schema. Files without a definition define no parameters.
pub fn build_parameter_metas(
    descriptions: &[ComponentConfigDescription],
    definitions: &[ParametersDefinitionSpec],
) -> Result<BTreeMap<String, ParameterMeta>> {
    let mut metas = BTreeMap::<String, ParameterMeta>::new();

    for description in descriptions {
        let Some(definition) = resolve_definition(definitions, &description.name) else {
            continue;
        };

        for parameter in defined_parameters(&description.name, definition)? {
            let meta = ParameterMeta {
                template_name: description.template_name.clone(),
                file_name: description.name.clone(),
            };
            if let Some(existing) = metas.get(&parameter) {
                ensure!(
                    existing.file_name == meta.file_name,
                    AmbiguousParameterSnafu {
                        parameter,
                        first_file: &existing.file_name,
                        second_file: meta.file_name,
                    }
                );
            }
            metas.insert(parameter, meta);
        }
    }

    Ok(metas)
}

/// Groups flat `name -> value` parameters by the file they belong to.
///
/// Unknown parameters are an error, a parameter must never be written into the wrong file.
pub fn classify_parameters(
    parameters: &Map,
    metas: &BTreeMap<String, ParameterMeta>,
) -> Result<Vec<ParamPairs>> {
    let mut by_file = BTreeMap::<&str, Map>::new();
    for (parameter, value) in parameters {
        let meta = metas
            .get(parameter)
            .context(UnknownParameterSnafu { parameter })?;
        by_file
            .entry(meta.file_name.as_str())
            .or_default()
            .insert(parameter.clone(), value.clone());
    }

    Ok(by_file
        .into_iter()
        .map(|(file, updated_params)| ParamPairs {
            key: file.to_owned(),
            updated_params,
        })
        .collect())
}

/// Drops the parameters the definition of `file` declares as immutable.
pub fn filter_immutable_parameters(
    parameters: &Map,
    file: &str,
    definitions: &[ParametersDefinitionSpec],
) -> Map {
    let Some(definition) = resolve_definition(definitions, file) else {
        return parameters.clone();
    };

    parameters
        .iter()
        .filter(|(parameter, _)| {
            let immutable = definition.is_immutable(parameter);
            if immutable {
                warn!(%file, %parameter, "ignoring update of immutable parameter");
            }
            !immutable
        })
        .map(|(parameter, value)| (parameter.clone(), value.clone()))
        .collect()
}

/// Merges parameter updates into `base_configs` and validates every changed file.
///
/// Only files with a description take part. Updates of immutable parameters are ignored. The
/// returned files are `base_configs` with the changed files replaced, files which did not change
/// keep their original text.
#[instrument(skip_all, fields(files = base_configs.len(), updates = updated_params.len()))]
pub fn merge_and_validate_configs(
    base_configs: &BTreeMap<String, String>,
    updated_params: &[ParamPairs],
    definitions: &[ParametersDefinitionSpec],
    descriptions: &[ComponentConfigDescription],
    options: &ValidatorOptions,
) -> Result<BTreeMap<String, String>> {
    let updated_configs =
        merge_parameters(base_configs, updated_params, definitions, descriptions)?;

    for (file, content) in &updated_configs {
        validate_config(file, content, definitions, descriptions, options)?;
    }

    Ok(merge_updated_config(base_configs, updated_configs))
}

/// Validates `content` with the schema of the definition of `file`. Files without a
/// definition or format are accepted as is.
pub fn validate_config(
    file: &str,
    content: &str,
    definitions: &[ParametersDefinitionSpec],
    descriptions: &[ComponentConfigDescription],
    options: &ValidatorOptions,
) -> Result<()> {
    let (Some(definition), Some(format_config)) = (
        resolve_definition(definitions, file),
        resolve_format_config(descriptions, file),
    ) else {
        return Ok(());
    };

    new_config_validator(definition.parameters_schema.as_ref(), format_config, options)
        .and_then(|validator| validator.validate(content))
        .context(ValidateConfigSnafu { file })
}

/// Merges parameter updates into `base_configs` without validating them, returning only the
/// files which were updated.
pub fn merge_parameters(
    base_configs: &BTreeMap<String, String>,
    updated_params: &[ParamPairs],
    definitions: &[ParametersDefinitionSpec],
    descriptions: &[ComponentConfigDescription],
) -> Result<BTreeMap<String, String>> {
    let keys = descriptions
        .iter()
        .map(|description| description.name.clone())
        .collect::<Vec<_>>();
    let resolve_format = |file: &str| resolve_format_config(descriptions, file).cloned();
    let mut collection = ConfigFileCollection::from_files(
        ObjectRegistry::builtin(),
        base_configs,
        &keys,
        FormatSource::PerFile(&resolve_format),
    )
    .context(LoadConfigsSnafu)?;

    let mut updated_files = BTreeSet::new();
    for params in updated_params {
        let file = params.key.as_str();
        let valid = filter_immutable_parameters(&params.updated_params, file, definitions);
        if valid.is_empty() {
            continue;
        }

        let format_config =
            resolve_format_config(descriptions, file).context(UnsupportedFileSnafu { file })?;
        collection
            .merge_from(
                &valid,
                &CfgOptions {
                    file: Some(file.to_owned()),
                    format_config: Some(format_config.clone()),
                },
            )
            .context(MergeParametersSnafu { file })?;
        debug!(%file, parameters = valid.len(), "merged parameters");
        updated_files.insert(file.to_owned());
    }

    let content = collection.to_cfg_content().context(GenerateConfigSnafu)?;

    // Marshalling may reformat a file, so only the files which were updated are taken over
    Ok(content
        .into_iter()
        .filter(|(file, _)| updated_files.contains(file))
        .collect())
}

/// Returns `base` with every file of `updated` added or replaced.
pub fn merge_updated_config(
    base: &BTreeMap<String, String>,
    updated: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(updated);
    merged
}

/// Whether the reload of dynamic parameters is a separate action, rather than being merged into
/// the restart.
pub fn need_dynamic_reload_action(definition: &ParametersDefinitionSpec) -> bool {
    definition
        .merge_reload_and_restart
        .is_some_and(|merge| !merge)
}

/// Whether static parameters are reloaded before the database is restarted.
pub fn reload_static_parameters(definition: &ParametersDefinitionSpec) -> bool {
    definition
        .reload_static_params_before_restart
        .unwrap_or_default()
}

pub(crate) fn resolve_definition<'a>(
    definitions: &'a [ParametersDefinitionSpec],
    file: &str,
) -> Option<&'a ParametersDefinitionSpec> {
    definitions
        .iter()
        .find(|definition| definition.applies_to(file))
}

pub(crate) fn resolve_format_config<'a>(
    descriptions: &'a [ComponentConfigDescription],
    file: &str,
) -> Option<&'a FileFormatConfig> {
    descriptions
        .iter()
        .find(|description| description.name == file)
        .and_then(|description| description.file_format_config.as_ref())
}

fn defined_parameters(file: &str, definition: &ParametersDefinitionSpec) -> Result<BTreeSet<String>> {
    let mut parameters = definition
        .static_parameters
        .iter()
        .chain(&definition.dynamic_parameters)
        .chain(&definition.immutable_parameters)
        .cloned()
        .collect::<BTreeSet<_>>();

    let Some(schema) = &definition.parameters_schema else {
        return Ok(parameters);
    };
    let json_schema = match schema.cue.as_deref().filter(|cue| !cue.trim().is_empty()) {
        Some(script) => ConstraintSchema::parse(script, schema.top_level_key.as_deref())
            .context(ParseConstraintSnafu { file })?
            .to_json_schema(),
        None => schema.schema_in_json.clone().unwrap_or(Value::Null),
    };

    let section = definition
        .file_format_config
        .as_ref()
        .and_then(FileFormatConfig::section_name);
    parameters.extend(schema_properties(&json_schema, section));
    Ok(parameters)
}

/// The property names of a schema, looking into the INI section if the schema declares it.
fn schema_properties(schema: &Value, section: Option<&str>) -> Vec<String> {
    let properties = |schema: &Value| schema.get("properties").and_then(Value::as_object).cloned();

    let top_level = properties(schema).unwrap_or_default();
    let selected = section
        .and_then(|section| top_level.get(section))
        .and_then(properties)
        .unwrap_or(top_level);
    selected.keys().cloned().collect()
}
