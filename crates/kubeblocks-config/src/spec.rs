//! Types describing configuration templates and their parameters.
//!
//! These mirror the `ParametersDefinition`, `ComponentParameter` and `ConfigConstraint` custom
//! resources of KubeBlocks, but only carry the fields the rendering and reconfiguration pipeline
//! consumes. Fetching and persisting the resources is left to the caller.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The name of the config file format. Every format has its own parser and serializer, see
/// [`crate::object`].
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum FileFormat {
    #[serde(rename = "ini")]
    #[strum(serialize = "ini")]
    Ini,

    #[serde(rename = "yaml")]
    #[strum(serialize = "yaml")]
    Yaml,

    #[serde(rename = "json")]
    #[strum(serialize = "json")]
    Json,

    #[serde(rename = "toml")]
    #[strum(serialize = "toml")]
    Toml,

    #[serde(rename = "xml")]
    #[strum(serialize = "xml")]
    Xml,

    #[serde(rename = "hcl")]
    #[strum(serialize = "hcl")]
    Hcl,

    #[serde(rename = "dotenv")]
    #[strum(serialize = "dotenv")]
    Dotenv,

    #[serde(rename = "properties")]
    #[strum(serialize = "properties")]
    Properties,

    /// Java properties with `:` and whitespace separators and line continuations.
    #[serde(rename = "props-plus")]
    #[strum(serialize = "props-plus")]
    PropertiesPlus,

    /// The `redis.conf` format, where keys may be repeated (e.g. `save`).
    #[serde(rename = "redis")]
    #[strum(serialize = "redis")]
    RedisCfg,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IniConfig {
    /// The section the parameters of this file live in, e.g. `mysqld`. Flat parameter names
    /// are addressed below this section.
    pub section_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFormatConfig {
    pub format: FileFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ini_config: Option<IniConfig>,
}

impl FileFormatConfig {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            ini_config: None,
        }
    }

    pub fn ini(section_name: impl Into<String>) -> Self {
        Self {
            format: FileFormat::Ini,
            ini_config: Some(IniConfig {
                section_name: Some(section_name.into()),
            }),
        }
    }

    /// Returns the INI section, if this is an INI file with a configured section.
    pub fn section_name(&self) -> Option<&str> {
        match self.format {
            FileFormat::Ini => self
                .ini_config
                .as_ref()
                .and_then(|ini| ini.section_name.as_deref())
                .filter(|section| !section.is_empty()),
            _ => None,
        }
    }
}

impl From<FileFormat> for FileFormatConfig {
    fn from(format: FileFormat) -> Self {
        Self::new(format)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersSchema {
    /// The definition inside the constraint script the file content is validated against,
    /// e.g. `MysqlParameter` for `#MysqlParameter: { ... }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_level_key: Option<String>,

    /// A script in the constraint language, see [`crate::constraint`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cue: Option<String>,

    /// An OpenAPI v3 style schema of the parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_in_json: Option<serde_json::Value>,
}

/// Describes the parameters of a single config file: how they are validated and which of them
/// can be changed without restarting the database.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersDefinitionSpec {
    /// The config file this definition applies to. `None` applies it to every file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format_config: Option<FileFormatConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_schema: Option<ParametersSchema>,

    /// Parameters which require a restart of the database.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_parameters: Vec<String>,

    /// Parameters which can be reloaded while the database is running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_parameters: Vec<String>,

    /// Parameters which must never be changed by a reconfiguration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub immutable_parameters: Vec<String>,

    /// Apply a reload and a restart within a single action instead of two.
    #[serde(default)]
    pub merge_reload_and_restart: Option<bool>,

    /// Reload the static parameters which changed before restarting.
    #[serde(default)]
    pub reload_static_params_before_restart: Option<bool>,
}

impl ParametersDefinitionSpec {
    pub fn applies_to(&self, file_name: &str) -> bool {
        self.file_name.as_deref().is_none_or(|name| name == file_name)
    }

    pub fn is_immutable(&self, parameter: &str) -> bool {
        self.immutable_parameters.iter().any(|p| p == parameter)
    }
}

/// Describes one file rendered from a config template.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfigDescription {
    /// The name of the file, e.g. `my.cnf`.
    pub name: String,

    /// The config template the file is rendered from.
    #[serde(default)]
    pub template_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format_config: Option<FileFormatConfig>,
}

/// Decides how a user supplied template is combined with the rendered template.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum MergedPolicy {
    /// The user template overrides each file it contains.
    #[default]
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    None,

    /// Parameters of the user template are merged into the rendered files.
    #[serde(rename = "patch")]
    #[strum(serialize = "patch")]
    Patch,

    /// The rendered files are dropped and replaced by the user template.
    #[serde(rename = "replace")]
    #[strum(serialize = "replace")]
    Replace,

    /// Only parameters missing from the rendered files are added.
    #[serde(rename = "add")]
    #[strum(serialize = "add")]
    OnlyAdd,
}

/// A user supplied template which is merged with the rendered config template.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTemplate {
    #[serde(default)]
    pub policy: MergedPolicy,

    /// The file contents of the template, keyed by file name.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Parameter updates for a single file. A `null` value deletes the parameter.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamPairs {
    /// The file the parameters belong to.
    pub key: String,

    pub updated_params: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ini", FileFormat::Ini)]
    #[case("props-plus", FileFormat::PropertiesPlus)]
    #[case("redis", FileFormat::RedisCfg)]
    #[case("dotenv", FileFormat::Dotenv)]
    fn file_format_names(#[case] input: &str, #[case] expected: FileFormat) {
        assert_eq!(FileFormat::from_str(input).unwrap(), expected);
        assert_eq!(expected.to_string(), input);

        let deserialized: FileFormat = serde_json::from_value(input.into()).unwrap();
        assert_eq!(deserialized, expected);
    }

    #[test]
    fn section_name_only_for_ini() {
        assert_eq!(FileFormatConfig::ini("mysqld").section_name(), Some("mysqld"));

        let yaml = FileFormatConfig {
            format: FileFormat::Yaml,
            ini_config: Some(IniConfig {
                section_name: Some("mysqld".to_owned()),
            }),
        };
        assert_eq!(yaml.section_name(), None);
    }

    #[test]
    fn deserialize_parameters_definition() {
        let spec: ParametersDefinitionSpec = serde_yaml::from_str(
            "fileName: my.cnf\n\
             fileFormatConfig:\n  format: ini\n  iniConfig:\n    sectionName: mysqld\n\
             staticParameters: [innodb_buffer_pool_size]\n\
             dynamicParameters: [max_connections]\n",
        )
        .unwrap();

        assert!(spec.applies_to("my.cnf"));
        assert!(!spec.applies_to("other.cnf"));
        assert_eq!(
            spec.file_format_config,
            Some(FileFormatConfig::ini("mysqld"))
        );
        assert_eq!(spec.dynamic_parameters, vec!["max_connections"]);
    }
}
