use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    object::{Map, scalar_to_string},
    patch::{ConfigPatchInfo, Result},
    spec::FileFormatConfig,
};

/// Marks parameters holding a list. The list is JSON encoded into the value and replaces the
/// old list as a whole.
pub const ARRAY_FIELD_PREFIX: &str = "@array:";

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
)]
pub enum ParameterUpdateType {
    #[serde(rename = "add")]
    #[strum(serialize = "add")]
    Added,

    #[serde(rename = "update")]
    #[strum(serialize = "update")]
    Updated,

    #[serde(rename = "delete")]
    #[strum(serialize = "delete")]
    Deleted,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterPair {
    pub key: String,

    /// The new value, `None` for deleted parameters.
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

/// The parameters of one file which changed in the same way.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizedParam {
    /// The name of the file.
    pub key: String,

    pub update_type: ParameterUpdateType,

    pub parameters: Vec<ParameterPair>,
}

/// Flattens a patch into a list of changed parameters, grouped by file and kind of change.
///
/// Nested keys are joined with `.`. If `format_config` names an INI section, its prefix is
/// trimmed from the keys. Only the listed `files` are included, unless the list is empty.
pub fn generate_visualized_params_list(
    patch: &ConfigPatchInfo,
    format_config: Option<&FileFormatConfig>,
    files: &[String],
) -> Result<Vec<VisualizedParam>> {
    if !patch.is_modify {
        return Ok(Vec::new());
    }

    let section = format_config.and_then(FileFormatConfig::section_name);
    let selected = |file: &str| files.is_empty() || files.iter().any(|f| f == file);
    let mut params = Vec::new();

    for file in patch.update_config.keys().filter(|file| selected(file)) {
        let Some(Value::Object(update)) = patch.update_patch(file)? else {
            continue;
        };
        let old_parameters = patch
            .last_version
            .get(file)
            .map(|object| Value::Object(object.all_parameters()));

        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();

        for (segments, value) in leaf_segments(&update) {
            let old = old_parameters
                .as_ref()
                .and_then(|old| lookup_segments(old, &segments));
            let path = segments.join(".");
            let key = visualized_key(
                &path,
                value.is_array() || old.is_some_and(Value::is_array),
                section,
            );
            let old_value = old.map(format_value);

            match (value, old_value) {
                (Value::Null, old_value) => deleted.push(ParameterPair {
                    key,
                    value: None,
                    old_value,
                }),
                (value, None) => added.push(ParameterPair {
                    key,
                    value: Some(format_value(value)),
                    old_value: None,
                }),
                (value, old_value) => updated.push(ParameterPair {
                    key,
                    value: Some(format_value(value)),
                    old_value,
                }),
            }
        }

        for (update_type, parameters) in [
            (ParameterUpdateType::Updated, updated),
            (ParameterUpdateType::Added, added),
            (ParameterUpdateType::Deleted, deleted),
        ] {
            if !parameters.is_empty() {
                params.push(VisualizedParam {
                    key: file.clone(),
                    update_type,
                    parameters,
                });
            }
        }
    }

    for (update_type, configs) in [
        (ParameterUpdateType::Added, &patch.add_config),
        (ParameterUpdateType::Deleted, &patch.delete_config),
    ] {
        for (file, parameters) in configs.iter().filter(|(file, _)| selected(file)) {
            let parameters: Vec<_> = flatten_leaves(parameters)
                .into_iter()
                .map(|(path, value)| {
                    let key = visualized_key(&path, value.is_array(), section);
                    let value = Some(format_value(value));
                    match update_type {
                        ParameterUpdateType::Deleted => ParameterPair {
                            key,
                            value: None,
                            old_value: value,
                        },
                        _ => ParameterPair {
                            key,
                            value,
                            old_value: None,
                        },
                    }
                })
                .collect();

            if !parameters.is_empty() {
                params.push(VisualizedParam {
                    key: file.clone(),
                    update_type,
                    parameters,
                });
            }
        }
    }

    Ok(params)
}

/// Returns every leaf of `tree` with its `.` joined path. Lists are leaves.
pub(crate) fn flatten_leaves(tree: &Map) -> Vec<(String, &Value)> {
    leaf_segments(tree)
        .into_iter()
        .map(|(segments, value)| (segments.join("."), value))
        .collect()
}

/// Returns every leaf of `tree` with the keys leading to it. Keys may contain `.` themselves.
fn leaf_segments(tree: &Map) -> Vec<(Vec<&str>, &Value)> {
    let mut leaves = Vec::new();
    collect_leaves(&mut Vec::new(), tree, &mut leaves);
    leaves
}

fn collect_leaves<'a>(
    prefix: &mut Vec<&'a str>,
    tree: &'a Map,
    leaves: &mut Vec<(Vec<&'a str>, &'a Value)>,
) {
    for (key, value) in tree {
        prefix.push(key);
        match value {
            Value::Object(nested) => collect_leaves(prefix, nested, leaves),
            value => leaves.push((prefix.clone(), value)),
        }
        prefix.pop();
    }
}

fn lookup_segments<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(tree, |value, segment| value.as_object()?.get(*segment))
}

/// Removes the prefix of the INI section from `path`.
pub(crate) fn trim_section<'a>(path: &'a str, section: Option<&str>) -> &'a str {
    section
        .and_then(|section| path.strip_prefix(section))
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(path)
}

fn visualized_key(path: &str, is_array: bool, section: Option<&str>) -> String {
    let key = trim_section(path, section);
    if is_array {
        format!("{ARRAY_FIELD_PREFIX}{key}")
    } else {
        key.to_owned()
    }
}

fn format_value(value: &Value) -> String {
    scalar_to_string(value).unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use indoc::indoc;

    use super::*;
    use crate::{
        loader::FormatSource,
        object::ObjectRegistry,
        patch::create_config_patch,
        spec::FileFormat,
    };

    fn patch_of(old: &str, new: &str, format: &FileFormatConfig) -> ConfigPatchInfo {
        let old = BTreeMap::from([("my.cnf".to_owned(), old.to_owned())]);
        let new = BTreeMap::from([("my.cnf".to_owned(), new.to_owned())]);
        create_config_patch(
            ObjectRegistry::builtin(),
            &old,
            &new,
            FormatSource::Fixed(format),
            &[],
            false,
        )
        .unwrap()
        .0
    }

    fn pair(key: &str, value: Option<&str>, old_value: Option<&str>) -> ParameterPair {
        ParameterPair {
            key: key.to_owned(),
            value: value.map(str::to_owned),
            old_value: old_value.map(str::to_owned),
        }
    }

    #[test]
    fn ini_updates_are_grouped_and_trimmed() {
        let format = FileFormatConfig::ini("mysqld");
        let patch = patch_of(
            indoc! {"
                [mysqld]
                max_connections=1000
                gtid_mode=ON
            "},
            indoc! {"
                [mysqld]
                max_connections=666
                default_storage_engine=xengine
            "},
            &format,
        );

        let params = generate_visualized_params_list(&patch, Some(&format), &[]).unwrap();
        assert_eq!(
            params,
            vec![
                VisualizedParam {
                    key: "my.cnf".to_owned(),
                    update_type: ParameterUpdateType::Updated,
                    parameters: vec![pair("max_connections", Some("666"), Some("1000"))],
                },
                VisualizedParam {
                    key: "my.cnf".to_owned(),
                    update_type: ParameterUpdateType::Added,
                    parameters: vec![pair("default_storage_engine", Some("xengine"), None)],
                },
                VisualizedParam {
                    key: "my.cnf".to_owned(),
                    update_type: ParameterUpdateType::Deleted,
                    parameters: vec![pair("gtid_mode", None, Some("ON"))],
                },
            ]
        );
    }

    #[test]
    fn arrays_are_tagged() {
        let format = FileFormatConfig::new(FileFormat::RedisCfg);
        let patch = patch_of(
            "save 900 1\nsave 300 10\n",
            "save 900 1\nsave 60 10000\n",
            &format,
        );

        let params = generate_visualized_params_list(&patch, Some(&format), &[]).unwrap();
        assert_eq!(
            params[0].parameters,
            vec![pair(
                "@array:save",
                Some(r#"["900 1","60 10000"]"#),
                Some(r#"["900 1","300 10"]"#)
            )]
        );
    }

    #[test]
    fn unmodified_patch_is_empty() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let patch = patch_of("[a]\nb=1\n", "[a]\nb=1\n", &format);
        assert!(
            generate_visualized_params_list(&patch, Some(&format), &[])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn file_filter() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let patch = patch_of("[a]\nb=1\n", "[a]\nb=2\n", &format);
        let params =
            generate_visualized_params_list(&patch, Some(&format), &["other.cnf".to_owned()])
                .unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn added_and_updated_and_deleted_keys_partition_the_change() {
        let format = FileFormatConfig::new(FileFormat::Json);
        let old = r#"{"a": "1", "b": {"c": "2", "d": "3"}, "e": "4"}"#;
        let new = r#"{"a": "1", "b": {"c": "20", "f": "5"}, "g": "6"}"#;
        let patch = patch_of(old, new, &format);

        let params = generate_visualized_params_list(&patch, None, &[]).unwrap();
        let keys_of = |update_type: ParameterUpdateType| -> BTreeSet<String> {
            params
                .iter()
                .filter(|param| param.update_type == update_type)
                .flat_map(|param| param.parameters.iter().map(|p| p.key.clone()))
                .collect()
        };

        let added = keys_of(ParameterUpdateType::Added);
        let updated = keys_of(ParameterUpdateType::Updated);
        let deleted = keys_of(ParameterUpdateType::Deleted);

        assert!(added.is_disjoint(&updated));
        assert!(added.is_disjoint(&deleted));
        assert!(updated.is_disjoint(&deleted));

        let all: BTreeSet<_> = added.union(&updated).chain(&deleted).cloned().collect();
        let expected: BTreeSet<_> = ["b.c", "b.d", "b.f", "e", "g"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        assert_eq!(all, expected);
        assert_eq!(added, BTreeSet::from(["b.f".to_owned(), "g".to_owned()]));
        assert_eq!(updated, BTreeSet::from(["b.c".to_owned()]));
    }

    #[test]
    fn dotted_keys_keep_their_old_value() {
        let format = FileFormatConfig::new(FileFormat::Json);
        let patch = patch_of(
            r#"{"log.level": "info", "net": {"bind.address": "0.0.0.0"}}"#,
            r#"{"log.level": "debug", "net": {"bind.address": "127.0.0.1"}}"#,
            &format,
        );

        let params = generate_visualized_params_list(&patch, None, &[]).unwrap();
        assert_eq!(
            params,
            vec![VisualizedParam {
                key: "my.cnf".to_owned(),
                update_type: ParameterUpdateType::Updated,
                parameters: vec![
                    pair("log.level", Some("debug"), Some("info")),
                    pair("net.bind.address", Some("127.0.0.1"), Some("0.0.0.0")),
                ],
            }]
        );
    }

    #[test]
    fn whole_files() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let old = BTreeMap::from([("old.cnf".to_owned(), "[s]\nk=v\n".to_owned())]);
        let new = BTreeMap::from([("new.cnf".to_owned(), "[s]\nk=w\n".to_owned())]);
        let (patch, _) = create_config_patch(
            ObjectRegistry::builtin(),
            &old,
            &new,
            FormatSource::Fixed(&format),
            &[],
            false,
        )
        .unwrap();

        let params = generate_visualized_params_list(&patch, None, &[]).unwrap();
        assert_eq!(
            params,
            vec![
                VisualizedParam {
                    key: "new.cnf".to_owned(),
                    update_type: ParameterUpdateType::Added,
                    parameters: vec![pair("s.k", Some("w"), None)],
                },
                VisualizedParam {
                    key: "old.cnf".to_owned(),
                    update_type: ParameterUpdateType::Deleted,
                    parameters: vec![pair("s.k", None, Some("v"))],
                },
            ]
        );
    }

    #[test]
    fn section_trimming() {
        assert_eq!(trim_section("mysqld.port", Some("mysqld")), "port");
        assert_eq!(trim_section("client.port", Some("mysqld")), "client.port");
        assert_eq!(trim_section("mysqldx.port", Some("mysqld")), "mysqldx.port");
        assert_eq!(trim_section("mysqld.port", None), "mysqld.port");
    }
}
