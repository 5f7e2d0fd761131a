use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use indoc::indoc;
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec};
use kubeblocks_config::{
    loader::FormatSource,
    object::ObjectRegistry,
    options::{RenderOptions, ValidatorOptions},
    params::merge_and_validate_configs,
    patch::{create_config_patch, is_update_dynamic_parameters},
    reconfigure::{ReconfigureRequest, Reconfigurer, ReloadPolicy},
    render::{RenderContext, TemplateRenderer},
    resource::StaticResourceReader,
    spec::{
        ComponentConfigDescription, CustomTemplate, FileFormat, FileFormatConfig, MergedPolicy,
        ParamPairs, ParametersDefinitionSpec, ParametersSchema,
    },
    validate::new_config_validator,
};
use rstest::rstest;
use serde_json::{Value, json};

const MY_CNF: &str = indoc! {"
    [mysqld]
    max_connections=1000
    gtid_mode=ON
"};

fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(file, content)| ((*file).to_owned(), (*content).to_owned()))
        .collect()
}

fn flat_keys(value: &Value, prefix: &str, keys: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flat_keys(child, &path, keys);
            }
        }
        _ => {
            keys.insert(prefix.to_owned());
        }
    }
}

#[test]
fn ini_patch_end_to_end() {
    let request = ReconfigureRequest {
        current_files: files(&[("my.cnf", MY_CNF)]),
        custom_template: Some(CustomTemplate {
            policy: MergedPolicy::Patch,
            data: files(&[(
                "my.cnf",
                "[mysqld]\nmax_connections=666\ndefault_storage_engine=xengine\n",
            )]),
        }),
        descriptions: vec![ComponentConfigDescription {
            name: "my.cnf".to_owned(),
            template_name: "mysql-config".to_owned(),
            file_format_config: Some(FileFormatConfig::ini("mysqld")),
        }],
        ..ReconfigureRequest::default()
    };

    let outcome = Reconfigurer::new(ValidatorOptions::default())
        .reconfigure(&request)
        .unwrap();

    let my_cnf = &outcome.files["my.cnf"];
    assert!(my_cnf.contains("max_connections=666"), "{my_cnf}");
    assert!(my_cnf.contains("default_storage_engine=xengine"), "{my_cnf}");
    assert!(my_cnf.contains("gtid_mode=ON"), "{my_cnf}");
    // Without a parameters definition every change needs a restart
    assert_eq!(outcome.policy, ReloadPolicy::Restart);
}

#[test]
fn merge_and_validate_parameters() {
    let descriptions = [ComponentConfigDescription {
        name: "my.cnf".to_owned(),
        template_name: "mysql-config".to_owned(),
        file_format_config: Some(FileFormatConfig::ini("mysqld")),
    }];
    let definitions = [ParametersDefinitionSpec {
        file_name: Some("my.cnf".to_owned()),
        file_format_config: Some(FileFormatConfig::ini("mysqld")),
        parameters_schema: Some(ParametersSchema {
            top_level_key: Some("MysqlParameter".to_owned()),
            cue: Some(
                indoc! {r#"
                    #MysqlParameter: {
                        // connections
                        max_connections?: int & >=1 & <=100000 | *151
                        default_storage_engine?: string & "InnoDB" | "MyISAM" | "xengine"
                        gtid_mode?: "ON" | "OFF"
                        ...
                    }
                "#}
                .to_owned(),
            ),
            schema_in_json: None,
        }),
        ..ParametersDefinitionSpec::default()
    }];
    let update = |params: Value| ParamPairs {
        key: "my.cnf".to_owned(),
        updated_params: params.as_object().cloned().unwrap_or_default(),
    };

    let merged = merge_and_validate_configs(
        &files(&[("my.cnf", MY_CNF)]),
        &[update(json!({
            "max_connections": "666",
            "default_storage_engine": "xengine",
        }))],
        &definitions,
        &descriptions,
        &ValidatorOptions::default(),
    )
    .unwrap();
    assert_eq!(
        merged["my.cnf"],
        "[mysqld]\nmax_connections=666\ngtid_mode=ON\ndefault_storage_engine=xengine\n"
    );

    let error = merge_and_validate_configs(
        &files(&[("my.cnf", MY_CNF)]),
        &[update(json!({"default_storage_engine": "rocksdb"}))],
        &definitions,
        &descriptions,
        &ValidatorOptions::default(),
    )
    .unwrap_err();
    assert!(
        snafu::Report::from_error(&error)
            .to_string()
            .contains("default_storage_engine"),
        "{error}"
    );
}

#[rstest]
#[case::static_parameter(vec!["max_connections"], vec![], false)]
#[case::dynamic_parameter(vec![], vec!["max_connections"], true)]
#[case::other_static_parameter(vec!["gtid_mode"], vec![], true)]
#[case::undeclared(vec![], vec![], false)]
fn classification(
    #[case] static_parameters: Vec<&str>,
    #[case] dynamic_parameters: Vec<&str>,
    #[case] expected: bool,
) {
    let format = FileFormatConfig::ini("mysqld");
    let (patch, _) = create_config_patch(
        ObjectRegistry::builtin(),
        &files(&[("my.cnf", MY_CNF)]),
        &files(&[("my.cnf", "[mysqld]\nmax_connections=666\ngtid_mode=ON\n")]),
        FormatSource::Fixed(&format),
        &[],
        false,
    )
    .unwrap();

    let definition = ParametersDefinitionSpec {
        file_format_config: Some(format),
        static_parameters: static_parameters.into_iter().map(ToOwned::to_owned).collect(),
        dynamic_parameters: dynamic_parameters.into_iter().map(ToOwned::to_owned).collect(),
        ..ParametersDefinitionSpec::default()
    };
    assert_eq!(
        is_update_dynamic_parameters(&definition, &patch).unwrap(),
        expected
    );
}

#[test]
fn added_files_always_restart() {
    let format = FileFormatConfig::ini("mysqld");
    let (patch, _) = create_config_patch(
        ObjectRegistry::builtin(),
        &files(&[("my.cnf", MY_CNF)]),
        &files(&[("my.cnf", MY_CNF), ("extra.cnf", "[mysqld]\nport=3306\n")]),
        FormatSource::Fixed(&format),
        &[],
        false,
    )
    .unwrap();

    let definition = ParametersDefinitionSpec {
        dynamic_parameters: vec!["port".to_owned()],
        ..ParametersDefinitionSpec::default()
    };
    assert!(!is_update_dynamic_parameters(&definition, &patch).unwrap());
}

#[test]
fn empty_patch_is_idempotent() {
    let request = ReconfigureRequest {
        current_files: files(&[("my.cnf", MY_CNF)]),
        parameters: vec![ParamPairs {
            key: "my.cnf".to_owned(),
            updated_params: serde_json::Map::new(),
        }],
        descriptions: vec![ComponentConfigDescription {
            name: "my.cnf".to_owned(),
            template_name: "mysql-config".to_owned(),
            file_format_config: Some(FileFormatConfig::ini("mysqld")),
        }],
        ..ReconfigureRequest::default()
    };

    let outcome = Reconfigurer::new(ValidatorOptions::default())
        .reconfigure(&request)
        .unwrap();
    assert!(!outcome.patch.is_modify);
    assert_eq!(outcome.policy, ReloadPolicy::None);
    assert_eq!(outcome.files, request.current_files);
    assert!(outcome.visualized.is_empty());
}

#[test]
fn patch_partitions_the_changes() {
    let format = FileFormatConfig::new(FileFormat::Json);
    let old = files(&[
        ("a.json", r#"{"x": 1}"#),
        ("b.json", r#"{"kept": 1, "changed": 1, "deleted": 1, "nested": {"y": 1, "z": 1}}"#),
    ]);
    let new = files(&[
        ("b.json", r#"{"kept": 1, "changed": 2, "added": 1, "nested": {"y": 2, "z": 1}}"#),
        ("c.json", r#"{"x": 1}"#),
    ]);

    let (patch, _) = create_config_patch(
        ObjectRegistry::builtin(),
        &old,
        &new,
        FormatSource::Fixed(&format),
        &[],
        false,
    )
    .unwrap();

    let added = patch.add_config.keys().collect::<BTreeSet<_>>();
    let deleted = patch.delete_config.keys().collect::<BTreeSet<_>>();
    let updated = patch.update_config.keys().collect::<BTreeSet<_>>();
    assert_eq!(added, BTreeSet::from([&"c.json".to_owned()]));
    assert_eq!(deleted, BTreeSet::from([&"a.json".to_owned()]));
    assert_eq!(updated, BTreeSet::from([&"b.json".to_owned()]));

    let mut touched = BTreeSet::new();
    flat_keys(&patch.update_patch("b.json").unwrap().unwrap(), "", &mut touched);
    assert_eq!(
        touched,
        BTreeSet::from(["added", "changed", "deleted", "nested.y"].map(ToOwned::to_owned))
    );
}

#[test]
fn cycled_env_reference() {
    let env = [("A", "$(B)"), ("B", "$(C)"), ("C", "$(A)")]
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_owned(),
            value: Some(value.to_owned()),
            value_from: None,
        })
        .collect();
    let pod_spec = PodSpec {
        containers: vec![Container {
            name: "mysql".to_owned(),
            env: Some(env),
            ..Container::default()
        }],
        ..PodSpec::default()
    };

    let mut renderer = TemplateRenderer::new(
        RenderContext::new("default", pod_spec),
        Arc::new(StaticResourceReader::new()),
        &RenderOptions::default(),
    )
    .unwrap();
    let error = renderer
        .render_files(&files(&[(
            "env.conf",
            r#"a={{ getEnvByName(container=podSpec.containers[0], name="A") }}"#,
        )]))
        .unwrap_err();

    let message = error.to_string();
    assert!(message.starts_with("failed to render file \"env.conf\""), "{message}");
    assert!(message.contains("cycled reference"), "{message}");
}

#[rstest]
#[case("port = 5432\n", None)]
#[case("port = not-a-number\n", Some("port"))]
fn port_coercion(#[case] content: &str, #[case] failing_field: Option<&str>) {
    let schema = ParametersSchema {
        cue: Some("port: int".to_owned()),
        ..ParametersSchema::default()
    };
    let validator = new_config_validator(
        Some(&schema),
        &FileFormatConfig::new(FileFormat::Ini),
        &ValidatorOptions::default(),
    )
    .unwrap();

    match (validator.validate(content), failing_field) {
        (Ok(()), None) => {}
        (Err(error), Some(field)) => {
            assert!(error.to_string().contains(&format!("{field:?}")), "{error}");
        }
        (result, _) => panic!("unexpected validation result {result:?}"),
    }
}
