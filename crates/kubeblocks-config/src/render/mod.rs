//! Rendering of config templates.
//!
//! Templates are [Tera] templates. Besides the caller supplied values, every template sees these
//! objects:
//!
//! - `cluster`: the Cluster the config belongs to
//! - `component`: the synthesized component
//! - `podSpec`: the pod spec of the component
//! - `clusterDomain`: the domain of the Kubernetes cluster
//!
//! and lookup functions over them (`getEnvByName`, `getPortByName`, `getVolumePathByName`,
//! `callBufferSizeByResource`, ...), for example:
//!
//! ```text
//! {%- set mysql = getContainerByName(containers=podSpec.containers, name="mysql") -%}
//! {%- set port = getPortByName(container=mysql, name="mysql") -%}
//! [mysqld]
//! port={{ port.containerPort }}
//! datadir={{ getVolumePathByName(container=mysql, name="data") }}
//! innodb_buffer_pool_size={{ callBufferSizeByResource(container=mysql) }}
//! ```
//!
//! [Tera]: https://keats.github.io/tera/docs/

use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::api::core::v1::PodSpec;
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, instrument};

use crate::{options::RenderOptions, resource::ResourceReader};

mod env;
mod functions;
mod resources;

pub use env::Error as EnvError;
pub use resources::{buffer_pool_size, shared_buffers};

const CLUSTER_OBJECT: &str = "cluster";
const COMPONENT_OBJECT: &str = "component";
const POD_SPEC_OBJECT: &str = "podSpec";
const CLUSTER_DOMAIN_OBJECT: &str = "clusterDomain";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize the template object {name:?}"))]
    SerializeObject {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to render the template: {message}"))]
    Render { message: String },

    #[snafu(display("failed to render file {file:?}: {message}"))]
    RenderFile { file: String, message: String },
}

/// The objects templates are rendered with.
#[derive(Clone, Debug, Default)]
pub struct RenderContext {
    namespace: String,
    pod_spec: PodSpec,
    objects: Map<String, Value>,
}

impl RenderContext {
    pub fn new(namespace: impl Into<String>, pod_spec: PodSpec) -> Self {
        Self {
            namespace: namespace.into(),
            pod_spec,
            objects: Map::new(),
        }
    }

    pub fn with_cluster(self, cluster: &impl Serialize) -> Result<Self> {
        self.with_value(CLUSTER_OBJECT, cluster)
    }

    pub fn with_component(self, component: &impl Serialize) -> Result<Self> {
        self.with_value(COMPONENT_OBJECT, component)
    }

    /// Adds a value accessible as `name` in templates. Built-in objects take precedence over
    /// values of the same name.
    pub fn with_value(mut self, name: &str, value: &impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(value).context(SerializeObjectSnafu { name })?;
        self.objects.insert(name.to_owned(), value);
        Ok(self)
    }
}

/// Renders templates against a [`RenderContext`].
pub struct TemplateRenderer {
    tera: tera::Tera,
    context: tera::Context,
}

impl TemplateRenderer {
    pub fn new(
        context: RenderContext,
        reader: Arc<dyn ResourceReader>,
        options: &RenderOptions,
    ) -> Result<Self> {
        let RenderContext {
            namespace,
            pod_spec,
            mut objects,
        } = context;

        let pod_spec_value = serde_json::to_value(&pod_spec).context(SerializeObjectSnafu {
            name: POD_SPEC_OBJECT,
        })?;
        objects.insert(POD_SPEC_OBJECT.to_owned(), pod_spec_value);
        objects.insert(
            CLUSTER_DOMAIN_OBJECT.to_owned(),
            Value::String(options.cluster_domain.clone()),
        );
        for object in [CLUSTER_OBJECT, COMPONENT_OBJECT] {
            objects
                .entry(object)
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let mut tera_context = tera::Context::new();
        for (name, value) in &objects {
            tera_context.insert(name.as_str(), value);
        }

        let containers = pod_spec
            .init_containers
            .into_iter()
            .flatten()
            .chain(pod_spec.containers)
            .collect();
        let resolver = env::EnvResolver::new(
            namespace,
            containers,
            reader,
            options.max_reference_count,
        );

        let mut tera = tera::Tera::default();
        functions::register(&mut tera, resolver);

        Ok(Self {
            tera,
            context: tera_context,
        })
    }

    /// Renders a single template.
    pub fn render(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|error| {
                RenderSnafu {
                    message: error_chain(&error),
                }
                .build()
            })
    }

    /// Renders every template of `templates`, keyed by file name. Fails if any file fails.
    #[instrument(skip_all, fields(files = templates.len()))]
    pub fn render_files(
        &mut self,
        templates: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut rendered = BTreeMap::new();
        for (file, template) in templates {
            let content = self
                .tera
                .render_str(template, &self.context)
                .map_err(|error| {
                    RenderFileSnafu {
                        file,
                        message: error_chain(&error),
                    }
                    .build()
                })?;
            debug!(%file, bytes = content.len(), "rendered config file");
            rendered.insert(file.clone(), content);
        }
        Ok(rendered)
    }
}

/// Joins the messages of an error and all its sources, as Tera hides the actual cause of a
/// failure in the source chain.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(error) = source {
        message.push_str(": ");
        message.push_str(&error.to_string());
        source = error.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::{
        api::core::v1::{
            Container, ContainerPort, EnvVar, ResourceRequirements, Volume, VolumeMount,
        },
        apimachinery::pkg::api::resource::Quantity,
    };
    use serde_json::json;

    use super::*;
    use crate::resource::StaticResourceReader;

    fn pod_spec() -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "mysql".to_owned(),
                env: Some(vec![
                    EnvVar {
                        name: "A".to_owned(),
                        value: Some("$(B)".to_owned()),
                        value_from: None,
                    },
                    EnvVar {
                        name: "B".to_owned(),
                        value: Some("$(C)".to_owned()),
                        value_from: None,
                    },
                    EnvVar {
                        name: "C".to_owned(),
                        value: Some("$(A)".to_owned()),
                        value_from: None,
                    },
                    EnvVar {
                        name: "SERVICE_PORT".to_owned(),
                        value: Some("3306".to_owned()),
                        value_from: None,
                    },
                ]),
                ports: Some(vec![ContainerPort {
                    name: Some("mysql".to_owned()),
                    container_port: 3356,
                    ..ContainerPort::default()
                }]),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: "data".to_owned(),
                        mount_path: "/data/mysql".to_owned(),
                        ..VolumeMount::default()
                    },
                    VolumeMount {
                        name: "log".to_owned(),
                        mount_path: "/data/mysql/log".to_owned(),
                        ..VolumeMount::default()
                    },
                ]),
                resources: Some(ResourceRequirements {
                    limits: Some(BTreeMap::from([
                        ("cpu".to_owned(), Quantity("4".to_owned())),
                        ("memory".to_owned(), Quantity("8Gi".to_owned())),
                    ])),
                    ..ResourceRequirements::default()
                }),
                ..Container::default()
            }],
            volumes: Some(vec![Volume {
                name: "data".to_owned(),
                ..Volume::default()
            }]),
            ..PodSpec::default()
        }
    }

    fn renderer() -> TemplateRenderer {
        let context = RenderContext::new("default", pod_spec())
            .with_cluster(&json!({"metadata": {"name": "my-cluster"}}))
            .unwrap()
            .with_component(&json!({"name": "mysql", "replicas": 3}))
            .unwrap()
            .with_value("clusterDomain", &"overridden")
            .unwrap()
            .with_value("serverIdBase", &100)
            .unwrap();
        TemplateRenderer::new(
            context,
            Arc::new(StaticResourceReader::new()),
            &RenderOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn mysql_config() {
        let rendered = renderer()
            .render(indoc! {r#"
                {%- set container = podSpec.containers[0] -%}
                {%- set port = getPortByName(container=container, name="mysql") -%}
                [mysqld]
                cluster={{ cluster.metadata.name }}.{{ component.name }}.{{ clusterDomain }}
                port={{ port.containerPort }}
                server-id={{ serverIdBase + component.replicas }}
                datadir={{ getVolumePathByName(container=container, name="data") }}
                log-error={{ getVolumePathByName(container=container, name="log") }}/mysqld.err
                innodb-buffer-pool-size={{ callBufferSizeByResource(container=container) }}
                memory={{ getContainerMemory(container=container) }}
                service-port={{ getEnvByName(container=container, name="SERVICE_PORT") }}
            "#})
            .unwrap();

        assert_eq!(
            rendered,
            indoc! {"
                [mysqld]
                cluster=my-cluster.mysql.cluster.local
                port=3356
                server-id=103
                datadir=/data/mysql
                log-error=/data/mysql/log/mysqld.err
                innodb-buffer-pool-size=4096M
                memory=8589934592
                service-port=3306
            "}
        );
    }

    #[test]
    fn invalid_lookups() {
        let rendered = renderer()
            .render(indoc! {r#"
                {%- set container = podSpec.containers[0] -%}
                {%- set port = getPortByName(container=container, name="invalid") -%}
                {%- set pvc = getPVCByName(volumes=podSpec.volumes, name="invalid") -%}
                {% if port %}port{% else %}no port{% endif %}
                {% if pvc %}pvc{% else %}no pvc{% endif %}
                path=[{{ getVolumePathByName(container=container, name="invalid") }}]
                arg=[{{ getArgByName(container=container, name="invalid") }}]
            "#})
            .unwrap();

        assert_eq!(rendered, "no port\nno pvc\npath=[]\narg=[]\n");
    }

    #[test]
    fn cycled_env_reference() {
        let error = renderer()
            .render(r#"{{ getEnvByName(container=podSpec.containers[0], name="A") }}"#)
            .unwrap_err();

        let message = error.to_string();
        assert!(
            message.contains("too many reference count, maybe there is a cycled reference"),
            "{message}"
        );
    }

    #[test]
    fn undefined_env() {
        let error = renderer()
            .render(r#"{{ getEnvByName(container=podSpec.containers[0], name="NOPE") }}"#)
            .unwrap_err();
        assert!(error.to_string().contains("env var \"NOPE\" not found"), "{error}");
    }

    #[test]
    fn render_files_names_the_failing_file() {
        let mut renderer = renderer();
        let templates = BTreeMap::from([
            ("my.cnf".to_owned(), "port={{ podSpec.containers[0].ports[0].containerPort }}".to_owned()),
            ("broken.cnf".to_owned(), "{{ undefined_object.value }}".to_owned()),
        ]);

        let error = renderer.render_files(&templates).unwrap_err();
        let Error::RenderFile { file, .. } = &error else {
            panic!("expected a file error, got {error}");
        };
        assert_eq!(file, "broken.cnf");

        let rendered = renderer
            .render_files(&BTreeMap::from([(
                "my.cnf".to_owned(),
                "port={{ podSpec.containers[0].ports[0].containerPort }}".to_owned(),
            )]))
            .unwrap();
        assert_eq!(rendered["my.cnf"], "port=3356");
    }
}
