//! Resolution of the environment variables a container would see at runtime.

use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::{Arc, LazyLock},
};

use k8s_openapi::api::core::v1::{Container, EnvFromSource, EnvVar, EnvVarSource};
use kubeblocks_shared::quantity::{ParseQuantityError, Quantity};
use regex::{Captures, Regex};
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tracing::debug;

use crate::resource::{self, ResourceReader};

static VARIABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(([A-Za-z_][A-Za-z0-9_.-]*)\)").expect("failed to compile the reference regex")
});

const NAMESPACE_FIELD_PATH: &str = "metadata.namespace";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("env var {variable:?} not found in container {container:?}"))]
    VariableNotFound { variable: String, container: String },

    #[snafu(display("failed to read the sources of env var {variable:?}"))]
    ReadSource {
        variable: String,
        source: resource::Error,
    },

    #[snafu(display("failed to read the env sources of container {container:?}"))]
    ReadEnvFrom {
        container: String,
        source: resource::Error,
    },

    #[snafu(display("key {key:?} of env var {variable:?} not found in {kind} {name:?}"))]
    KeyNotFound {
        variable: String,
        kind: &'static str,
        name: String,
        key: String,
    },

    #[snafu(display("unsupported field path {field_path:?} of env var {variable:?}"))]
    UnsupportedFieldPath {
        variable: String,
        field_path: String,
    },

    #[snafu(display("container {container:?} referenced by env var {variable:?} not found"))]
    ContainerNotFound { variable: String, container: String },

    #[snafu(display("invalid quantity {quantity:?} in the resource field of env var {variable:?}"))]
    InvalidQuantity {
        variable: String,
        quantity: String,
        source: ParseQuantityError,
    },

    #[snafu(display("the divisor of env var {variable:?} must be positive"))]
    InvalidDivisor { variable: String },

    #[snafu(display(
        "failed to expand env var {variable:?}: too many reference count, maybe there is a \
         cycled reference"
    ))]
    CycledReference { variable: String },
}

/// Resolves env vars of the containers of a pod.
pub(crate) struct EnvResolver {
    namespace: String,
    containers: Vec<Container>,
    reader: Arc<dyn ResourceReader>,
    max_reference_count: usize,
}

impl EnvResolver {
    pub(crate) fn new(
        namespace: String,
        containers: Vec<Container>,
        reader: Arc<dyn ResourceReader>,
        max_reference_count: usize,
    ) -> Self {
        Self {
            namespace,
            containers,
            reader,
            max_reference_count,
        }
    }

    /// Returns the value of `variable` in `container` with all `$(VAR)` references expanded.
    ///
    /// Only `variable` and the variables it references are evaluated, a broken unrelated var of
    /// the container does not fail the lookup.
    pub(crate) fn resolve(&self, container: &Container, variable: &str) -> Result<String> {
        let mut scope = Scope {
            resolver: self,
            container,
            values: BTreeMap::new(),
        };
        let value = scope.lookup(variable)?.context(VariableNotFoundSnafu {
            variable,
            container: &container.name,
        })?;
        let value = scope.expand(variable, value)?;

        debug!(container = %container.name, %variable, "resolved env var");
        Ok(value)
    }

    /// The unexpanded value of `name` in `container`, [`None`] if the container does not define
    /// it. Variables of `env` override the ones of `envFrom`, later definitions override earlier
    /// ones.
    fn variable(&self, container: &Container, name: &str) -> Result<Option<String>> {
        for var in container.env.iter().flatten().rev().filter(|var| var.name == name) {
            if let Some(value) = self.env_value(container, var)? {
                return Ok(Some(value));
            }
        }

        for source in container.env_from.iter().flatten().rev() {
            let prefix = source.prefix.as_deref().unwrap_or_default();
            let Some(key) = name.strip_prefix(prefix) else {
                continue;
            };
            if let Some(value) = self.env_from(&container.name, source)?.remove(key) {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// The data of an `envFrom` source, without the prefix.
    fn env_from(&self, container: &str, source: &EnvFromSource) -> Result<BTreeMap<String, String>> {
        let data = if let Some(config_map) = &source.config_map_ref {
            skip_optional_not_found(
                self.reader.config_map(&self.namespace, &config_map.name),
                config_map.optional,
            )
        } else if let Some(secret) = &source.secret_ref {
            skip_optional_not_found(
                self.reader.secret(&self.namespace, &secret.name),
                secret.optional,
            )
        } else {
            Ok(None)
        };
        let data = data.context(ReadEnvFromSnafu { container })?;

        Ok(data.unwrap_or_default())
    }

    /// The value of a single var, [`None`] if an optional source is missing.
    fn env_value(&self, container: &Container, var: &EnvVar) -> Result<Option<String>> {
        let variable = var.name.as_str();
        let Some(source) = &var.value_from else {
            return Ok(Some(var.value.clone().unwrap_or_default()));
        };

        match source {
            EnvVarSource {
                config_map_key_ref: Some(selector),
                ..
            } => {
                let data = skip_optional_not_found(
                    self.reader.config_map(&self.namespace, &selector.name),
                    selector.optional,
                )
                .context(ReadSourceSnafu { variable })?;
                lookup_key(
                    variable,
                    "ConfigMap",
                    &selector.name,
                    &selector.key,
                    data,
                    selector.optional,
                )
            }
            EnvVarSource {
                secret_key_ref: Some(selector),
                ..
            } => {
                let data = skip_optional_not_found(
                    self.reader.secret(&self.namespace, &selector.name),
                    selector.optional,
                )
                .context(ReadSourceSnafu { variable })?;
                lookup_key(
                    variable,
                    "Secret",
                    &selector.name,
                    &selector.key,
                    data,
                    selector.optional,
                )
            }
            EnvVarSource {
                field_ref: Some(selector),
                ..
            } => {
                ensure!(
                    selector.field_path == NAMESPACE_FIELD_PATH,
                    UnsupportedFieldPathSnafu {
                        variable,
                        field_path: &selector.field_path,
                    }
                );
                Ok(Some(self.namespace.clone()))
            }
            EnvVarSource {
                resource_field_ref: Some(selector),
                ..
            } => {
                // An omitted container name refers to the container of the var itself
                let container_name = selector
                    .container_name
                    .as_deref()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(&container.name);
                let container = self
                    .containers
                    .iter()
                    .find(|container| container.name == container_name)
                    .context(ContainerNotFoundSnafu {
                        variable,
                        container: container_name,
                    })?;
                resource_field_value(
                    variable,
                    container,
                    &selector.resource,
                    selector.divisor.as_ref().map(|divisor| divisor.0.as_str()),
                )
                .map(Some)
            }
            _ => Ok(Some(String::new())),
        }
    }
}

/// The variables of one container looked up so far.
struct Scope<'a> {
    resolver: &'a EnvResolver,
    container: &'a Container,
    values: BTreeMap<String, Option<String>>,
}

impl Scope<'_> {
    fn lookup(&mut self, name: &str) -> Result<Option<String>> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }
        let value = self.resolver.variable(self.container, name)?;
        self.values.insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// Replaces `$(VAR)` references by their values until no defined reference is left.
    /// Undefined references are kept verbatim.
    fn expand(&mut self, variable: &str, mut value: String) -> Result<String> {
        for _ in 0..self.resolver.max_reference_count {
            if !self.has_defined_reference(&value)? {
                return Ok(value);
            }
            let values = &self.values;
            value = VARIABLE_REFERENCE
                .replace_all(&value, |captures: &Captures<'_>| {
                    values
                        .get(&captures[1])
                        .and_then(Option::as_ref)
                        .cloned()
                        .unwrap_or_else(|| captures[0].to_owned())
                })
                .into_owned();
        }

        ensure!(
            !self.has_defined_reference(&value)?,
            CycledReferenceSnafu { variable }
        );
        Ok(value)
    }

    /// Looks up every reference of `value`, returns whether any of them is defined.
    fn has_defined_reference(&mut self, value: &str) -> Result<bool> {
        let mut defined = false;
        for captures in VARIABLE_REFERENCE.captures_iter(value) {
            defined |= self.lookup(&captures[1])?.is_some();
        }
        Ok(defined)
    }
}

fn skip_optional_not_found(
    result: resource::Result<BTreeMap<String, String>>,
    optional: Option<bool>,
) -> resource::Result<Option<BTreeMap<String, String>>> {
    match result {
        Ok(data) => Ok(Some(data)),
        Err(error) if error.is_not_found() && optional.unwrap_or_default() => Ok(None),
        Err(error) => Err(error),
    }
}

fn lookup_key(
    variable: &str,
    kind: &'static str,
    name: &str,
    key: &str,
    data: Option<BTreeMap<String, String>>,
    optional: Option<bool>,
) -> Result<Option<String>> {
    let value = data.and_then(|mut data| data.remove(key));
    ensure!(
        value.is_some() || optional.unwrap_or_default(),
        KeyNotFoundSnafu {
            variable,
            kind,
            name,
            key,
        }
    );
    Ok(value)
}

/// The value of a `resourceFieldRef`: the resource divided by the divisor, rounded up.
/// Unset resources resolve to `0`.
fn resource_field_value(
    variable: &str,
    container: &Container,
    resource: &str,
    divisor: Option<&str>,
) -> Result<String> {
    let Some((kind, name)) = resource.split_once('.') else {
        return Ok("0".to_owned());
    };
    let quantity = container.resources.as_ref().and_then(|resources| {
        match kind {
            "limits" => resources.limits.as_ref(),
            "requests" => resources.requests.as_ref(),
            _ => None,
        }
        .and_then(|quantities| quantities.get(name))
    });
    let Some(quantity) = quantity else {
        return Ok("0".to_owned());
    };

    let value = parse_base_value(variable, &quantity.0)?;
    let divisor = match divisor {
        Some(divisor) => parse_base_value(variable, divisor)?,
        None => 1.0,
    };
    ensure!(divisor > 0.0, InvalidDivisorSnafu { variable });

    Ok(format!("{}", (value / divisor).ceil()))
}

fn parse_base_value(variable: &str, quantity: &str) -> Result<f64> {
    Quantity::from_str(quantity)
        .map(|quantity| quantity.as_base_value())
        .context(InvalidQuantitySnafu { variable, quantity })
}
