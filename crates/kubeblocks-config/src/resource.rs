//! Access to the Kubernetes objects referenced by templates.
//!
//! The pipeline never talks to the API server itself. Callers fetch (and cache) ConfigMaps and
//! Secrets however they see fit and hand them in through a [`ResourceReader`].

use std::collections::{BTreeMap, HashMap};

use snafu::{OptionExt as _, Snafu};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("ConfigMap {namespace}/{name} not found"))]
    ConfigMapNotFound { namespace: String, name: String },

    #[snafu(display("Secret {namespace}/{name} not found"))]
    SecretNotFound { namespace: String, name: String },

    #[snafu(display("failed to read {kind} {namespace}/{name}"))]
    Read {
        kind: String,
        namespace: String,
        name: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConfigMapNotFound { .. } | Self::SecretNotFound { .. }
        )
    }
}

/// Reads the data of ConfigMaps and Secrets.
pub trait ResourceReader: Send + Sync {
    fn config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    /// Returns the decoded data of a Secret.
    fn secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;
}

/// A [`ResourceReader`] over objects which were fetched up front.
#[derive(Clone, Debug, Default)]
pub struct StaticResourceReader {
    config_maps: HashMap<(String, String), BTreeMap<String, String>>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
}

impl StaticResourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_map<K, V>(
        mut self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.config_maps.insert(
            (namespace.to_owned(), name.to_owned()),
            data.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }

    pub fn with_secret<K, V>(
        mut self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.secrets.insert(
            (namespace.to_owned(), name.to_owned()),
            data.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }
}

impl ResourceReader for StaticResourceReader {
    fn config_map(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.config_maps
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .context(ConfigMapNotFoundSnafu { namespace, name })
    }

    fn secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.secrets
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .context(SecretNotFoundSnafu { namespace, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_reader() {
        let reader = StaticResourceReader::new()
            .with_config_map("default", "mysql-config", [("my.cnf", "[mysqld]\n")])
            .with_secret("default", "mysql-account", [("password", "s3cr3t")]);

        assert_eq!(
            reader.config_map("default", "mysql-config").unwrap()["my.cnf"],
            "[mysqld]\n"
        );
        assert_eq!(
            reader.secret("default", "mysql-account").unwrap()["password"],
            "s3cr3t"
        );

        let err = reader.config_map("other", "mysql-config").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "ConfigMap other/mysql-config not found");
    }
}
