use std::{collections::HashMap, sync::LazyLock};

use snafu::OptionExt as _;
use tracing::debug;

use crate::{
    object::{
        ConfigObject, Result, UnsupportedFormatSnafu, dotenv::Dotenv, ini::Ini,
        properties::PropertiesObject, props_plus::PropertiesPlus, redis::RedisCfg,
        structured::{Hcl, Json, Toml},
        tree::TreeObject,
        xml::Xml,
        yaml::YamlObject,
    },
    spec::FileFormat,
};

/// Creates an empty object with the given name.
pub type Constructor = fn(name: &str) -> Box<dyn ConfigObject>;

static BUILTIN: LazyLock<ObjectRegistry> =
    LazyLock::new(|| ObjectRegistry::builder().with_builtin_formats().build());

/// Maps every [`FileFormat`] to the constructor of its [`ConfigObject`].
///
/// A registry is immutable once built. [`ObjectRegistry::builtin`] covers every format this
/// crate ships, custom registries can replace individual constructors through
/// [`ObjectRegistry::builder`].
#[derive(Clone, Debug)]
pub struct ObjectRegistry {
    constructors: HashMap<FileFormat, Constructor>,
}

impl ObjectRegistry {
    /// The process wide registry of all built-in formats.
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    pub fn builder() -> ObjectRegistryBuilder {
        ObjectRegistryBuilder::default()
    }

    pub fn supports(&self, format: FileFormat) -> bool {
        self.constructors.contains_key(&format)
    }

    /// Creates an empty object of the given format.
    pub fn new_object(&self, name: &str, format: FileFormat) -> Result<Box<dyn ConfigObject>> {
        let constructor = self
            .constructors
            .get(&format)
            .context(UnsupportedFormatSnafu { format })?;
        Ok(constructor(name))
    }

    /// Creates an object of the given format and parses `content` into it.
    pub fn load_config(
        &self,
        name: &str,
        content: &str,
        format: FileFormat,
    ) -> Result<Box<dyn ConfigObject>> {
        let mut object = self.new_object(name, format)?;
        object.unmarshal(content)?;
        debug!(file.name = name, file.format = %format, "loaded config file");
        Ok(object)
    }
}

#[derive(Debug, Default)]
pub struct ObjectRegistryBuilder {
    constructors: HashMap<FileFormat, Constructor>,
}

impl ObjectRegistryBuilder {
    pub fn with_builtin_formats(self) -> Self {
        self.register(FileFormat::Ini, TreeObject::<Ini>::boxed)
            .register(FileFormat::Yaml, YamlObject::boxed)
            .register(FileFormat::Json, TreeObject::<Json>::boxed)
            .register(FileFormat::Toml, TreeObject::<Toml>::boxed)
            .register(FileFormat::Xml, TreeObject::<Xml>::boxed)
            .register(FileFormat::Hcl, TreeObject::<Hcl>::boxed)
            .register(FileFormat::Dotenv, TreeObject::<Dotenv>::boxed)
            .register(FileFormat::Properties, PropertiesObject::boxed)
            .register(FileFormat::PropertiesPlus, TreeObject::<PropertiesPlus>::boxed)
            .register(FileFormat::RedisCfg, TreeObject::<RedisCfg>::boxed)
    }

    /// Registers `constructor` for `format`, replacing any previous constructor.
    pub fn register(mut self, format: FileFormat, constructor: Constructor) -> Self {
        self.constructors.insert(format, constructor);
        self
    }

    pub fn build(self) -> ObjectRegistry {
        ObjectRegistry {
            constructors: self.constructors,
        }
    }
}
