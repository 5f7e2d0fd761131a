//! A uniform view on config files of different formats.
//!
//! Every supported [`FileFormat`] implements [`ConfigObject`], which offers key path based
//! access to the parameters of a single file. Paths are split by the [`Delimiter`] of the
//! format: nested formats like YAML or JSON use `.`, INI uses `section.key`, and flat formats
//! like properties files never split, as their keys may contain dots themselves.
//!
//! Objects are constructed through an [`ObjectRegistry`], which maps each format to its
//! constructor.

use serde_json::Value;
use snafu::{OptionExt as _, Snafu};

use crate::spec::FileFormat;

mod dotenv;
mod ini;
mod properties;
mod props_plus;
mod redis;
mod registry;
mod structured;
mod tree;
mod xml;
mod yaml;

pub use registry::*;

pub type Map = serde_json::Map<String, Value>;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to parse {format} content"))]
    Parse {
        format: FileFormat,
        source: BoxedError,
    },

    #[snafu(display("failed to parse {format} content at line {line}: {message}"))]
    Syntax {
        format: FileFormat,
        line: usize,
        message: String,
    },

    #[snafu(display("failed to serialize {format} content"))]
    Serialize {
        format: FileFormat,
        source: BoxedError,
    },

    #[snafu(display("{format} can not represent the value of {path:?}"))]
    UnsupportedValue { format: FileFormat, path: String },

    #[snafu(display("failed to access {path:?}: {segment:?} is not a map"))]
    TypeMismatch { path: String, segment: String },

    #[snafu(display("parameter {path:?} not found"))]
    KeyNotFound { path: String },

    #[snafu(display("parameter {path:?} is not a scalar value"))]
    NotScalar { path: String },

    #[snafu(display("no constructor is registered for the {format} format"))]
    UnsupportedFormat { format: FileFormat },
}

/// How a key path is split into segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delimiter {
    /// Every `.` separates two levels of nesting.
    Dot,

    /// Only the first `.` separates the section from the key, `mysqld.loose.key` addresses
    /// `loose.key` in `[mysqld]`.
    Section,

    /// Keys are never split.
    Flat,
}

impl Delimiter {
    pub fn split<'a>(&self, path: &'a str) -> Vec<&'a str> {
        match self {
            Self::Dot => path.split('.').collect(),
            Self::Section => match path.split_once('.') {
                Some((section, key)) => vec![section, key],
                None => vec![path],
            },
            Self::Flat => vec![path],
        }
    }

    pub fn join(&self, prefix: &str, key: &str) -> String {
        match self {
            Self::Flat => key.to_owned(),
            Self::Dot | Self::Section if prefix.is_empty() => key.to_owned(),
            Self::Dot | Self::Section => format!("{prefix}.{key}"),
        }
    }
}

/// An in-memory representation of one config file.
///
/// Objects are not shared between threads, every reconfiguration constructs its own objects,
/// mutates them and marshals them back.
pub trait ConfigObject: std::fmt::Debug + Send {
    /// The logical name of the file, usually the file name.
    fn name(&self) -> &str;

    fn format(&self) -> FileFormat;

    fn delimiter(&self) -> Delimiter;

    /// Returns the value at `path`, or `None` if nothing is stored there.
    fn get(&self, path: &str) -> Option<Value>;

    /// Sets `path` to `value`, materializing missing parent maps.
    fn update(&mut self, path: &str, value: Value) -> Result<()>;

    /// Removes `path`. Removing a missing key is not an error.
    fn remove_key(&mut self, path: &str) -> Result<()>;

    /// Returns a snapshot of every parameter of the file as a (possibly nested) map.
    fn all_parameters(&self) -> Map;

    fn marshal(&self) -> Result<String>;

    /// Replaces the content of the object with the parsed `content`.
    fn unmarshal(&mut self, content: &str) -> Result<()>;

    /// Returns the value at `path` formatted as a string. Missing keys and non-scalar values
    /// are errors.
    fn get_string(&self, path: &str) -> Result<String> {
        let value = self.get(path).context(KeyNotFoundSnafu { path })?;
        scalar_to_string(&value).context(NotScalarSnafu { path })
    }
}

impl dyn ConfigObject + '_ {
    /// Returns a view on the map stored at `path`, or `None` if `path` does not hold a map.
    pub fn sub_config(&self, path: &str) -> Option<SubConfig<'_>> {
        match self.get(path) {
            Some(Value::Object(_)) => Some(SubConfig {
                object: self,
                prefix: path.to_owned(),
            }),
            _ => None,
        }
    }
}

/// A read-only view on a nested map of a [`ConfigObject`]. Lookups go to the underlying
/// object, so the view always reflects its current state.
#[derive(Debug, Clone)]
pub struct SubConfig<'a> {
    object: &'a dyn ConfigObject,
    prefix: String,
}

impl SubConfig<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.object.get(&self.object.delimiter().join(&self.prefix, path))
    }

    pub fn get_string(&self, path: &str) -> Result<String> {
        self.object
            .get_string(&self.object.delimiter().join(&self.prefix, path))
    }

    pub fn all_parameters(&self) -> Map {
        match self.object.get(&self.prefix) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Formats a scalar the way it is written into config files. Strings are not quoted.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
