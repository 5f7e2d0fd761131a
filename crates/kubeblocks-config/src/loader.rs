//! Loads a set of named config files into a [`ConfigFileCollection`].

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use serde_json_path::JsonPath;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::{debug, instrument};

use crate::{
    object::{self, ConfigObject, Map, ObjectRegistry},
    resource,
    spec::FileFormatConfig,
};

/// The name of the single file created for [`ConfigType::Raw`] content.
pub const RAW_FILE_NAME: &str = "raw";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load file {file:?} as {format}"))]
    LoadFile {
        file: String,
        format: crate::spec::FileFormat,
        source: object::Error,
    },

    #[snafu(display("failed to read the config files"))]
    ReadSource { source: resource::Error },

    #[snafu(display("config type {config_type:?} requires a resource reader"))]
    MissingResource { config_type: ConfigType },

    #[snafu(display("no file format is known for file {file:?}"))]
    MissingFormat { file: String },

    #[snafu(display("failed to marshal file {file:?}"))]
    Marshal { file: String, source: object::Error },

    #[snafu(display("file {file:?} not found"))]
    FileNotFound { file: String },

    #[snafu(display("a file name is required, the collection holds {count} files"))]
    AmbiguousFile { count: usize },

    #[snafu(display("invalid JSONPath {path:?}"))]
    InvalidJsonPath {
        path: String,
        source: serde_json_path::ParseError,
    },

    #[snafu(display("JSONPath {path:?} did not match anything"))]
    NoMatch { path: String },

    #[snafu(display("failed to serialize the query result"))]
    SerializeQueryResult { source: serde_json::Error },

    #[snafu(display("failed to update parameter {parameter:?} of file {file:?}"))]
    UpdateParameter {
        parameter: String,
        file: String,
        source: object::Error,
    },
}

/// Where the content of the config files comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ConfigType {
    /// A single blob of content, stored as the file [`RAW_FILE_NAME`].
    Raw,

    /// The data of a ConfigMap, one file per key.
    ConfigMap,

    /// The data of a config template ConfigMap, one file per key.
    Template,
}

/// Returns the files of a ConfigMap or template.
pub type ResourceFn<'a> = &'a dyn Fn() -> resource::Result<BTreeMap<String, String>>;

/// Returns the format of the file with the given name, if it is known.
pub type FormatResolver<'a> = &'a dyn Fn(&str) -> Option<FileFormatConfig>;

/// Decides which format each loaded file is parsed with.
#[derive(Clone, Copy)]
pub enum FormatSource<'a> {
    /// Every file has the same format.
    Fixed(&'a FileFormatConfig),

    /// The format is looked up per file name.
    PerFile(FormatResolver<'a>),
}

impl FormatSource<'_> {
    fn resolve(&self, file: &str) -> Option<FileFormatConfig> {
        match self {
            Self::Fixed(config) => Some((*config).clone()),
            Self::PerFile(resolver) => resolver(file),
        }
    }
}

impl std::fmt::Debug for FormatSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(config) => f.debug_tuple("Fixed").field(config).finish(),
            Self::PerFile(_) => f.debug_tuple("PerFile").finish_non_exhaustive(),
        }
    }
}

pub struct ConfigLoaderOptions<'a> {
    pub config_type: ConfigType,

    /// The content of [`ConfigType::Raw`] sources.
    pub raw_data: &'a str,

    /// Fetches the files of [`ConfigType::ConfigMap`] and [`ConfigType::Template`] sources.
    pub resource: Option<ResourceFn<'a>>,

    /// Only the listed files are loaded. An empty list loads every file.
    pub keys: &'a [String],

    pub format: FormatSource<'a>,
}

impl<'a> ConfigLoaderOptions<'a> {
    pub fn raw(content: &'a str, format: &'a FileFormatConfig) -> Self {
        Self {
            config_type: ConfigType::Raw,
            raw_data: content,
            resource: None,
            keys: &[],
            format: FormatSource::Fixed(format),
        }
    }

    pub fn config_map(resource: ResourceFn<'a>, format: FormatSource<'a>) -> Self {
        Self {
            config_type: ConfigType::ConfigMap,
            raw_data: "",
            resource: Some(resource),
            keys: &[],
            format,
        }
    }

    pub fn template(resource: ResourceFn<'a>, format: FormatSource<'a>) -> Self {
        Self {
            config_type: ConfigType::Template,
            ..Self::config_map(resource, format)
        }
    }

    pub fn with_keys(mut self, keys: &'a [String]) -> Self {
        self.keys = keys;
        self
    }
}

/// Options of [`ConfigFileCollection::query`].
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// The file to query. Can be omitted if the collection holds a single file.
    pub file: Option<String>,

    /// Query a map of all files, keyed by file name, instead of a single file.
    pub all_search: bool,
}

/// Options of [`ConfigFileCollection::merge_from`].
#[derive(Clone, Debug, Default)]
pub struct CfgOptions {
    /// The file to update. Can be omitted if the collection holds a single file.
    pub file: Option<String>,

    /// Used to address flat parameter names below the configured INI section.
    pub format_config: Option<FileFormatConfig>,
}

/// Zero or more named config files.
///
/// Files keep the order they were loaded in, and can be looked up by name.
#[derive(Debug, Default)]
pub struct ConfigFileCollection {
    objects: Vec<Box<dyn ConfigObject>>,
    index: HashMap<String, usize>,
}

impl ConfigFileCollection {
    #[instrument(skip_all, fields(config_type = %options.config_type))]
    pub fn load(registry: &ObjectRegistry, options: &ConfigLoaderOptions<'_>) -> Result<Self> {
        match options.config_type {
            ConfigType::Raw => {
                let format = options
                    .format
                    .resolve(RAW_FILE_NAME)
                    .context(MissingFormatSnafu {
                        file: RAW_FILE_NAME,
                    })?;
                let files = BTreeMap::from([(RAW_FILE_NAME.to_owned(), options.raw_data.to_owned())]);
                Self::from_files(registry, &files, &[], FormatSource::Fixed(&format))
            }
            ConfigType::ConfigMap | ConfigType::Template => {
                let resource = options.resource.context(MissingResourceSnafu {
                    config_type: options.config_type,
                })?;
                let files = resource().context(ReadSourceSnafu)?;
                Self::from_files(registry, &files, options.keys, options.format)
            }
        }
    }

    /// Loads `files`, skipping those not listed in `keys` unless `keys` is empty.
    pub fn from_files(
        registry: &ObjectRegistry,
        files: &BTreeMap<String, String>,
        keys: &[String],
        format: FormatSource<'_>,
    ) -> Result<Self> {
        let mut collection = Self::default();

        for (file, content) in files {
            if !keys.is_empty() && !keys.contains(file) {
                debug!(%file, "skipping file which is not tracked");
                continue;
            }

            let format_config = format.resolve(file).context(MissingFormatSnafu { file })?;
            let object = registry
                .load_config(file, content, format_config.format)
                .context(LoadFileSnafu {
                    file,
                    format: format_config.format,
                })?;
            collection.insert(object);
        }

        Ok(collection)
    }

    /// Adds `object`, replacing a file with the same name.
    pub fn insert(&mut self, object: Box<dyn ConfigObject>) {
        match self.index.get(object.name()) {
            Some(&position) => self.objects[position] = object,
            None => {
                self.index.insert(object.name().to_owned(), self.objects.len());
                self.objects.push(object);
            }
        }
    }

    pub fn file_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.index.contains_key(file)
    }

    pub fn get(&self, file: &str) -> Option<&dyn ConfigObject> {
        self.index.get(file).map(|&i| self.objects[i].as_ref())
    }

    pub fn get_mut(&mut self, file: &str) -> Option<&mut (dyn ConfigObject + 'static)> {
        self.index.get(file).map(|&i| self.objects[i].as_mut())
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|object| object.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ConfigObject> {
        self.objects.iter().map(AsRef::as_ref)
    }

    /// Marshals every file back into its content.
    pub fn to_cfg_content(&self) -> Result<BTreeMap<String, String>> {
        self.objects
            .iter()
            .map(|object| {
                let content = object.marshal().context(MarshalSnafu {
                    file: object.name(),
                })?;
                Ok((object.name().to_owned(), content))
            })
            .collect()
    }

    /// Evaluates a JSONPath expression and returns the JSON encoded result.
    ///
    /// Both the standard syntax (`$.mysqld.port`) and the kubectl syntax (`{.mysqld.port}`) are
    /// accepted. A single match is returned as is, multiple matches as a list.
    pub fn query(&self, jsonpath: &str, options: &QueryOptions) -> Result<Vec<u8>> {
        let document = if options.all_search {
            Value::Object(
                self.objects
                    .iter()
                    .map(|object| {
                        (
                            object.name().to_owned(),
                            Value::Object(object.all_parameters()),
                        )
                    })
                    .collect(),
            )
        } else {
            Value::Object(self.target(options.file.as_deref())?.all_parameters())
        };

        let path = normalize_jsonpath(jsonpath);
        let parsed = JsonPath::parse(&path).context(InvalidJsonPathSnafu { path: &path })?;
        let nodes = parsed.query(&document).all();

        match nodes.as_slice() {
            [] => NoMatchSnafu { path }.fail(),
            [single] => serde_json::to_vec(single).context(SerializeQueryResultSnafu),
            many => serde_json::to_vec(many).context(SerializeQueryResultSnafu),
        }
    }

    /// Applies flat parameter updates to a file. A `null` value removes the parameter.
    pub fn merge_from(&mut self, params: &Map, options: &CfgOptions) -> Result<()> {
        let section = options
            .format_config
            .as_ref()
            .and_then(FileFormatConfig::section_name)
            .map(str::to_owned);

        let file = match options.file.as_deref() {
            Some(file) => file.to_owned(),
            None => self.target(None)?.name().to_owned(),
        };
        let object = self.get_mut(&file).context(FileNotFoundSnafu { file: &file })?;

        for (parameter, value) in params {
            let path = match &section {
                Some(section) => format!("{section}.{parameter}"),
                None => parameter.clone(),
            };

            let result = match value {
                Value::Null => object.remove_key(&path),
                value => object.update(&path, value.clone()),
            };
            result.context(UpdateParameterSnafu {
                parameter,
                file: &file,
            })?;
        }

        Ok(())
    }

    fn target(&self, file: Option<&str>) -> Result<&dyn ConfigObject> {
        match file {
            Some(file) => self.get(file).context(FileNotFoundSnafu { file }),
            None => match self.objects.as_slice() {
                [single] => Ok(single.as_ref()),
                objects => AmbiguousFileSnafu {
                    count: objects.len(),
                }
                .fail(),
            },
        }
    }
}

/// Converts kubectl style JSONPath templates (`{.a.b}`) into standard expressions (`$.a.b`).
fn normalize_jsonpath(jsonpath: &str) -> String {
    let trimmed = jsonpath.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
        .trim();

    if inner.starts_with('$') {
        inner.to_owned()
    } else if inner.is_empty() {
        "$".to_owned()
    } else if inner.starts_with(['.', '[']) {
        format!("${inner}")
    } else {
        format!("$.{inner}")
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::spec::FileFormat;

    const MY_CNF: &str = indoc! {"
        [mysqld]
        max_connections=1000
        gtid_mode=ON
    "};

    fn files() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("my.cnf".to_owned(), MY_CNF.to_owned()),
            ("extra.cnf".to_owned(), "[client]\nport=3306\n".to_owned()),
        ])
    }

    #[test]
    fn load_raw() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let collection = ConfigFileCollection::load(
            ObjectRegistry::builtin(),
            &ConfigLoaderOptions::raw(MY_CNF, &format),
        )
        .unwrap();

        assert_eq!(collection.file_count(), 1);
        assert_eq!(
            collection.get(RAW_FILE_NAME).unwrap().get("mysqld.gtid_mode"),
            Some(json!("ON"))
        );
    }

    #[test]
    fn load_config_map_with_keys() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let resource = || -> resource::Result<_> { Ok(files()) };
        let keys = vec!["my.cnf".to_owned()];
        let options = ConfigLoaderOptions::config_map(&resource, FormatSource::Fixed(&format))
            .with_keys(&keys);

        let collection = ConfigFileCollection::load(ObjectRegistry::builtin(), &options).unwrap();
        assert_eq!(collection.files().collect::<Vec<_>>(), vec!["my.cnf"]);
    }

    #[test]
    fn load_with_per_file_formats() {
        let files = BTreeMap::from([
            ("my.cnf".to_owned(), MY_CNF.to_owned()),
            ("users.json".to_owned(), r#"{"root": {"host": "%"}}"#.to_owned()),
        ]);
        let resolver = |file: &str| {
            Some(FileFormatConfig::new(if file.ends_with(".json") {
                FileFormat::Json
            } else {
                FileFormat::Ini
            }))
        };

        let collection = ConfigFileCollection::from_files(
            ObjectRegistry::builtin(),
            &files,
            &[],
            FormatSource::PerFile(&resolver),
        )
        .unwrap();

        assert_eq!(collection.file_count(), 2);
        assert_eq!(
            collection.get("users.json").unwrap().get("root.host"),
            Some(json!("%"))
        );
    }

    #[test]
    fn load_fails_for_any_broken_file() {
        let files = BTreeMap::from([
            ("good.json".to_owned(), "{}".to_owned()),
            ("broken.json".to_owned(), "{".to_owned()),
        ]);
        let format = FileFormatConfig::new(FileFormat::Json);

        let err = ConfigFileCollection::from_files(
            ObjectRegistry::builtin(),
            &files,
            &[],
            FormatSource::Fixed(&format),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), r#"failed to load file "broken.json" as json"#);
    }

    #[test]
    fn load_propagates_reader_errors() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let resource = || -> resource::Result<BTreeMap<String, String>> {
            Err(resource::Error::ConfigMapNotFound {
                namespace: "default".to_owned(),
                name: "mysql-config".to_owned(),
            })
        };
        let options = ConfigLoaderOptions::template(&resource, FormatSource::Fixed(&format));

        let err = ConfigFileCollection::load(ObjectRegistry::builtin(), &options).unwrap_err();
        assert!(matches!(err, Error::ReadSource { .. }));
    }

    #[rstest]
    #[case("$.mysqld.max_connections", None, false, r#""1000""#)]
    #[case("{.mysqld.gtid_mode}", Some("my.cnf"), false, r#""ON""#)]
    #[case("$['extra.cnf'].client.port", None, true, r#""3306""#)]
    #[case("$.*.*.port", None, true, r#""3306""#)]
    fn query(
        #[case] path: &str,
        #[case] file: Option<&str>,
        #[case] all_search: bool,
        #[case] expected: &str,
    ) {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let mut files = files();
        if !all_search && file.is_none() {
            files.remove("extra.cnf");
        }
        let collection = ConfigFileCollection::from_files(
            ObjectRegistry::builtin(),
            &files,
            &[],
            FormatSource::Fixed(&format),
        )
        .unwrap();

        let result = collection
            .query(
                path,
                &QueryOptions {
                    file: file.map(str::to_owned),
                    all_search,
                },
            )
            .unwrap();
        assert_eq!(String::from_utf8(result).unwrap(), expected);
    }

    #[test]
    fn query_errors() {
        let format = FileFormatConfig::new(FileFormat::Ini);
        let collection = ConfigFileCollection::from_files(
            ObjectRegistry::builtin(),
            &files(),
            &[],
            FormatSource::Fixed(&format),
        )
        .unwrap();

        let ambiguous = collection
            .query("$.mysqld", &QueryOptions::default())
            .unwrap_err();
        assert!(matches!(ambiguous, Error::AmbiguousFile { count: 2 }));

        let options = QueryOptions {
            file: Some("my.cnf".to_owned()),
            all_search: false,
        };
        let no_match = collection.query("$.mysqld.missing", &options).unwrap_err();
        assert!(matches!(no_match, Error::NoMatch { .. }));
    }

    #[test]
    fn merge_from_honors_section() {
        let format = FileFormatConfig::ini("mysqld");
        let mut collection = ConfigFileCollection::load(
            ObjectRegistry::builtin(),
            &ConfigLoaderOptions::raw(MY_CNF, &format),
        )
        .unwrap();

        let params = json!({"max_connections": "666", "gtid_mode": null, "binlog_format": "ROW"});
        collection
            .merge_from(
                params.as_object().unwrap(),
                &CfgOptions {
                    file: None,
                    format_config: Some(format),
                },
            )
            .unwrap();

        assert_eq!(
            collection.to_cfg_content().unwrap()[RAW_FILE_NAME],
            "[mysqld]\nmax_connections=666\nbinlog_format=ROW\n"
        );
    }

    #[rstest]
    #[case("{.a.b}", "$.a.b")]
    #[case("$.a", "$.a")]
    #[case("a.b", "$.a.b")]
    #[case("{[0]}", "$[0]")]
    #[case("", "$")]
    fn normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_jsonpath(input), expected);
    }
}
