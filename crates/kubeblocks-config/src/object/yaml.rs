//! YAML documents, kept as [`serde_yaml::Value`] so that maps, lists and scalar types survive a
//! round trip unchanged.

use serde_json::Value;
use serde_yaml::{Mapping, Value as YamlValue};
use snafu::{OptionExt as _, ResultExt as _};

use crate::{
    object::{
        ConfigObject, Delimiter, Map, ParseSnafu, Result, SerializeSnafu, TypeMismatchSnafu,
        UnsupportedValueSnafu,
    },
    spec::FileFormat,
};

#[derive(Debug)]
pub(crate) struct YamlObject {
    name: String,
    document: Mapping,
}

impl YamlObject {
    pub(crate) fn boxed(name: &str) -> Box<dyn ConfigObject> {
        Box::new(Self {
            name: name.to_owned(),
            document: Mapping::new(),
        })
    }

    fn lookup(&self, segments: &[&str]) -> Option<&YamlValue> {
        let (last, parents) = segments.split_last()?;
        let mut current = &self.document;
        for segment in parents {
            current = current.get(*segment)?.as_mapping()?;
        }
        current.get(*last)
    }
}

impl ConfigObject for YamlObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> FileFormat {
        FileFormat::Yaml
    }

    fn delimiter(&self) -> Delimiter {
        Delimiter::Dot
    }

    fn get(&self, path: &str) -> Option<Value> {
        self.lookup(&Delimiter::Dot.split(path))
            .and_then(|value| serde_json::to_value(value).ok())
    }

    fn update(&mut self, path: &str, value: Value) -> Result<()> {
        let value = serde_yaml::to_value(value)
            .ok()
            .context(UnsupportedValueSnafu {
                format: FileFormat::Yaml,
                path,
            })?;

        let segments = Delimiter::Dot.split(path);
        let Some((last, parents)) = segments.split_last() else {
            return Ok(());
        };

        let mut current = &mut self.document;
        for segment in parents {
            let key = YamlValue::String((*segment).to_owned());
            if !current.contains_key(&key) {
                current.insert(key.clone(), YamlValue::Mapping(Mapping::new()));
            }
            current = match current.get_mut(&key) {
                Some(YamlValue::Mapping(mapping)) => mapping,
                _ => return TypeMismatchSnafu { path, segment: *segment }.fail(),
            };
        }
        current.insert(YamlValue::String((*last).to_owned()), value);
        Ok(())
    }

    fn remove_key(&mut self, path: &str) -> Result<()> {
        let segments = Delimiter::Dot.split(path);
        let Some((last, parents)) = segments.split_last() else {
            return Ok(());
        };

        let mut current = &mut self.document;
        for segment in parents {
            current = match current.get_mut(*segment) {
                Some(YamlValue::Mapping(mapping)) => mapping,
                // The parent is gone already, there is nothing left to remove
                None | Some(YamlValue::Null) => return Ok(()),
                Some(_) => return TypeMismatchSnafu { path, segment: *segment }.fail(),
            };
        }
        current.shift_remove(*last);
        Ok(())
    }

    fn all_parameters(&self) -> Map {
        match serde_json::to_value(&self.document) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn marshal(&self) -> Result<String> {
        if self.document.is_empty() {
            return Ok(String::new());
        }

        serde_yaml::to_string(&self.document)
            .boxed()
            .context(SerializeSnafu {
                format: FileFormat::Yaml,
            })
    }

    fn unmarshal(&mut self, content: &str) -> Result<()> {
        let document: Option<Mapping> = serde_yaml::from_str(content)
            .boxed()
            .context(ParseSnafu {
                format: FileFormat::Yaml,
            })?;
        self.document = document.unwrap_or_default();
        Ok(())
    }
}
