//! Properties files which are rewritten in place.
//!
//! The original lines are kept, so comments, blank lines, separators and quoting survive a round
//! trip byte for byte. Only lines of changed keys are rewritten, new keys are appended.

use std::collections::HashMap;

use serde_json::Value;
use snafu::OptionExt as _;

use crate::{
    object::{ConfigObject, Delimiter, Map, Result, UnsupportedValueSnafu, scalar_to_string},
    spec::FileFormat,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry {
        key: String,
        /// Everything up to the value, including the separator and its surrounding whitespace.
        prefix: String,
        value: String,
        /// Trailing whitespace after the value.
        suffix: String,
    },
    Other(String),
}

impl Line {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(['#', '!']) {
            return Self::Other(raw.to_owned());
        }

        let (key_part, value_part) = match raw.find('=') {
            Some(index) => raw.split_at(index + 1),
            None => (raw, ""),
        };
        let key = key_part.trim_end_matches('=').trim().to_owned();

        let value_start = value_part.len() - value_part.trim_start().len();
        let value_end = value_part.trim_end().len().max(value_start);

        Self::Entry {
            key,
            prefix: format!("{key_part}{}", &value_part[..value_start]),
            value: value_part[value_start..value_end].to_owned(),
            suffix: value_part[value_end..].to_owned(),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Entry {
                prefix,
                value,
                suffix,
                ..
            } => format!("{prefix}{value}{suffix}"),
            Self::Other(raw) => raw.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct PropertiesObject {
    name: String,
    lines: Vec<Line>,
    /// The line holding the effective value of each key, the last one wins.
    index: HashMap<String, usize>,
}

impl PropertiesObject {
    pub(crate) fn boxed(name: &str) -> Box<dyn ConfigObject> {
        Box::new(Self {
            name: name.to_owned(),
            lines: Vec::new(),
            index: HashMap::new(),
        })
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| match line {
                Line::Entry { key, .. } => Some((key.clone(), i)),
                Line::Other(_) => None,
            })
            .collect();
    }

    /// New lines are inserted in front of the empty remainder of a trailing newline.
    fn insert_position(&self) -> usize {
        match self.lines.last() {
            Some(Line::Other(raw)) if raw.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        }
    }
}

impl ConfigObject for PropertiesObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> FileFormat {
        FileFormat::Properties
    }

    fn delimiter(&self) -> Delimiter {
        Delimiter::Flat
    }

    fn get(&self, path: &str) -> Option<Value> {
        match self.lines.get(*self.index.get(path)?)? {
            Line::Entry { value, .. } => Some(Value::String(value.clone())),
            Line::Other(_) => None,
        }
    }

    fn update(&mut self, path: &str, value: Value) -> Result<()> {
        let new_value = scalar_to_string(&value).context(UnsupportedValueSnafu {
            format: FileFormat::Properties,
            path,
        })?;

        if let Some(Line::Entry { value, .. }) = self
            .index
            .get(path)
            .and_then(|&index| self.lines.get_mut(index))
        {
            *value = new_value;
            return Ok(());
        }

        let position = self.insert_position();
        self.lines.insert(
            position,
            Line::Entry {
                key: path.to_owned(),
                prefix: format!("{path}="),
                value: new_value,
                suffix: String::new(),
            },
        );
        self.rebuild_index();
        Ok(())
    }

    fn remove_key(&mut self, path: &str) -> Result<()> {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Entry { key, .. } if key == path));
        if self.lines.len() != before {
            self.rebuild_index();
        }
        Ok(())
    }

    fn all_parameters(&self) -> Map {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Entry { key, value, .. } => Some((key.clone(), Value::String(value.clone()))),
                Line::Other(_) => None,
            })
            .collect()
    }

    fn marshal(&self) -> Result<String> {
        Ok(self
            .lines
            .iter()
            .map(Line::render)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn unmarshal(&mut self, content: &str) -> Result<()> {
        self.lines = if content.is_empty() {
            Vec::new()
        } else {
            content.split('\n').map(Line::parse).collect()
        };
        self.rebuild_index();
        Ok(())
    }
}
