//! The `redis.conf` format: one `key value...` directive per line. Directives which occur more
//! than once, like `save`, are stored as lists.

use std::fmt::Write as _;

use serde_json::Value;
use snafu::OptionExt as _;

use crate::{
    object::{Delimiter, Map, Result, UnsupportedValueSnafu, scalar_to_string, tree::Codec},
    spec::FileFormat,
};

#[derive(Debug)]
pub(crate) struct RedisCfg;

impl Codec for RedisCfg {
    const DELIMITER: Delimiter = Delimiter::Flat;
    const FORMAT: FileFormat = FileFormat::RedisCfg;

    fn decode(content: &str) -> Result<Map> {
        let mut tree = Map::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once(char::is_whitespace)
                .map_or((line, ""), |(key, value)| (key, value.trim()));
            let value = Value::String(value.to_owned());

            match tree.get_mut(key) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    tree.insert(key.to_owned(), value);
                }
            }
        }

        Ok(tree)
    }

    fn encode(tree: &Map) -> Result<String> {
        let mut out = String::new();
        for (key, value) in tree {
            let values = match value {
                Value::Array(values) => values.as_slice(),
                value => std::slice::from_ref(value),
            };

            for value in values {
                let value = scalar_to_string(value).context(UnsupportedValueSnafu {
                    format: Self::FORMAT,
                    path: key,
                })?;
                if value.is_empty() {
                    let _ = writeln!(out, "{key}");
                } else {
                    let _ = writeln!(out, "{key} {value}");
                }
            }
        }
        Ok(out)
    }
}
