//! Java style properties: keys are separated from values by `=`, `:` or whitespace and a
//! trailing `\` continues the value on the next line.

use std::fmt::Write as _;

use serde_json::Value;
use snafu::OptionExt as _;

use crate::{
    object::{Delimiter, Map, Result, UnsupportedValueSnafu, scalar_to_string, tree::Codec},
    spec::FileFormat,
};

#[derive(Debug)]
pub(crate) struct PropertiesPlus;

impl Codec for PropertiesPlus {
    const DELIMITER: Delimiter = Delimiter::Flat;
    const FORMAT: FileFormat = FileFormat::PropertiesPlus;

    fn decode(content: &str) -> Result<Map> {
        let mut tree = Map::new();

        for line in logical_lines(content) {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with(['#', '!']) {
                continue;
            }

            let (key, value) = split_entry(line);
            tree.insert(key, Value::String(value));
        }

        Ok(tree)
    }

    fn encode(tree: &Map) -> Result<String> {
        let mut out = String::new();
        for (key, value) in tree {
            let value = scalar_to_string(value).context(UnsupportedValueSnafu {
                format: Self::FORMAT,
                path: key,
            })?;
            let _ = writeln!(out, "{}={value}", escape_key(key));
        }
        Ok(out)
    }
}

/// Joins physical lines ending with an odd number of backslashes with their successor.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut continued = false;

    for line in content.lines() {
        let line = if continued { line.trim_start() } else { line };
        let trailing_backslashes = line.len() - line.trim_end_matches('\\').len();

        if trailing_backslashes % 2 == 1 {
            current.push_str(&line[..line.len() - 1]);
            continued = true;
        } else {
            current.push_str(line);
            lines.push(std::mem::take(&mut current));
            continued = false;
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Splits at the first unescaped `=`, `:` or whitespace. Whitespace around the separator is
/// not part of the key or the value.
fn split_entry(line: &str) -> (String, String) {
    let mut key = String::new();
    let mut chars = line.char_indices();
    let mut rest = "";

    while let Some((index, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    key.push(escaped);
                }
            }
            '=' | ':' => {
                rest = &line[index + 1..];
                break;
            }
            c if c.is_whitespace() => {
                let remainder = line[index..].trim_start();
                rest = remainder
                    .strip_prefix(['=', ':'])
                    .unwrap_or(remainder);
                break;
            }
            c => key.push(c),
        }
    }

    (key, rest.trim_start().to_owned())
}

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if matches!(c, '=' | ':' | ' ' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::object::tree::TreeObject;

    #[rstest]
    #[case("key=value", "key", "value")]
    #[case("key = value", "key", "value")]
    #[case("key:value", "key", "value")]
    #[case("key value with spaces", "key", "value with spaces")]
    #[case("key   :  value", "key", "value")]
    #[case(r"a\=b=c", "a=b", "c")]
    #[case("flag", "flag", "")]
    fn split_entries(#[case] line: &str, #[case] key: &str, #[case] value: &str) {
        assert_eq!(split_entry(line), (key.to_owned(), value.to_owned()));
    }

    #[test]
    fn continuations() {
        let content = indoc! {r"
            # zookeeper
            server.1=zk-0:2888:3888\
                ;participant
            tickTime 2000
            ! another comment
            dataDir: /var/lib/zookeeper
        "};

        let mut object = TreeObject::<PropertiesPlus>::boxed("zoo.cfg");
        object.unmarshal(content).unwrap();

        assert_eq!(object.get("server.1"), Some(json!("zk-0:2888:3888;participant")));
        assert_eq!(object.get("tickTime"), Some(json!("2000")));
        assert_eq!(object.get("dataDir"), Some(json!("/var/lib/zookeeper")));

        let mut reloaded = TreeObject::<PropertiesPlus>::boxed("zoo.cfg");
        reloaded.unmarshal(&object.marshal().unwrap()).unwrap();
        assert_eq!(reloaded.all_parameters(), object.all_parameters());
    }
}
