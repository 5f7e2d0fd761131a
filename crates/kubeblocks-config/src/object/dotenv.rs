//! Dotenv files: `KEY=value` lines with an optional `export ` prefix. Values are kept verbatim,
//! including their quotes.

use std::fmt::Write as _;

use serde_json::Value;
use snafu::{OptionExt as _, ensure};

use crate::{
    object::{
        Delimiter, Map, Result, SyntaxSnafu, UnsupportedValueSnafu, scalar_to_string, tree::Codec,
    },
    spec::FileFormat,
};

#[derive(Debug)]
pub(crate) struct Dotenv;

impl Codec for Dotenv {
    const DELIMITER: Delimiter = Delimiter::Flat;
    const FORMAT: FileFormat = FileFormat::Dotenv;

    fn decode(content: &str) -> Result<Map> {
        let mut tree = Map::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").map_or(line, str::trim_start);
            let (key, value) = line.split_once('=').context(SyntaxSnafu {
                format: Self::FORMAT,
                line: index + 1,
                message: format!("expected KEY=value, got {line:?}"),
            })?;
            let key = key.trim();
            ensure!(
                !key.is_empty(),
                SyntaxSnafu {
                    format: Self::FORMAT,
                    line: index + 1,
                    message: "missing key",
                }
            );

            tree.insert(key.to_owned(), Value::String(value.trim().to_owned()));
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
            let _ = writeln!(out, "{key}={value}");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::object::tree::TreeObject;

    #[test]
    fn parse_and_marshal() {
        let content = indoc! {r#"
            # connection
            export PGHOST=localhost
            PGPORT=5432
            PGOPTIONS="-c search_path=public"
            EMPTY=
        "#};

        let mut object = TreeObject::<Dotenv>::boxed(".env");
        object.unmarshal(content).unwrap();

        assert_eq!(object.get("PGHOST"), Some(json!("localhost")));
        assert_eq!(
            object.get("PGOPTIONS"),
            Some(json!("\"-c search_path=public\""))
        );
        assert_eq!(object.get("EMPTY"), Some(json!("")));

        object.update("PGPORT", json!(5433)).unwrap();
        assert_eq!(
            object.marshal().unwrap(),
            "PGHOST=localhost\nPGPORT=5433\nPGOPTIONS=\"-c search_path=public\"\nEMPTY=\n"
        );
    }

    #[test]
    fn missing_separator() {
        let mut object = TreeObject::<Dotenv>::boxed(".env");
        let err = object.unmarshal("A=1\nBROKEN\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"failed to parse dotenv content at line 2: expected KEY=value, got "BROKEN""#
        );
    }
}
