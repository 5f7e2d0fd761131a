//! Formats with a serde implementation: JSON, TOML and HCL.

use snafu::ResultExt as _;

use crate::{
    object::{Delimiter, Map, ParseSnafu, Result, SerializeSnafu, tree::Codec},
    spec::FileFormat,
};

#[derive(Debug)]
pub(crate) struct Json;

impl Codec for Json {
    const DELIMITER: Delimiter = Delimiter::Dot;
    const FORMAT: FileFormat = FileFormat::Json;

    fn decode(content: &str) -> Result<Map> {
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(content)
            .boxed()
            .context(ParseSnafu {
                format: Self::FORMAT,
            })
    }

    fn encode(tree: &Map) -> Result<String> {
        serde_json::to_string_pretty(tree)
            .boxed()
            .context(SerializeSnafu {
                format: Self::FORMAT,
            })
    }
}

#[derive(Debug)]
pub(crate) struct Toml;

impl Codec for Toml {
    const DELIMITER: Delimiter = Delimiter::Dot;
    const FORMAT: FileFormat = FileFormat::Toml;

    fn decode(content: &str) -> Result<Map> {
        toml::from_str(content).boxed().context(ParseSnafu {
            format: Self::FORMAT,
        })
    }

    fn encode(tree: &Map) -> Result<String> {
        toml::to_string(tree).boxed().context(SerializeSnafu {
            format: Self::FORMAT,
        })
    }
}

#[derive(Debug)]
pub(crate) struct Hcl;

impl Codec for Hcl {
    const DELIMITER: Delimiter = Delimiter::Dot;
    const FORMAT: FileFormat = FileFormat::Hcl;

    fn decode(content: &str) -> Result<Map> {
        hcl::from_str(content).boxed().context(ParseSnafu {
            format: Self::FORMAT,
        })
    }

    fn encode(tree: &Map) -> Result<String> {
        hcl::to_string(tree).boxed().context(SerializeSnafu {
            format: Self::FORMAT,
        })
    }
}
