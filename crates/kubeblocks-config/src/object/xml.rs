//! XML documents mapped onto nested maps.
//!
//! Every element becomes a key of its parent map. Attributes are stored with a `-` prefix and
//! the text of an element with child elements or attributes is stored under `#text`. Elements
//! containing nothing but text are stored as plain strings, repeated elements become lists.

use std::fmt::Write as _;

use quick_xml::{Reader, escape::escape, events::Event};
use serde_json::Value;
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    object::{
        Delimiter, Map, ParseSnafu, Result, SyntaxSnafu, UnsupportedValueSnafu, scalar_to_string,
        tree::Codec,
    },
    spec::FileFormat,
};

const ATTRIBUTE_PREFIX: char = '-';
const TEXT_KEY: &str = "#text";
const INDENT: &str = "  ";

#[derive(Debug)]
pub(crate) struct Xml;

impl Codec for Xml {
    const DELIMITER: Delimiter = Delimiter::Dot;
    const FORMAT: FileFormat = FileFormat::Xml;

    fn decode(content: &str) -> Result<Map> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        // The bottom of the stack collects the root elements
        let mut stack: Vec<(String, Map)> = vec![(String::new(), Map::new())];

        loop {
            let event = reader.read_event().boxed().context(ParseSnafu {
                format: Self::FORMAT,
            })?;

            match event {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    stack.push((name, attributes(&start)?));
                }
                Event::Empty(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    let element = finish_element(attributes(&start)?);
                    if let Some((_, parent)) = stack.last_mut() {
                        insert_child(parent, name, element);
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape().boxed().context(ParseSnafu {
                        format: Self::FORMAT,
                    })?;
                    append_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    append_text(&mut stack, &text);
                }
                Event::End(_) => {
                    let unexpected_end = stack.len() <= 1;
                    ensure!(
                        !unexpected_end,
                        SyntaxSnafu {
                            format: Self::FORMAT,
                            line: line_at(content, reader.buffer_position() as usize),
                            message: "unexpected closing tag",
                        }
                    );
                    if let Some((name, element)) = stack.pop() {
                        if let Some((_, parent)) = stack.last_mut() {
                            insert_child(parent, name, finish_element(element));
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        ensure!(
            stack.len() == 1,
            SyntaxSnafu {
                format: Self::FORMAT,
                line: line_at(content, content.len()),
                message: "unclosed element",
            }
        );
        Ok(stack.pop().map(|(_, root)| root).unwrap_or_default())
    }

    fn encode(tree: &Map) -> Result<String> {
        let mut out = String::new();
        for (name, value) in tree {
            write_element(&mut out, name, name, value, 0)?;
        }
        Ok(out)
    }
}

fn line_at(content: &str, position: usize) -> usize {
    content
        .get(..position)
        .map_or(0, |consumed| consumed.matches('\n').count())
        + 1
}

fn attributes(start: &quick_xml::events::BytesStart<'_>) -> Result<Map> {
    let mut map = Map::new();
    for attribute in start.attributes() {
        let attribute = attribute.boxed().context(ParseSnafu {
            format: FileFormat::Xml,
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().boxed().context(ParseSnafu {
            format: FileFormat::Xml,
        })?;
        map.insert(
            format!("{ATTRIBUTE_PREFIX}{key}"),
            Value::String(value.into_owned()),
        );
    }
    Ok(map)
}

fn append_text(stack: &mut [(String, Map)], text: &str) {
    if let Some((_, element)) = stack.last_mut() {
        match element.get_mut(TEXT_KEY) {
            Some(Value::String(existing)) => existing.push_str(text),
            _ => {
                element.insert(TEXT_KEY.to_owned(), Value::String(text.to_owned()));
            }
        }
    }
}

/// Collapses elements which only contain text into plain strings.
fn finish_element(mut element: Map) -> Value {
    if element.is_empty() {
        return Value::String(String::new());
    }
    if element.len() == 1 {
        if let Some(Value::String(text)) = element.shift_remove(TEXT_KEY) {
            return Value::String(text);
        }
    }
    Value::Object(element)
}

fn insert_child(parent: &mut Map, name: String, child: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(siblings)) => siblings.push(child),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, child]);
        }
        None => {
            parent.insert(name, child);
        }
    }
}

fn write_element(out: &mut String, path: &str, name: &str, value: &Value, depth: usize) -> Result<()> {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Array(items) => {
            for item in items {
                write_element(out, path, name, item, depth)?;
            }
        }
        Value::Object(map) => {
            let _ = write!(out, "{indent}<{name}");
            for (key, value) in map {
                if let Some(attribute) = key.strip_prefix(ATTRIBUTE_PREFIX) {
                    let value = scalar_to_string(value).context(UnsupportedValueSnafu {
                        format: FileFormat::Xml,
                        path: format!("{path}.{key}"),
                    })?;
                    let _ = write!(out, " {attribute}=\"{}\"", escape(value.as_str()));
                }
            }

            let text = map.get(TEXT_KEY).and_then(scalar_to_string);
            let children: Vec<_> = map
                .iter()
                .filter(|(key, _)| !key.starts_with(ATTRIBUTE_PREFIX) && *key != TEXT_KEY)
                .collect();

            match (children.is_empty(), text) {
                (true, None) => out.push_str("/>\n"),
                (true, Some(text)) => {
                    let _ = writeln!(out, ">{}</{name}>", escape(text.as_str()));
                }
                (false, text) => {
                    out.push_str(">\n");
                    if let Some(text) = text {
                        let _ = writeln!(out, "{indent}{INDENT}{}", escape(text.as_str()));
                    }
                    for (key, child) in children {
                        write_element(out, &format!("{path}.{key}"), key, child, depth + 1)?;
                    }
                    let _ = writeln!(out, "{indent}</{name}>");
                }
            }
        }
        Value::Null => {
            let _ = writeln!(out, "{indent}<{name}/>");
        }
        scalar => {
            let text = scalar_to_string(scalar).unwrap_or_default();
            if text.is_empty() {
                let _ = writeln!(out, "{indent}<{name}/>");
            } else {
                let _ = writeln!(out, "{indent}<{name}>{}</{name}>", escape(text.as_str()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::object::tree::TreeObject;

    const CLICKHOUSE: &str = indoc! {r#"
        <?xml version="1.0"?>
        <clickhouse>
            <!-- logging -->
            <logger>
                <level>information</level>
                <console>1</console>
            </logger>
            <listen_host>0.0.0.0</listen_host>
            <listen_host>::</listen_host>
            <macros replica="r1">
                <shard>01</shard>
            </macros>
            <profiles><default/></profiles>
        </clickhouse>
    "#};

    #[test]
    fn parse_elements_and_attributes() {
        let mut object = TreeObject::<Xml>::boxed("config.xml");
        object.unmarshal(CLICKHOUSE).unwrap();

        assert_eq!(object.get("clickhouse.logger.level"), Some(json!("information")));
        assert_eq!(
            object.get("clickhouse.listen_host"),
            Some(json!(["0.0.0.0", "::"]))
        );
        assert_eq!(object.get("clickhouse.macros.-replica"), Some(json!("r1")));
        assert_eq!(object.get("clickhouse.profiles.default"), Some(json!("")));
    }

    #[test]
    fn update_materializes_parents_and_round_trips() {
        let mut object = TreeObject::<Xml>::boxed("config.xml");
        object.unmarshal(CLICKHOUSE).unwrap();

        object
            .update("clickhouse.merge_tree.max_suspicious_broken_parts", json!(5))
            .unwrap();
        object.update("clickhouse.logger.level", json!("trace")).unwrap();

        let marshalled = object.marshal().unwrap();
        let mut reloaded = TreeObject::<Xml>::boxed("config.xml");
        reloaded.unmarshal(&marshalled).unwrap();

        assert_eq!(
            reloaded.get("clickhouse.merge_tree.max_suspicious_broken_parts"),
            Some(json!("5"))
        );
        assert_eq!(reloaded.get("clickhouse.logger.level"), Some(json!("trace")));
        assert_eq!(
            reloaded.get("clickhouse.macros"),
            Some(json!({"-replica": "r1", "shard": "01"}))
        );
    }

    #[test]
    fn escapes_text() {
        let tree = json!({"root": {"-attr": "a\"b", "value": "x < y"}});
        let encoded = Xml::encode(tree.as_object().unwrap()).unwrap();
        assert_eq!(
            encoded,
            "<root attr=\"a&quot;b\">\n  <value>x &lt; y</value>\n</root>\n"
        );
    }

    #[test]
    fn unclosed_element_fails() {
        let mut object = TreeObject::<Xml>::boxed("config.xml");
        assert!(object.unmarshal("<a><b>1</b>").is_err());
    }
}
