//! INI files as used by MySQL and friends.
//!
//! Keys outside of any section are stored at the top level, keys inside `[section]` are
//! addressed as `section.key`. Bare keys without a value (`skip-name-resolve`) are stored with an
//! empty value and written back without `=`.

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
pub(crate) struct Ini;

impl Codec for Ini {
    const DELIMITER: Delimiter = Delimiter::Section;
    const FORMAT: FileFormat = FileFormat::Ini;

    fn decode(content: &str) -> Result<Map> {
        let mut tree = Map::new();
        let mut section: Option<String> = None;

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(['#', ';']) {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let Some(name) = header
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                else {
                    return SyntaxSnafu {
                        format: Self::FORMAT,
                        line: index + 1,
                        message: format!("invalid section header {line:?}"),
                    }
                    .fail();
                };

                if !tree.get(name).is_some_and(Value::is_object) {
                    tree.insert(name.to_owned(), Value::Object(Map::new()));
                }
                section = Some(name.to_owned());
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (line, ""),
            };
            ensure!(
                !key.is_empty(),
                SyntaxSnafu {
                    format: Self::FORMAT,
                    line: index + 1,
                    message: "missing key",
                }
            );

            let value = Value::String(value.to_owned());
            if let Some(Value::Object(entries)) = section.as_deref().and_then(|s| tree.get_mut(s)) {
                entries.insert(key.to_owned(), value);
            } else {
                tree.insert(key.to_owned(), value);
            }
        }

        Ok(tree)
    }

    fn encode(tree: &Map) -> Result<String> {
        let mut out = String::new();

        for (key, value) in tree.iter().filter(|(_, v)| !v.is_object()) {
            write_entry(&mut out, key, key, value)?;
        }

        for (section, value) in tree {
            let Value::Object(entries) = value else {
                continue;
            };

            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "[{section}]");
            for (key, value) in entries {
                write_entry(&mut out, &format!("{section}.{key}"), key, value)?;
            }
        }

        Ok(out)
    }
}

fn write_entry(out: &mut String, path: &str, key: &str, value: &Value) -> Result<()> {
    let value = scalar_to_string(value).context(UnsupportedValueSnafu {
        format: FileFormat::Ini,
        path,
    })?;

    if value.is_empty() {
        let _ = writeln!(out, "{key}");
    } else {
        let _ = writeln!(out, "{key}={value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::object::tree::TreeObject;

    const MY_CNF: &str = indoc! {"
        # global comment
        [client]
        port=3306

        [mysqld]
        ; engine settings
        default_storage_engine = innodb
        max_connections=1000
        skip-name-resolve
        plugin_load_add=rpl_semi_sync_master=semisync_master.so
    "};

    #[test]
    fn parse_sections() {
        let mut object = TreeObject::<Ini>::boxed("my.cnf");
        object.unmarshal(MY_CNF).unwrap();

        assert_eq!(object.get("client.port"), Some(json!("3306")));
        assert_eq!(object.get("mysqld.max_connections"), Some(json!("1000")));
        assert_eq!(object.get("mysqld.skip-name-resolve"), Some(json!("")));
        assert_eq!(
            object.get_string("mysqld.plugin_load_add").unwrap(),
            "rpl_semi_sync_master=semisync_master.so"
        );
        assert_eq!(object.get("mysqld.missing"), None);

        let section = object.sub_config("mysqld").unwrap();
        assert_eq!(section.get_string("default_storage_engine").unwrap(), "innodb");
        assert!(object.sub_config("mysqld.max_connections").is_none());
    }

    #[test]
    fn update_and_marshal() {
        let mut object = TreeObject::<Ini>::boxed("my.cnf");
        object.unmarshal(MY_CNF).unwrap();

        object.update("mysqld.max_connections", json!(666)).unwrap();
        object.update("mysqld.innodb.flag", json!("ON")).unwrap();
        object.remove_key("client.port").unwrap();
        object.update("mysqld_safe.log-error", json!("/var/log/mysqld.log")).unwrap();

        assert_eq!(
            object.marshal().unwrap(),
            indoc! {"
                [client]

                [mysqld]
                default_storage_engine=innodb
                max_connections=666
                skip-name-resolve
                plugin_load_add=rpl_semi_sync_master=semisync_master.so
                innodb.flag=ON

                [mysqld_safe]
                log-error=/var/log/mysqld.log
            "}
        );
    }

    #[test]
    fn top_level_keys() {
        let mut object = TreeObject::<Ini>::boxed("config.ini");
        object.unmarshal("a=1\n[s]\nb=2\n").unwrap();
        assert_eq!(object.get("a"), Some(json!("1")));
        assert_eq!(object.marshal().unwrap(), "a=1\n\n[s]\nb=2\n");
    }

    #[test]
    fn invalid_header() {
        let mut object = TreeObject::<Ini>::boxed("my.cnf");
        let err = object.unmarshal("[mysqld\nport=1\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"failed to parse ini content at line 1: invalid section header "[mysqld""#
        );
    }

    #[test]
    fn nested_values_are_rejected() {
        let mut object = TreeObject::<Ini>::boxed("my.cnf");
        object.update("mysqld.list", json!(["a"])).unwrap();
        assert!(object.marshal().is_err());
    }
}
