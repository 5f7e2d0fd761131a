//! Path based access to a tree of [`Value`]s, shared by every format which parses its content
//! into a [`Map`].

use std::marker::PhantomData;

use serde_json::Value;
use snafu::OptionExt as _;

use crate::{
    object::{ConfigObject, Delimiter, Map, Result, TypeMismatchSnafu},
    spec::FileFormat,
};

/// Converts between the text of a config file and its parameter tree.
pub(crate) trait Codec: std::fmt::Debug {
    const FORMAT: FileFormat;
    const DELIMITER: Delimiter;

    fn decode(content: &str) -> Result<Map>;
    fn encode(tree: &Map) -> Result<String>;
}

/// A [`ConfigObject`] backed by a [`Map`], parameterized by the [`Codec`] of its format.
#[derive(Debug)]
pub(crate) struct TreeObject<C> {
    name: String,
    tree: Map,
    codec: PhantomData<fn() -> C>,
}

impl<C: Codec + 'static> TreeObject<C> {
    pub(crate) fn boxed(name: &str) -> Box<dyn ConfigObject> {
        Box::new(Self {
            name: name.to_owned(),
            tree: Map::new(),
            codec: PhantomData,
        })
    }
}

impl<C: Codec> ConfigObject for TreeObject<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> FileFormat {
        C::FORMAT
    }

    fn delimiter(&self) -> Delimiter {
        C::DELIMITER
    }

    fn get(&self, path: &str) -> Option<Value> {
        get_path(&self.tree, &C::DELIMITER.split(path)).cloned()
    }

    fn update(&mut self, path: &str, value: Value) -> Result<()> {
        set_path(&mut self.tree, path, &C::DELIMITER.split(path), value)
    }

    fn remove_key(&mut self, path: &str) -> Result<()> {
        remove_path(&mut self.tree, path, &C::DELIMITER.split(path))
    }

    fn all_parameters(&self) -> Map {
        self.tree.clone()
    }

    fn marshal(&self) -> Result<String> {
        C::encode(&self.tree)
    }

    fn unmarshal(&mut self, content: &str) -> Result<()> {
        self.tree = C::decode(content)?;
        Ok(())
    }
}

pub(crate) fn get_path<'a>(tree: &'a Map, segments: &[&str]) -> Option<&'a Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = tree;
    for segment in parents {
        current = current.get(*segment)?.as_object()?;
    }
    current.get(*last)
}

/// Sets the value at `segments`, creating missing parent maps on the way.
pub(crate) fn set_path(tree: &mut Map, path: &str, segments: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut current = tree;
    for segment in parents {
        current = current
            .entry(*segment)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .context(TypeMismatchSnafu { path, segment: *segment })?;
    }
    current.insert((*last).to_owned(), value);
    Ok(())
}

/// Removes the value at `segments`. A missing key or parent is not an error.
pub(crate) fn remove_path(tree: &mut Map, path: &str, segments: &[&str]) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut current = tree;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(Value::Object(map)) => current = map,
            Some(_) => return TypeMismatchSnafu { path, segment: *segment }.fail(),
            None => return Ok(()),
        }
    }
    current.shift_remove(*last);
    Ok(())
}
