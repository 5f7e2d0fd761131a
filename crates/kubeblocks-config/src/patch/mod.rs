//! Semantic diffs between two versions of a set of config files.
//!
//! Files are compared by their parsed parameters rather than their text, reformatting a file or
//! reordering its keys is not a change.

use std::collections::{BTreeMap, BTreeSet};

use snafu::{ResultExt as _, Snafu};
use tracing::{debug, instrument};

use crate::{
    loader::{self, ConfigFileCollection, FormatSource},
    object::{Map, ObjectRegistry},
};

mod dynamic;
mod merge;
mod visualize;

pub use dynamic::*;
pub use merge::*;
pub use visualize::*;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load the {version} version of the config files"))]
    LoadVersion {
        version: &'static str,
        source: loader::Error,
    },

    #[snafu(display("failed to serialize the patch of file {file:?}"))]
    SerializePatch {
        file: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to decode the patch of file {file:?}"))]
    DecodePatch {
        file: String,
        source: serde_json::Error,
    },
}

/// The difference between two versions of a set of config files.
#[derive(Debug)]
pub struct ConfigPatchInfo {
    /// Whether anything changed, including untracked files if they were compared.
    pub is_modify: bool,

    /// The parameters of files which only exist in the new version.
    pub add_config: BTreeMap<String, Map>,

    /// The parameters of files which only exist in the old version.
    pub delete_config: BTreeMap<String, Map>,

    /// JSON merge patches (RFC 7386) turning the old parameters of a file into the new ones.
    /// Files without changes have no entry.
    pub update_config: BTreeMap<String, Vec<u8>>,

    /// The new version.
    pub target: ConfigFileCollection,

    /// The old version.
    pub last_version: ConfigFileCollection,
}

impl ConfigPatchInfo {
    /// Decodes the merge patch of `file`, returning `None` if the file did not change.
    pub fn update_patch(&self, file: &str) -> Result<Option<serde_json::Value>> {
        self.update_config
            .get(file)
            .map(|patch| serde_json::from_slice(patch).context(DecodePatchSnafu { file }))
            .transpose()
    }
}

/// Diffs two versions of a set of config files.
///
/// Only the files listed in `tracked_keys` are diffed, unless the list is empty. With
/// `comparable_all_files`, the untracked files are checked for changes as well, see
/// [`check_exclude_config_difference`]. The result of that check is returned next to the patch
/// and is also reflected in [`ConfigPatchInfo::is_modify`].
#[instrument(skip_all, fields(tracked_keys = ?tracked_keys))]
pub fn create_config_patch(
    registry: &ObjectRegistry,
    old_version: &BTreeMap<String, String>,
    new_version: &BTreeMap<String, String>,
    format: FormatSource<'_>,
    tracked_keys: &[String],
    comparable_all_files: bool,
) -> Result<(ConfigPatchInfo, bool)> {
    let files_updated = comparable_all_files
        && !tracked_keys.is_empty()
        && check_exclude_config_difference(old_version, new_version, tracked_keys);

    let last_version =
        ConfigFileCollection::from_files(registry, old_version, tracked_keys, format)
            .context(LoadVersionSnafu { version: "old" })?;
    let target = ConfigFileCollection::from_files(registry, new_version, tracked_keys, format)
        .context(LoadVersionSnafu { version: "new" })?;

    let mut patch = diff_collections(last_version, target)?;
    patch.is_modify |= files_updated;

    debug!(
        is_modify = patch.is_modify,
        added = patch.add_config.len(),
        deleted = patch.delete_config.len(),
        updated = patch.update_config.len(),
        files_updated,
        "created config patch"
    );
    Ok((patch, files_updated))
}

/// Diffs two already loaded versions.
pub fn diff_collections(
    last_version: ConfigFileCollection,
    target: ConfigFileCollection,
) -> Result<ConfigPatchInfo> {
    let mut add_config = BTreeMap::new();
    let mut delete_config = BTreeMap::new();
    let mut update_config = BTreeMap::new();

    for old in last_version.iter() {
        if !target.contains(old.name()) {
            delete_config.insert(old.name().to_owned(), old.all_parameters());
        }
    }

    for new in target.iter() {
        let Some(old) = last_version.get(new.name()) else {
            add_config.insert(new.name().to_owned(), new.all_parameters());
            continue;
        };

        let patch = create_merge_patch(
            &serde_json::Value::Object(old.all_parameters()),
            &serde_json::Value::Object(new.all_parameters()),
        );
        if is_empty_patch(&patch) {
            continue;
        }

        let patch = serde_json::to_vec(&patch).context(SerializePatchSnafu { file: new.name() })?;
        update_config.insert(new.name().to_owned(), patch);
    }

    Ok(ConfigPatchInfo {
        is_modify: !add_config.is_empty() || !delete_config.is_empty() || !update_config.is_empty(),
        add_config,
        delete_config,
        update_config,
        target,
        last_version,
    })
}

/// Checks whether any file which is not listed in `tracked_keys` was added, removed or changed.
pub fn check_exclude_config_difference(
    old_version: &BTreeMap<String, String>,
    new_version: &BTreeMap<String, String>,
    tracked_keys: &[String],
) -> bool {
    let untracked = |files: &BTreeMap<String, String>| -> BTreeSet<String> {
        files
            .keys()
            .filter(|file| !tracked_keys.contains(file))
            .cloned()
            .collect()
    };

    let old_files = untracked(old_version);
    if old_files != untracked(new_version) {
        return true;
    }

    old_files
        .iter()
        .any(|file| old_version.get(file) != new_version.get(file))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::spec::{FileFormat, FileFormatConfig};

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(file, content)| ((*file).to_owned(), (*content).to_owned()))
            .collect()
    }

    fn ini_patch(
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
        tracked_keys: &[String],
        comparable_all_files: bool,
    ) -> (ConfigPatchInfo, bool) {
        let format = FileFormatConfig::new(FileFormat::Ini);
        create_config_patch(
            ObjectRegistry::builtin(),
            old,
            new,
            FormatSource::Fixed(&format),
            tracked_keys,
            comparable_all_files,
        )
        .unwrap()
    }

    #[test]
    fn update_shared_file() {
        let old = files(&[(
            "my.cnf",
            indoc! {"
                [mysqld]
                max_connections=1000
                gtid_mode=ON
                log_bin=ON
            "},
        )]);
        let new = files(&[(
            "my.cnf",
            indoc! {"
                [mysqld]
                log_bin=ON
                max_connections=666
                binlog_format=ROW
            "},
        )]);

        let (patch, files_updated) = ini_patch(&old, &new, &[], false);

        assert!(patch.is_modify);
        assert!(!files_updated);
        assert!(patch.add_config.is_empty());
        assert!(patch.delete_config.is_empty());
        assert_eq!(
            patch.update_patch("my.cnf").unwrap(),
            Some(json!({"mysqld": {
                "gtid_mode": null,
                "max_connections": "666",
                "binlog_format": "ROW",
            }}))
        );
    }

    #[test]
    fn add_and_delete_files() {
        let old = files(&[("a.cnf", "[a]\nx=1\n"), ("b.cnf", "[b]\ny=2\n")]);
        let new = files(&[("a.cnf", "[a]\nx=1\n"), ("c.cnf", "[c]\nz=3\n")]);

        let (patch, _) = ini_patch(&old, &new, &[], false);

        assert!(patch.is_modify);
        assert_eq!(
            patch.add_config["c.cnf"],
            *json!({"c": {"z": "3"}}).as_object().unwrap()
        );
        assert_eq!(
            patch.delete_config["b.cnf"],
            *json!({"b": {"y": "2"}}).as_object().unwrap()
        );
        assert!(patch.update_config.is_empty());
    }

    #[test]
    fn identical_content_is_no_change() {
        let old = files(&[("my.cnf", "[mysqld]\nport=3306\nuser=mysql\n")]);
        let reformatted = files(&[("my.cnf", "# comment\n[mysqld]\nuser = mysql\nport = 3306\n")]);

        let (patch, files_updated) = ini_patch(&old, &reformatted, &[], true);

        assert!(!patch.is_modify);
        assert!(!files_updated);
        assert_eq!(patch.update_patch("my.cnf").unwrap(), None);
    }

    #[test]
    fn untracked_changes_are_reported() {
        let tracked = vec!["my.cnf".to_owned()];
        let old = files(&[("my.cnf", "[mysqld]\nport=3306\n"), ("init.sql", "select 1;")]);
        let new = files(&[("my.cnf", "[mysqld]\nport=3306\n"), ("init.sql", "select 2;")]);

        let (patch, files_updated) = ini_patch(&old, &new, &tracked, true);
        assert!(files_updated);
        assert!(patch.is_modify);
        assert!(patch.update_config.is_empty());
        assert_eq!(patch.target.file_count(), 1);

        let (patch, files_updated) = ini_patch(&old, &new, &tracked, false);
        assert!(!files_updated);
        assert!(!patch.is_modify);
    }

    #[rstest]
    #[case(&[("a", "1"), ("b", "2")], &[("a", "1"), ("b", "2")], false)]
    #[case(&[("a", "1"), ("b", "2")], &[("a", "1"), ("b", "3")], true)]
    #[case(&[("a", "1"), ("b", "2")], &[("a", "1")], true)]
    #[case(&[("a", "1")], &[("a", "1"), ("c", "2")], true)]
    #[case(&[("a", "1"), ("b", "2")], &[("a", "9"), ("b", "2")], false)]
    fn exclude_config_difference(
        #[case] old: &[(&str, &str)],
        #[case] new: &[(&str, &str)],
        #[case] expected: bool,
    ) {
        let tracked = vec!["a".to_owned()];
        assert_eq!(
            check_exclude_config_difference(&files(old), &files(new), &tracked),
            expected
        );
    }
}
