use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::{
    patch::{ConfigPatchInfo, Result, visualize::flatten_leaves, visualize::trim_section},
    spec::{FileFormatConfig, ParametersDefinitionSpec},
};

/// Returns the names of all parameters changed by `patch` in the files `spec` applies to.
///
/// Names are relative to the INI section of the file, if the definition configures one.
pub fn updated_parameters(
    spec: &ParametersDefinitionSpec,
    patch: &ConfigPatchInfo,
) -> Result<BTreeSet<String>> {
    let section = spec
        .file_format_config
        .as_ref()
        .and_then(FileFormatConfig::section_name);
    let mut parameters = BTreeSet::new();

    for file in patch.update_config.keys().filter(|file| spec.applies_to(file)) {
        if let Some(Value::Object(update)) = patch.update_patch(file)? {
            parameters.extend(
                flatten_leaves(&update)
                    .into_iter()
                    .map(|(path, _)| trim_section(&path, section).to_owned()),
            );
        }
    }

    Ok(parameters)
}

/// Decides whether `patch` can be applied by reloading the database, or whether it needs a
/// restart.
///
/// - Adding or removing files always needs a restart.
/// - A patch without changed parameters can be reloaded.
/// - Changing a static parameter needs a restart.
/// - If only static parameters are declared, every other parameter is dynamic.
/// - If dynamic parameters are declared, every changed parameter must be one of them.
/// - Without any declared parameters, every change needs a restart.
pub fn is_update_dynamic_parameters(
    spec: &ParametersDefinitionSpec,
    patch: &ConfigPatchInfo,
) -> Result<bool> {
    if !patch.add_config.is_empty() || !patch.delete_config.is_empty() {
        debug!(
            added = patch.add_config.len(),
            deleted = patch.delete_config.len(),
            "config files were added or removed"
        );
        return Ok(false);
    }

    let updated = updated_parameters(spec, patch)?;
    if updated.is_empty() {
        return Ok(true);
    }

    let contains = |list: &[String], parameter: &str| list.iter().any(|p| p == parameter);

    if !spec.static_parameters.is_empty() {
        if let Some(parameter) = updated
            .iter()
            .find(|p| contains(&spec.static_parameters, p))
        {
            debug!(%parameter, "static parameter was changed");
            return Ok(false);
        }
        if spec.dynamic_parameters.is_empty() {
            return Ok(true);
        }
    }

    if !spec.dynamic_parameters.is_empty() {
        return Ok(updated
            .iter()
            .all(|p| contains(&spec.dynamic_parameters, p)));
    }

    Ok(false)
}
