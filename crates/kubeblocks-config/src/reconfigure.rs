//! Decides how a change of the config files of a component is rolled out.
//!
//! A reconfiguration runs through these phases, any error aborts it without a result:
//!
//! 1. [`ReconfigurePhase::Prepare`]: collect the current files and the parameter definitions.
//! 2. [`ReconfigurePhase::Render`]: re-render the config templates if they changed, then apply
//!    the custom template of the user according to its [`MergedPolicy`].
//! 3. [`ReconfigurePhase::Merge`]: merge the parameter updates of the user.
//! 4. [`ReconfigurePhase::Diff`]: diff the new files against the current ones.
//! 5. [`ReconfigurePhase::Validate`]: validate every changed file.
//! 6. [`ReconfigurePhase::Classify`]: decide between reloading and restarting.
//!
//! The result is [`ReconfigurePhase::Merged`]: the files to persist and how to apply them.
//! Persisting them is up to the caller.

use std::collections::{BTreeMap, BTreeSet};

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::{debug, info, instrument};

use crate::{
    loader::{self, CfgOptions, ConfigFileCollection, FormatSource},
    object::{Map, ObjectRegistry},
    options::ValidatorOptions,
    params::{self, merge_parameters, merge_updated_config, resolve_format_config},
    patch::{
        self, ConfigPatchInfo, VisualizedParam, create_config_patch, flatten_leaves,
        generate_visualized_params_list, is_update_dynamic_parameters,
    },
    render::{self, TemplateRenderer},
    spec::{
        ComponentConfigDescription, CustomTemplate, MergedPolicy, ParamPairs,
        ParametersDefinitionSpec,
    },
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the config templates changed, but no renderer is configured"))]
    MissingRenderer,

    #[snafu(display("failed to render the config templates"))]
    Render { source: render::Error },

    #[snafu(display("merge policy {policy:?} is not supported"))]
    UnsupportedMergePolicy { policy: MergedPolicy },

    #[snafu(display("failed to load the files of the custom template"))]
    LoadCustomTemplate { source: loader::Error },

    #[snafu(display("failed to patch file {file:?} with the custom template"))]
    PatchFile { file: String, source: loader::Error },

    #[snafu(display("failed to marshal the patched files"))]
    MarshalPatchedFiles { source: loader::Error },

    #[snafu(display("failed to merge the updated parameters"))]
    MergeParameters { source: params::Error },

    #[snafu(display("failed to diff the config files"))]
    Diff { source: patch::Error },

    #[snafu(display("failed to validate the changed config files"))]
    Validate { source: params::Error },

    #[snafu(display("failed to classify the changed parameters"))]
    Classify { source: patch::Error },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ReconfigurePhase {
    Prepare,
    Render,
    Merge,
    Diff,
    Validate,
    Classify,
    Merged,
}

/// How the new config files are applied to the running database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ReloadPolicy {
    /// Nothing changed.
    None,

    /// Every changed parameter can be reloaded while the database is running.
    DynamicReload,

    /// The database has to be restarted.
    Restart,
}

/// A change of the config files of a component.
#[derive(Clone, Debug, Default)]
pub struct ReconfigureRequest {
    /// The files currently persisted, keyed by file name.
    pub current_files: BTreeMap<String, String>,

    /// The config templates, if they changed since the current files were rendered.
    pub templates: Option<BTreeMap<String, String>>,

    /// A template supplied by the user, combined with the rendered files.
    pub custom_template: Option<CustomTemplate>,

    /// Parameter updates, keyed by file.
    pub parameters: Vec<ParamPairs>,

    pub definitions: Vec<ParametersDefinitionSpec>,

    /// The files taking part in the reconfiguration, other files are passed through.
    pub descriptions: Vec<ComponentConfigDescription>,
}

/// The result of a successful reconfiguration.
#[derive(Debug)]
pub struct ReconfigureOutcome {
    /// The files to persist.
    pub files: BTreeMap<String, String>,

    pub policy: ReloadPolicy,

    pub patch: ConfigPatchInfo,

    /// Whether files outside of the descriptions changed.
    pub untracked_files_changed: bool,

    /// The changed parameters, for status reporting.
    pub visualized: Vec<VisualizedParam>,
}

/// Runs reconfigurations, see the [module docs](self).
pub struct Reconfigurer {
    renderer: Option<TemplateRenderer>,
    options: ValidatorOptions,
}

impl Reconfigurer {
    pub fn new(options: ValidatorOptions) -> Self {
        Self {
            renderer: None,
            options,
        }
    }

    /// Sets the renderer used when [`ReconfigureRequest::templates`] is set.
    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[instrument(skip_all, fields(
        files = request.current_files.len(),
        parameters = request.parameters.len()
    ))]
    pub fn reconfigure(&mut self, request: &ReconfigureRequest) -> Result<ReconfigureOutcome> {
        let registry = ObjectRegistry::builtin();
        let descriptions = &request.descriptions;
        let resolve_format = |file: &str| resolve_format_config(descriptions, file).cloned();
        let format = FormatSource::PerFile(&resolve_format);
        let tracked_keys = descriptions
            .iter()
            .map(|description| description.name.clone())
            .collect::<Vec<_>>();
        debug!(
            phase = %ReconfigurePhase::Prepare,
            tracked = tracked_keys.len(),
            "prepared reconfiguration"
        );

        let mut files = match &request.templates {
            Some(templates) => self
                .renderer
                .as_mut()
                .context(MissingRendererSnafu)?
                .render_files(templates)
                .context(RenderSnafu)?,
            None => request.current_files.clone(),
        };
        if let Some(custom_template) = &request.custom_template {
            files = apply_custom_template(registry, files, custom_template, format)?;
        }
        debug!(phase = %ReconfigurePhase::Render, files = files.len(), "prepared base files");

        let updated = merge_parameters(
            &files,
            &request.parameters,
            &request.definitions,
            descriptions,
        )
        .context(MergeParametersSnafu)?;
        let files = merge_updated_config(&files, updated);
        debug!(phase = %ReconfigurePhase::Merge, "merged parameters");

        let (patch, untracked_files_changed) = create_config_patch(
            registry,
            &request.current_files,
            &files,
            format,
            &tracked_keys,
            true,
        )
        .context(DiffSnafu)?;
        debug!(phase = %ReconfigurePhase::Diff, is_modify = patch.is_modify, "diffed files");

        let changed = changed_files(&patch);
        for file in &changed {
            if let Some(content) = files.get(file) {
                params::validate_config(
                    file,
                    content,
                    &request.definitions,
                    descriptions,
                    &self.options,
                )
                .context(ValidateSnafu)?;
            }
        }
        debug!(
            phase = %ReconfigurePhase::Validate,
            files = changed.len(),
            "validated changed files"
        );

        let policy = classify(
            &patch,
            &changed,
            untracked_files_changed,
            &request.definitions,
        )
        .context(ClassifySnafu)?;

        let mut visualized = Vec::new();
        for file in &changed {
            visualized.extend(
                generate_visualized_params_list(
                    &patch,
                    resolve_format_config(descriptions, file),
                    std::slice::from_ref(file),
                )
                .context(ClassifySnafu)?,
            );
        }

        info!(
            phase = %ReconfigurePhase::Merged,
            %policy,
            changed_files = ?changed,
            untracked_files_changed,
            "decided how to apply the config change"
        );
        Ok(ReconfigureOutcome {
            files,
            policy,
            patch,
            untracked_files_changed,
            visualized,
        })
    }
}

/// Combines the rendered files with a user supplied template.
fn apply_custom_template(
    registry: &ObjectRegistry,
    files: BTreeMap<String, String>,
    custom_template: &CustomTemplate,
    format: FormatSource<'_>,
) -> Result<BTreeMap<String, String>> {
    let data = &custom_template.data;
    match custom_template.policy {
        MergedPolicy::None => Ok(merge_updated_config(&files, data.clone())),
        MergedPolicy::Replace => Ok(data.clone()),
        MergedPolicy::Patch => patch_files(registry, files, data, format),
        policy @ MergedPolicy::OnlyAdd => UnsupportedMergePolicySnafu { policy }.fail(),
    }
}

/// Applies the parameters of each file of `data` to the file of the same name. Parameters not
/// mentioned keep their value, files only present in `data` are added as they are.
fn patch_files(
    registry: &ObjectRegistry,
    files: BTreeMap<String, String>,
    data: &BTreeMap<String, String>,
    format: FormatSource<'_>,
) -> Result<BTreeMap<String, String>> {
    let patched_keys = data
        .keys()
        .filter(|file| files.contains_key(*file))
        .cloned()
        .collect::<Vec<_>>();
    let mut base = ConfigFileCollection::from_files(registry, &files, &patched_keys, format)
        .context(LoadCustomTemplateSnafu)?;
    let custom = ConfigFileCollection::from_files(registry, data, &patched_keys, format)
        .context(LoadCustomTemplateSnafu)?;

    for object in custom.iter() {
        let parameters = object.all_parameters();
        let leaves = flatten_leaves(&parameters)
            .into_iter()
            .map(|(path, value)| (path, value.clone()))
            .collect::<Map>();
        base.merge_from(
            &leaves,
            &CfgOptions {
                file: Some(object.name().to_owned()),
                format_config: None,
            },
        )
        .context(PatchFileSnafu {
            file: object.name(),
        })?;
    }

    let mut patched = base.to_cfg_content().context(MarshalPatchedFilesSnafu)?;
    for (file, content) in data {
        patched
            .entry(file.clone())
            .or_insert_with(|| content.clone());
    }
    Ok(merge_updated_config(&files, patched))
}

fn changed_files(patch: &ConfigPatchInfo) -> BTreeSet<String> {
    patch
        .update_config
        .keys()
        .chain(patch.add_config.keys())
        .chain(patch.delete_config.keys())
        .cloned()
        .collect()
}

/// Changes of files without a definition and of untracked files always need a restart.
fn classify(
    patch: &ConfigPatchInfo,
    changed: &BTreeSet<String>,
    untracked_files_changed: bool,
    definitions: &[ParametersDefinitionSpec],
) -> patch::Result<ReloadPolicy> {
    if !patch.is_modify {
        return Ok(ReloadPolicy::None);
    }
    if untracked_files_changed {
        return Ok(ReloadPolicy::Restart);
    }

    for file in changed {
        let Some(definition) = params::resolve_definition(definitions, file) else {
            debug!(%file, "changed file has no parameters definition");
            return Ok(ReloadPolicy::Restart);
        };
        if !is_update_dynamic_parameters(definition, patch)? {
            return Ok(ReloadPolicy::Restart);
        }
    }
    Ok(ReloadPolicy::DynamicReload)
}
