//! Options tuning the behaviour of the pipeline.
//!
//! All structs can be constructed in code. Additionally, they can be used as CLI arguments of
//! the tools embedding the pipeline. This functionality is only available if the feature `clap`
//! is enabled.

/// The default cluster domain of Kubernetes clusters.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// How often `$(VAR)` references in env values are expanded before giving up.
pub const DEFAULT_MAX_REFERENCE_COUNT: usize = 10;

#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineOptions {
    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[cfg_attr(feature = "clap", command(flatten))]
    pub validator: ValidatorOptions,

    #[cfg_attr(feature = "clap", command(flatten))]
    pub render: RenderOptions,
}

#[cfg_attr(
    feature = "clap",
    derive(clap::Args),
    command(next_help_heading = "Validation Options")
)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// Don't convert string values into the type declared by the parameter schema before
    /// validating them.
    ///
    /// Every value of formats like INI is a string, so with this flag set only string typed
    /// parameters of such files pass the validation.
    #[cfg_attr(feature = "clap", arg(long, env = "KB_DISABLE_AUTO_TRANSFORM"))]
    pub disable_auto_transform: bool,
}

#[cfg_attr(
    feature = "clap",
    derive(clap::Args),
    command(next_help_heading = "Render Options")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderOptions {
    /// The Kubernetes cluster domain, exposed to templates as `clusterDomain`.
    #[cfg_attr(feature = "clap", arg(
        long,
        env = "KB_CLUSTER_DOMAIN",
        default_value = DEFAULT_CLUSTER_DOMAIN
    ))]
    pub cluster_domain: String,

    /// How often `$(VAR)` references in env values are expanded. Values still containing
    /// references afterwards are considered to be cyclic.
    #[cfg_attr(feature = "clap", arg(
        long,
        env = "KB_MAX_REFERENCE_COUNT",
        default_value_t = DEFAULT_MAX_REFERENCE_COUNT
    ))]
    pub max_reference_count: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_owned(),
            max_reference_count: DEFAULT_MAX_REFERENCE_COUNT,
        }
    }
}

#[cfg(all(test, feature = "clap"))]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        engine: EngineOptions,
    }

    #[test]
    fn defaults_match_clap_defaults() {
        let cli = Cli::try_parse_from(["kb"]).unwrap();
        assert_eq!(cli.engine, EngineOptions::default());
    }

    #[test]
    fn arguments() {
        let cli = Cli::try_parse_from([
            "kb",
            "--disable-auto-transform",
            "--cluster-domain",
            "kb.local",
            "--max-reference-count",
            "3",
        ])
        .unwrap();

        assert_eq!(
            cli.engine,
            EngineOptions {
                validator: ValidatorOptions {
                    disable_auto_transform: true,
                },
                render: RenderOptions {
                    cluster_domain: "kb.local".to_owned(),
                    max_reference_count: 3,
                },
            }
        );
    }
}
