// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for autotriage.
//!
//! The config is layered: the embedded [`TriageConfig::DEFAULT_CONFIG`] is read first, and a
//! repository-specific `.config/autotriage.toml` (or a file passed in explicitly) is merged on top.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::Utf8Path;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Overall configuration for autotriage.
#[derive(Clone, Debug)]
pub struct TriageConfig {
    /// Failure location extraction.
    pub failure_locations: FailureLocationConfig,

    /// Label proposals for new failures.
    pub similarity: SimilarityConfig,

    /// Cross-run inheritance.
    pub inheritance: InheritanceConfig,

    /// Fixed labels for testcases that need no triage.
    pub labels: LabelConfig,

    /// GitHub access.
    pub github: GithubConfig,

    /// Failure message templates, in config order.
    pub failure_templates: Vec<FailureTemplate>,
}

impl TriageConfig {
    /// The default location of the config within the path: `.config/autotriage.toml`.
    pub const CONFIG_PATH: &'static str = ".config/autotriage.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the given file, or if not specified from `.config/autotriage.toml`
    /// in the workspace root.
    ///
    /// If no config file is specified and the workspace root doesn't have
    /// `.config/autotriage.toml`, uses the default config options.
    pub fn from_sources(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(workspace_root, config_file, |config_file, unknown| {
            let mut unknown_str = String::new();
            if unknown.len() == 1 {
                // Print this on the same line.
                unknown_str.push(' ');
                unknown_str.extend(unknown.iter().map(String::as_str));
            } else {
                for ignored_key in unknown {
                    unknown_str.push_str("\n  - ");
                    unknown_str.push_str(ignored_key);
                }
            }

            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}")
        })
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        deserialized
            .into_config()
            .map_err(|kind| ConfigParseError::new(config_file, kind))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(TriageConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: TriageConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key, drop it for consistency.
                let path = error.path().clone();
                let config_error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path,
                    config_error,
                )))
            })?;

        Ok((config, ignored))
    }
}

impl Default for TriageConfig {
    /// The values of the embedded default config, without failure templates.
    fn default() -> Self {
        Self {
            failure_locations: FailureLocationConfig::default(),
            similarity: SimilarityConfig::default(),
            inheritance: InheritanceConfig::default(),
            labels: LabelConfig::default(),
            github: GithubConfig::default(),
            failure_templates: Vec::new(),
        }
    }
}

/// Failure location extraction settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct FailureLocationConfig {
    /// Locations in the same file within this many lines of the last kept one are dropped.
    pub nearby_line_buffer: u32,

    /// Number of log lines kept on either side of a failure location.
    pub log_context_lines: usize,

    /// The directory searched for source files.
    pub source_root: String,

    /// How many ancestors of the working directory are searched for `source_root`.
    pub max_ancestor_depth: usize,

    /// Whether source code context is looked up at all.
    pub source_lookup: bool,
}

impl Default for FailureLocationConfig {
    fn default() -> Self {
        Self {
            nearby_line_buffer: 5,
            log_context_lines: 10,
            source_root: "feature".to_owned(),
            max_ancestor_depth: 5,
            source_lookup: true,
        }
    }
}

/// Label proposal settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SimilarityConfig {
    /// Maximum number of distinct labels proposed for a failure.
    pub max_candidates: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self { max_candidates: 4 }
    }
}

/// Cross-run inheritance settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct InheritanceConfig {
    /// How testcases are paired with the previous run.
    pub pairing: TestcasePairing,

    /// How many runs before the previous one are searched for where an inherited label was
    /// verified.
    pub verification_lookback: usize,
}

impl Default for InheritanceConfig {
    fn default() -> Self {
        Self {
            pairing: TestcasePairing::Positional,
            verification_lookback: 30,
        }
    }
}

/// How testcases of a run are paired with testcases of the previous run.
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TestcasePairing {
    /// The i-th testcase is paired with the i-th testcase of the previous run, up to the length
    /// of the shorter run.
    #[default]
    Positional,

    /// A testcase is paired with the first testcase of the previous run with the same name.
    ByName,
}

/// Fixed labels for testcases that need no triage.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LabelConfig {
    /// Label for passed testcases.
    pub passed: String,

    /// Label for skipped testcases.
    pub skipped: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            passed: "Test Passed. No Label Required.".to_owned(),
            skipped: "Test Skipped. No Label Required.".to_owned(),
        }
    }
}

/// GitHub access settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GithubConfig {
    /// The environment variable holding an API token.
    pub token_env: String,

    /// Bug names that are placeholders rather than real references.
    pub placeholders: Vec<String>,

    /// The REST API endpoint used for every URL, instead of one derived from the URL's host.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: "GITHUB_TOKEN".to_owned(),
            placeholders: vec!["new failure. todo".to_owned()],
            api_base: None,
        }
    }
}

impl GithubConfig {
    /// Reads the API token from the configured environment variable, if set.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

/// A named failure message template.
#[derive(Clone, Debug)]
pub struct FailureTemplate {
    /// The template name recorded on matching tests.
    pub name: String,

    /// The compiled pattern.
    pub pattern: Regex,
}

impl FailureTemplate {
    /// Creates a new template.
    pub fn new(name: impl Into<String>, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            pattern,
        }
    }

    /// Returns true if the pattern matches the output.
    pub fn is_match(&self, output: &str) -> bool {
        self.pattern.is_match(output)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TriageConfigDeserialize {
    failure_locations: FailureLocationConfig,
    similarity: SimilarityConfig,
    inheritance: InheritanceConfig,
    labels: LabelConfig,
    github: GithubConfig,
    #[serde(default)]
    failure_templates: Vec<FailureTemplateDeserialize>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FailureTemplateDeserialize {
    name: String,
    pattern: String,
}

impl TriageConfigDeserialize {
    fn into_config(self) -> Result<TriageConfig, ConfigParseErrorKind> {
        let failure_templates = self
            .failure_templates
            .into_iter()
            .map(|template| match Regex::new(&template.pattern) {
                Ok(pattern) => Ok(FailureTemplate {
                    name: template.name,
                    pattern,
                }),
                Err(err) => Err(ConfigParseErrorKind::InvalidFailureTemplate {
                    name: template.name,
                    err,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TriageConfig {
            failure_locations: self.failure_locations,
            similarity: self.similarity,
            inheritance: self.inheritance,
            labels: self.labels,
            github: self.github,
            failure_templates,
        })
    }
}
