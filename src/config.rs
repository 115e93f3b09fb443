//! Promotion configuration.
//!
//! The two working-copy paths, branch names and remote are read from
//! `~/.promote/config.toml` (or the file named by `PROMOTE_CONFIG`) and
//! validated before any working copy is touched.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::error::{Error, Result};

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV_VAR: &str = "PROMOTE_CONFIG";

/// Working copies and branches a promotion operates on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromoteConfig {
    /// Working copy with the development branch checked out.
    #[serde(default = "default_dev_path")]
    pub dev_path: PathBuf,

    /// Working copy with the production branch checked out.
    #[serde(default = "default_prod_path")]
    pub prod_path: PathBuf,

    /// Branch promoted from.
    #[serde(default = "default_dev_branch")]
    pub dev_branch: String,

    /// Branch promoted into.
    #[serde(default = "default_prod_branch")]
    pub prod_branch: String,

    /// Remote shared by both working copies.
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_dev_path() -> PathBuf {
    PathBuf::from("~/promote/develop")
}

fn default_prod_path() -> PathBuf {
    PathBuf::from("~/promote/production")
}

fn default_dev_branch() -> String {
    "develop".to_string()
}

fn default_prod_branch() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for PromoteConfig {
    fn default() -> Self {
        Self::new(default_dev_path(), default_prod_path())
    }
}

impl PromoteConfig {
    /// Creates a configuration for the given working copies with default
    /// branches (`develop` into `main`) and remote (`origin`).
    pub fn new(dev_path: impl Into<PathBuf>, prod_path: impl Into<PathBuf>) -> Self {
        Self {
            dev_path: dev_path.into(),
            prod_path: prod_path.into(),
            dev_branch: default_dev_branch(),
            prod_branch: default_prod_branch(),
            remote: default_remote(),
        }
    }

    /// Sets the development and production branch names.
    pub fn with_branches(mut self, dev: impl Into<String>, prod: impl Into<String>) -> Self {
        self.dev_branch = dev.into();
        self.prod_branch = prod.into();
        self
    }

    /// Sets the remote name.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Loads the configuration from the user's config file.
    pub fn load() -> Result<Self> {
        let path = config_path(std::env::var(CONFIG_ENV_VAR).ok());
        Self::load_from(&path)
    }

    /// Loads the configuration from `path`, falling back to defaults when the
    /// file does not exist. `~/` prefixes in paths are expanded.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<PromoteConfig>(&content).map_err(|source| Error::Toml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::debug!(path = ?path, "no config file, using defaults");
            PromoteConfig::default()
        };

        let home = dirs::home_dir();
        Ok(Self {
            dev_path: expand_home(&config.dev_path, home.as_deref()),
            prod_path: expand_home(&config.prod_path, home.as_deref()),
            ..config
        })
    }
}

/// Resolves the config file location, preferring an explicit override.
pub fn config_path(override_path: Option<String>) -> PathBuf {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .map(|h| h.join(".promote/config.toml"))
        .unwrap_or_else(|| PathBuf::from("~/.promote/config.toml"))
}

/// Replaces a leading `~` with `home`. Paths are returned unchanged when
/// there is no home directory.
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// A problem found while validating a [`PromoteConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// A branch or remote name is blank.
    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    /// Development and production name the same branch.
    #[error("dev_branch and prod_branch are both '{branch}'")]
    SameBranch { branch: String },

    /// Development and production name the same working copy.
    #[error("dev_path and prod_path both point to '{}'", path.display())]
    SamePath { path: PathBuf },

    /// A working-copy path resolves against the current directory.
    #[error("{field} '{}' is relative and depends on the current directory", path.display())]
    RelativePath { field: &'static str, path: PathBuf },
}

impl ConfigIssue {
    /// Returns true if the issue must stop the promotion.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConfigIssue::RelativePath { .. })
    }
}

/// Every issue found in a configuration, fatal or not.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ConfigIssue>,
}

impl ValidationResult {
    /// Returns true if no issue is fatal.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ConfigIssue::is_fatal)
    }

    /// Issues that stop the promotion.
    pub fn errors(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues.iter().filter(|issue| issue.is_fatal())
    }

    /// Issues that are only logged.
    pub fn warnings(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues.iter().filter(|issue| !issue.is_fatal())
    }

    /// Returns the warnings, or a config error listing every fatal issue.
    pub fn into_result(self) -> Result<Vec<ConfigIssue>> {
        if !self.is_valid() {
            let errors: Vec<String> = self.errors().map(ToString::to_string).collect();
            return Err(Error::Config(errors.join("; ")));
        }
        Ok(self.issues)
    }
}

impl PromoteConfig {
    /// Checks names and paths before any working copy is touched.
    pub fn validate(&self) -> ValidationResult {
        let mut issues = Vec::new();

        for (field, value) in [
            ("dev_branch", &self.dev_branch),
            ("prod_branch", &self.prod_branch),
            ("remote", &self.remote),
        ] {
            if value.trim().is_empty() {
                issues.push(ConfigIssue::EmptyField { field });
            }
        }

        if self.dev_branch == self.prod_branch {
            issues.push(ConfigIssue::SameBranch {
                branch: self.dev_branch.clone(),
            });
        }

        for (field, path) in [("dev_path", &self.dev_path), ("prod_path", &self.prod_path)] {
            if path.as_os_str().is_empty() {
                issues.push(ConfigIssue::EmptyField { field });
            } else if path.is_relative() {
                issues.push(ConfigIssue::RelativePath {
                    field,
                    path: path.clone(),
                });
            }
        }

        if self.dev_path == self.prod_path {
            issues.push(ConfigIssue::SamePath {
                path: self.dev_path.clone(),
            });
        }

        ValidationResult { issues }
    }
}
