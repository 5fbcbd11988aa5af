//! Configuration management for reposync
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (REPOSYNC_*)
//! 3. Repository file (`<repo root>/.reposync.toml`)
//! 4. User file (~/.config/reposync/config.toml)
//! 5. Default values

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::Strategy;
use crate::{Error, Result};

/// Name of the per-repository config file
pub const REPO_CONFIG_FILE: &str = ".reposync.toml";

/// Synchronization target and policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Configured remote to sync against
    pub remote_name: String,

    /// Branch to pull from and push to; must be checked out unless HEAD is detached
    pub target_branch: Option<String>,

    /// How remote changes are integrated
    pub strategy: Strategy,

    /// Whether the explicit union command may merge unrelated histories
    pub allow_unrelated_histories: bool,

    /// Leave a conflicted merge in the working tree instead of aborting it
    pub keep_conflicts: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_name: "origin".to_string(),
            target_branch: None,
            strategy: Strategy::Merge,
            allow_unrelated_histories: false,
            keep_conflicts: false,
        }
    }
}

/// Version-control client settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path to the git executable
    pub git_path: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            git_path: "git".to_string(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Sync configuration
    pub sync: SyncConfig,

    /// Git client configuration
    pub git: GitConfig,
}

/// Partial configuration as found in a file; unset keys keep lower layers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    sync: SyncLayer,
    git: GitLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SyncLayer {
    remote_name: Option<String>,
    target_branch: Option<String>,
    strategy: Option<Strategy>,
    allow_unrelated_histories: Option<bool>,
    keep_conflicts: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GitLayer {
    git_path: Option<String>,
}

/// Overrides supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub remote_name: Option<String>,
    pub target_branch: Option<String>,
    pub strategy: Option<Strategy>,
    pub keep_conflicts: bool,
    pub git_path: Option<String>,
}

impl Config {
    /// Get the default user config file path
    ///
    /// Returns `~/.config/reposync/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reposync").join("config.toml"))
    }

    /// Path of the per-repository config file
    pub fn repo_config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(REPO_CONFIG_FILE)
    }

    /// Parse a complete configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        Self::default().with_toml_layer(contents)
    }

    /// Apply a TOML layer over this configuration
    fn with_toml_layer(mut self, contents: &str) -> Result<Self> {
        let layer: ConfigLayer = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        if let Some(remote) = layer.sync.remote_name {
            self.sync.remote_name = remote;
        }
        if let Some(branch) = layer.sync.target_branch {
            self.sync.target_branch = Some(branch);
        }
        if let Some(strategy) = layer.sync.strategy {
            self.sync.strategy = strategy;
        }
        if let Some(allow) = layer.sync.allow_unrelated_histories {
            self.sync.allow_unrelated_histories = allow;
        }
        if let Some(keep) = layer.sync.keep_conflicts {
            self.sync.keep_conflicts = keep;
        }
        if let Some(git_path) = layer.git.git_path {
            self.git.git_path = git_path;
        }

        Ok(self)
    }

    /// Apply a config file over this configuration, if it exists
    fn with_file_layer(self, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(self);
        }
        let contents = std::fs::read_to_string(path)?;
        self.with_toml_layer(&contents).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - REPOSYNC_REMOTE: remote name
    /// - REPOSYNC_BRANCH: target branch
    /// - REPOSYNC_STRATEGY: merge or rebase
    /// - REPOSYNC_GIT_PATH: path to the git executable
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, keyed by environment variable name
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(remote) = lookup("REPOSYNC_REMOTE") {
            self.sync.remote_name = remote;
        }
        if let Some(branch) = lookup("REPOSYNC_BRANCH") {
            self.sync.target_branch = Some(branch);
        }
        if let Some(strategy) = lookup("REPOSYNC_STRATEGY") {
            self.sync.strategy = strategy.parse()?;
        }
        if let Some(git_path) = lookup("REPOSYNC_GIT_PATH") {
            self.git.git_path = git_path;
        }
        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, overrides: CliOverrides) -> Self {
        if let Some(remote) = overrides.remote_name {
            self.sync.remote_name = remote;
        }
        if let Some(branch) = overrides.target_branch {
            self.sync.target_branch = Some(branch);
        }
        if let Some(strategy) = overrides.strategy {
            self.sync.strategy = strategy;
        }
        if overrides.keep_conflicts {
            self.sync.keep_conflicts = true;
        }
        if let Some(git_path) = overrides.git_path {
            self.git.git_path = git_path;
        }
        self
    }

    /// Load configuration for a repository with all overrides applied
    ///
    /// Priority: CLI > env > repository file > user file > defaults
    pub fn load_for_repo(repo_root: &Path, overrides: CliOverrides) -> Result<Self> {
        let mut config = Self::default();
        if let Some(user_path) = Self::default_config_path() {
            config = config.with_file_layer(&user_path)?;
        }
        Ok(config
            .with_file_layer(&Self::repo_config_path(repo_root))?
            .with_env_overrides()?
            .with_cli_overrides(overrides))
    }
}
