//! Repository selection shared by every command

use std::path::PathBuf;

use clap::Args;
use reposync_core::{CliOverrides, Config, RepoHandle};

/// Which working copy, remote and branch a command acts on
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Path inside the working copy to sync
    #[arg(value_name = "REPOSITORY_PATH", default_value = ".")]
    pub path: PathBuf,

    /// Remote to sync against (overrides config and env)
    #[arg(long)]
    pub remote: Option<String>,

    /// Branch to pull from and push to; must be checked out unless HEAD is detached
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Path to the git executable (overrides config and env)
    #[arg(long)]
    pub git_path: Option<String>,
}

impl TargetArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            remote_name: self.remote.clone(),
            target_branch: self.branch.clone(),
            git_path: self.git_path.clone(),
            ..Default::default()
        }
    }

    /// Load layered config for the repository and open its handle
    pub fn resolve(&self, overrides: CliOverrides, verbose: bool) -> anyhow::Result<(Config, RepoHandle)> {
        let root = RepoHandle::discover_root(&self.path)?;
        let config = Config::load_for_repo(&root, overrides)?;
        let handle = RepoHandle::open(&root, &config.sync)?;

        if verbose {
            tracing::info!(
                remote = %config.sync.remote_name,
                branch = ?config.sync.target_branch,
                strategy = %config.sync.strategy,
                git_path = %config.git.git_path,
                "Configuration loaded"
            );
            tracing::info!(repo = %handle, "Repository resolved");
        }

        Ok((config, handle))
    }
}
