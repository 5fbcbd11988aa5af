//! Reposync CLI - Command line interface for reposync
//!
//! Keeps a working copy and its remote branch in step without ever leaving a
//! half-pushed state.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reposync_core::{CliOverrides, Config, RepoHandle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{StatusArgs, SyncArgs, UnionArgs, UnlockArgs};

/// reposync: single-flight pull/merge/push for a git working copy
#[derive(Parser, Debug)]
#[command(name = "reposync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Fetch, merge or rebase, and push one repository
    ///
    /// Exit codes: 0 succeeded, 1 failed, 2 conflicted, 3 diverged,
    /// 4 already running, 130 cancelled.
    #[command(visible_alias = "s")]
    Sync(SyncArgs),

    /// Merge a remote branch with unrelated history (explicit opt-in)
    Union(UnionArgs),

    /// Show ahead/behind/dirty state
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Inspect or clear the sync lock
    Unlock(UnlockArgs),

    /// Show the effective configuration
    Config {
        /// Repository whose config file to include
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let code = match cli.command {
        Some(Commands::Version) => {
            println!("reposync {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Some(Commands::Sync(args)) => args.execute(cli.verbose).await?,
        Some(Commands::Union(args)) => args.execute(cli.verbose).await?,
        Some(Commands::Status(args)) => {
            args.execute(cli.verbose).await?;
            0
        }
        Some(Commands::Unlock(args)) => {
            args.execute(cli.verbose)?;
            0
        }
        Some(Commands::Config { path }) => {
            show_config(&path)?;
            0
        }
        None => {
            println!("reposync - single-flight pull/merge/push for a git working copy");
            println!();
            println!("Use --help for usage information");
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn show_config(path: &std::path::Path) -> anyhow::Result<()> {
    let repo_root = RepoHandle::discover_root(path).ok();
    let config = match &repo_root {
        Some(root) => Config::load_for_repo(root, CliOverrides::default())?,
        None => Config::default().with_env_overrides()?,
    };

    println!("Reposync Configuration");
    println!("======================");
    println!();
    println!("Sync Settings:");
    println!("  remote_name: {}", config.sync.remote_name);
    println!(
        "  target_branch: {}",
        config
            .sync
            .target_branch
            .as_deref()
            .unwrap_or("(current branch)")
    );
    println!("  strategy: {}", config.sync.strategy);
    println!(
        "  allow_unrelated_histories: {}",
        config.sync.allow_unrelated_histories
    );
    println!("  keep_conflicts: {}", config.sync.keep_conflicts);
    println!();
    println!("Git Settings:");
    println!("  git_path: {}", config.git.git_path);
    println!();

    let mut files = Vec::new();
    if let Some(path) = Config::default_config_path() {
        files.push(path);
    }
    if let Some(root) = &repo_root {
        files.push(Config::repo_config_path(root));
    }
    for file in files {
        println!("Config file: {}", file.display());
        if file.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::Strategy;

    #[test]
    fn test_parse_sync_defaults() {
        let cli = Cli::try_parse_from(["reposync", "sync", "/work/app"]).unwrap();
        let Some(Commands::Sync(args)) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.target.path, PathBuf::from("/work/app"));
        assert_eq!(args.strategy, None);
        assert!(!args.dry_run);
        assert!(!args.json);
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::try_parse_from([
            "reposync",
            "sync",
            "/work/app",
            "--strategy=rebase",
            "--dry-run",
            "--branch",
            "develop",
            "--json",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Some(Commands::Sync(args)) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.strategy, Some(Strategy::Rebase));
        assert!(args.dry_run);
        assert!(args.json);
        assert_eq!(args.target.branch.as_deref(), Some("develop"));
    }

    #[test]
    fn test_parse_rejects_unknown_strategy() {
        let result = Cli::try_parse_from(["reposync", "sync", ".", "--strategy=squash"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_path_defaults_to_cwd() {
        let cli = Cli::try_parse_from(["reposync", "status"]).unwrap();
        let Some(Commands::Status(args)) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.target.path, PathBuf::from("."));
    }

    #[test]
    fn test_parse_unlock_force() {
        let cli = Cli::try_parse_from(["reposync", "unlock", "/work/app", "--force"]).unwrap();
        let Some(Commands::Unlock(args)) = cli.command else {
            panic!("expected unlock");
        };
        assert!(args.force);
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
