//! Status command - show ahead/behind/dirty state without changing anything

use clap::Args;
use reposync_core::lock::read_lock;
use reposync_core::{Backend, GitBackend};

use super::report::holder_line;
use super::target::TargetArgs;

/// Show how the local branch relates to its remote-tracking branch
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    /// Execute the status command
    ///
    /// Reads the last fetched remote-tracking ref; it does not fetch.
    pub async fn execute(&self, verbose: bool) -> anyhow::Result<()> {
        let (config, handle) = self.target.resolve(self.target.overrides(), verbose)?;
        let backend = GitBackend::from_config(&config.git);

        let status = backend.status(&handle).await?;
        let lock = read_lock(&handle)?;

        if self.json {
            let report = serde_json::json!({
                "repository": handle,
                "status": status,
                "lock": lock,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Repository: {}", handle.root().display());
        println!(
            "Target:     {} ({})",
            handle.tracking_name(),
            handle.remote().redacted_url()
        );
        println!(
            "HEAD:       {}",
            status.head.as_deref().unwrap_or("(no commits yet)")
        );
        println!("Ahead:      {}", status.ahead);
        println!("Behind:     {}", status.behind);

        if let Some(state) = &status.in_progress {
            println!("In progress: {} (finish or abort it before syncing)", state);
        }

        if status.dirty() {
            println!("Dirty:      {} path(s)", status.dirty_paths.len());
            for path in &status.dirty_paths {
                println!("  {}", path);
            }
        } else {
            println!("Dirty:      no");
        }

        if let Some(holder) = lock {
            println!("Sync running:");
            println!("{}", holder_line(&holder));
        }

        Ok(())
    }
}
