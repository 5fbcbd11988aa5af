//! Union command - explicit merge of unrelated histories

use clap::Args;
use reposync_core::{CliOverrides, SyncOptions};

use super::report::{print_outcome, ReportFormat};
use super::sync::run_interruptible;
use super::target::TargetArgs;

/// Merge a remote branch that shares no history with the local one
///
/// Requires `sync.allow_unrelated_histories = true`. Always merges.
#[derive(Args, Debug)]
pub struct UnionArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Predict the outcome without merging or pushing
    #[arg(long)]
    pub dry_run: bool,

    /// Leave a conflicted merge in the working tree for manual resolution
    #[arg(long)]
    pub keep_conflicts: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl UnionArgs {
    /// Execute the union command, returning the process exit code
    pub async fn execute(&self, verbose: bool) -> anyhow::Result<i32> {
        let overrides = CliOverrides {
            keep_conflicts: self.keep_conflicts,
            ..self.target.overrides()
        };
        let (config, handle) = self.target.resolve(overrides, verbose)?;
        let options = SyncOptions::union(&config.sync)?.with_dry_run(self.dry_run);

        let outcome = run_interruptible(&config, &handle, options).await;
        print_outcome(&outcome, &handle, ReportFormat::from_flag(self.json));
        Ok(outcome.exit_code())
    }
}
