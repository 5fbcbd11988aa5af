//! Sync command - fetch, integrate and push one repository

use std::sync::Arc;

use clap::Args;
use reposync_core::{
    CancelHandle, CancelResponse, CliOverrides, Config, GitBackend, RepoHandle, Strategy,
    SyncOptions, SyncOrchestrator, SyncOutcome,
};

use super::report::{print_outcome, ReportFormat};
use super::target::TargetArgs;

/// Pull remote changes into the local branch and push the result
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// How remote changes are integrated
    #[arg(long, value_parser = parse_strategy)]
    pub strategy: Option<Strategy>,

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

pub(crate) fn parse_strategy(s: &str) -> Result<Strategy, String> {
    s.parse::<Strategy>().map_err(|e| e.to_string())
}

impl SyncArgs {
    /// Execute the sync command, returning the process exit code
    pub async fn execute(&self, verbose: bool) -> anyhow::Result<i32> {
        let overrides = CliOverrides {
            strategy: self.strategy,
            keep_conflicts: self.keep_conflicts,
            ..self.target.overrides()
        };
        let (config, handle) = self.target.resolve(overrides, verbose)?;
        let options = SyncOptions::from_config(&config.sync).with_dry_run(self.dry_run);

        let outcome = run_interruptible(&config, &handle, options).await;
        print_outcome(&outcome, &handle, ReportFormat::from_flag(self.json));
        Ok(outcome.exit_code())
    }
}

/// Run one attempt, turning SIGINT, SIGTERM and SIGHUP into a cancellation request
pub(crate) async fn run_interruptible(
    config: &Config,
    handle: &RepoHandle,
    options: SyncOptions,
) -> SyncOutcome {
    let orchestrator = SyncOrchestrator::new(Arc::new(GitBackend::from_config(&config.git)));
    let cancel = CancelHandle::new();

    let watcher = match Interrupts::new() {
        Ok(mut interrupts) => {
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                while let Some(signal) = interrupts.next().await {
                    match cancel.cancel() {
                        CancelResponse::Accepted => {
                            eprintln!("{}: cancelling; restoring the local branch...", signal);
                            break;
                        }
                        CancelResponse::Refused => {
                            eprintln!("{}: push already started; waiting for it to finish", signal);
                        }
                    }
                }
            }))
        }
        Err(e) => {
            tracing::warn!("Cannot listen for interrupt signals: {}", e);
            None
        }
    };

    let outcome = orchestrator.sync_with_cancel(handle, options, &cancel).await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    outcome
}

/// Signals that ask a running sync to stop
struct Interrupts {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Interrupts {
    fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Name of the next signal received; `None` once signals can no longer arrive
    async fn next(&mut self) -> Option<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                received = tokio::signal::ctrl_c() => received.ok().map(|_| "SIGINT"),
                received = self.terminate.recv() => received.map(|_| "SIGTERM"),
                received = self.hangup.recv() => received.map(|_| "SIGHUP"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok().map(|_| "Ctrl-C")
        }
    }
}
