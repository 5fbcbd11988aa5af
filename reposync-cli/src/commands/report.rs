//! Outcome reporter - renders a sync outcome as text or JSON

use reposync_core::lock::LockInfo;
use reposync_core::{ConflictReport, Error, RepoHandle, SyncOutcome};
use serde_json::{json, Value};

/// How the outcome is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            ReportFormat::Json
        } else {
            ReportFormat::Text
        }
    }
}

/// Print the outcome to stdout (text details for failures go to stderr)
pub fn print_outcome(outcome: &SyncOutcome, handle: &RepoHandle, format: ReportFormat) {
    match format {
        ReportFormat::Json => match serde_json::to_string_pretty(&to_json(outcome, handle)) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => eprintln!("Failed to render JSON report: {}", e),
        },
        ReportFormat::Text => {
            let lines = to_text(outcome, handle);
            if outcome.is_success() {
                for line in lines {
                    println!("{}", line);
                }
            } else {
                for line in lines {
                    eprintln!("{}", line);
                }
            }
        }
    }
}

/// Human-readable report lines
pub fn to_text(outcome: &SyncOutcome, handle: &RepoHandle) -> Vec<String> {
    let target = handle.tracking_name();
    let mut lines = Vec::new();

    match outcome {
        SyncOutcome::Succeeded { attempt } => {
            let verb = if attempt.dry_run() {
                "would sync cleanly with"
            } else {
                "is in sync with"
            };
            let revision = attempt
                .fetched_revision()
                .map(short)
                .unwrap_or("(branch not on remote yet)");
            lines.push(format!("Succeeded: {} {} at {}", handle.branch(), verb, target));
            lines.push(format!("  remote revision: {}", revision));
            if let Some(merge) = attempt.merge() {
                lines.push(format!("  paths integrated: {}", merge.touched_paths.len()));
            }
            lines.push(format!("  took {:.1?}", attempt.duration()));
        }
        SyncOutcome::Failed { error, attempt } => {
            lines.push(format!(
                "Failed during {} ({}): {}",
                failed_in(attempt.phases()),
                error.kind(),
                error
            ));
            lines.extend(error_hint(error));
        }
        SyncOutcome::Conflicted { report, attempt } => {
            lines.push(format!(
                "Conflicted: {} path(s) diverged between {} and {}; nothing was pushed",
                report.len(),
                handle.branch(),
                target
            ));
            lines.extend(conflict_lines(report));
            if report.ambiguous_count() > 0 {
                lines.push(format!(
                    "  {} path(s) have more than one interpretation and need manual review",
                    report.ambiguous_count()
                ));
            }
            if !attempt.dry_run() {
                lines.push("  Resolve the conflicts locally, commit, then run sync again".to_string());
            }
        }
        SyncOutcome::Diverged { .. } => {
            lines.push(format!(
                "Diverged: {} and {} share no history; nothing was pushed",
                handle.branch(),
                target
            ));
            lines.push(
                "  Set sync.allow_unrelated_histories = true and run 'reposync union' to merge them"
                    .to_string(),
            );
        }
        SyncOutcome::AlreadyRunning { lock_path, holder } => {
            lines.push(format!(
                "AlreadyRunning: another sync holds {}",
                lock_path.display()
            ));
            if let Some(holder) = holder {
                lines.push(holder_line(holder));
            }
            lines.push(
                "  If that process is gone, run 'reposync unlock --force' to clear the lock"
                    .to_string(),
            );
        }
        SyncOutcome::Cancelled { attempt } => {
            lines.push(format!(
                "Cancelled during {}; local branch restored, nothing was pushed",
                failed_in(attempt.phases())
            ));
        }
    }

    lines
}

/// Machine-readable report
pub fn to_json(outcome: &SyncOutcome, handle: &RepoHandle) -> Value {
    let mut report = json!({
        "outcome": outcome.name(),
        "exit_code": outcome.exit_code(),
        "repository": handle,
    });

    if let Some(attempt) = outcome.attempt() {
        report["attempt"] = json!(attempt);
    }

    match outcome {
        SyncOutcome::Failed { error, .. } => {
            report["error"] = json!({
                "kind": error.kind(),
                "message": error.to_string(),
                "retryable": error.is_retryable(),
            });
            if let Error::DirtyWorkingTree { paths } = error {
                report["error"]["paths"] = json!(paths);
            }
        }
        SyncOutcome::Conflicted { report: conflicts, .. } => {
            report["conflicts"] = json!(conflicts);
        }
        SyncOutcome::AlreadyRunning { lock_path, holder } => {
            report["lock"] = json!({
                "path": lock_path,
                "holder": holder,
            });
        }
        _ => {}
    }

    report
}

/// One line per conflicting path, in path order
pub fn conflict_lines(report: &ConflictReport) -> Vec<String> {
    report
        .iter()
        .map(|(path, conflict)| format!("  {}: {}", path, conflict))
        .collect()
}

pub fn holder_line(holder: &LockInfo) -> String {
    format!(
        "  held by pid {} syncing {}/{} since {}",
        holder.pid,
        holder.remote,
        holder.branch,
        humantime::format_rfc3339_seconds(holder.started_at)
    )
}

fn error_hint(error: &Error) -> Vec<String> {
    match error {
        Error::DirtyWorkingTree { paths } => {
            let mut lines: Vec<String> = paths.iter().map(|p| format!("  {}", p)).collect();
            lines.push("  Commit or stash these changes, then run sync again".to_string());
            lines
        }
        Error::NonFastForward(_) => {
            vec!["  The remote moved after the fetch. Run sync again.".to_string()]
        }
        Error::OperationInProgress { state } => {
            vec![format!("  Run 'git {} --abort' or finish it first", state)]
        }
        Error::AuthFailure(_) => {
            vec!["  Check the credentials configured for this remote".to_string()]
        }
        e if e.is_retryable() => vec!["  Safe to retry later".to_string()],
        _ => Vec::new(),
    }
}

/// Last non-terminal phase of an attempt
fn failed_in(phases: &[reposync_core::sync::SyncPhase]) -> String {
    phases
        .iter()
        .rev()
        .find(|p| !p.is_terminal())
        .map(|p| p.to_string().to_lowercase())
        .unwrap_or_else(|| "startup".to_string())
}

fn short(revision: &str) -> &str {
    revision.get(..10).unwrap_or(revision)
}
