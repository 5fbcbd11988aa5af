//! Git backend
//!
//! Network and history-changing operations go through the `git` executable so
//! the user's credential helpers, hooks and config apply. Read-only queries use
//! libgit2 on a blocking worker.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use git2::{build::CheckoutBuilder, Index, Oid, Repository, RepositoryState, StatusOptions};
use tokio::process::Command;

use super::{
    Backend, FetchResult, MergeRequest, MergeResult, MergeStatus, PushResult, RepoStatus, Stages,
    Strategy, TouchedPath,
};
use crate::config::GitConfig;
use crate::repo::RepoHandle;
use crate::{Error, Result};

/// stderr fragments that mean the remote rejected our credentials
const AUTH_FAILURE_PATTERNS: &[&str] = &[
    "Authentication failed",
    "could not read Username",
    "could not read Password",
    "terminal prompts disabled",
    "Permission denied (publickey",
    "Host key verification failed",
    "Access denied",
    "returned error: 401",
    "returned error: 403",
];

/// Push summaries that mean the remote moved since our fetch
const NON_FAST_FORWARD_PATTERNS: &[&str] = &["non-fast-forward", "fetch first", "stale info"];

/// Captured output of a git invocation
#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Backend driving an installed git client
#[derive(Debug, Clone)]
pub struct GitBackend {
    git_path: String,
}

impl GitBackend {
    /// Create a backend using `git` from PATH
    pub fn new() -> Self {
        Self {
            git_path: "git".to_string(),
        }
    }

    /// Use a specific git executable
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.git_path = path.into();
        self
    }

    /// Create a backend from the `[git]` config section
    pub fn from_config(config: &GitConfig) -> Self {
        Self::new().with_path(config.git_path.clone())
    }

    async fn git(&self, handle: &RepoHandle, args: &[&str]) -> Result<GitOutput> {
        tracing::debug!(
            git = %self.git_path,
            args = ?args,
            root = %handle.root().display(),
            "Running git"
        );

        let mut command = Command::new(&self.git_path);
        command
            .args(args)
            .current_dir(handle.root())
            // Fail instead of blocking on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // Terminal signals reach only reposync; a started push is never interrupted
        #[cfg(unix)]
        command.process_group(0);

        let output = command
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::BackendUnavailable(format!(
                        "git executable not found at '{}'. Is git installed?",
                        self.git_path
                    ))
                } else {
                    Error::BackendUnavailable(format!("Failed to run git: {}", e))
                }
            })?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git and turn a non-zero exit into a classified error
    async fn git_checked(&self, handle: &RepoHandle, args: &[&str]) -> Result<GitOutput> {
        let operation = args.first().copied().unwrap_or("git");
        let output = self.git(handle, args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(classify_failure(operation, &output.stderr))
        }
    }
}

impl Default for GitBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn status(&self, handle: &RepoHandle) -> Result<RepoStatus> {
        let tracking = handle.tracking_ref();
        with_repo(handle, move |repo| {
            let head = head_oid(repo)?;
            let remote = ref_oid(repo, &tracking)?;
            let (ahead, behind) = match (head, remote) {
                (Some(h), Some(r)) => repo.graph_ahead_behind(h, r)?,
                (Some(h), None) => (count_commits(repo, h)?, 0),
                (None, Some(r)) => (0, count_commits(repo, r)?),
                (None, None) => (0, 0),
            };
            Ok(RepoStatus {
                head: head.map(|o| o.to_string()),
                ahead,
                behind,
                dirty_paths: dirty_paths(repo)?,
                in_progress: pending_operation(repo).map(|s| s.to_string()),
            })
        })
        .await
        .map_err(|e| match e {
            Error::Git(e) => {
                Error::BackendUnavailable(format!("Cannot read repository: {}", e.message()))
            }
            other => other,
        })
    }

    async fn fetch(&self, handle: &RepoHandle) -> Result<FetchResult> {
        let tracking = handle.tracking_ref();
        let refspec = format!("+refs/heads/{}:{}", handle.branch(), tracking);

        let output = self
            .git(
                handle,
                &["fetch", "--no-tags", &handle.remote().name, &refspec],
            )
            .await?;

        if !output.success {
            if output.stderr.contains("couldn't find remote ref") {
                tracing::info!(
                    branch = %handle.branch(),
                    remote = %handle.remote().name,
                    "Remote branch does not exist yet"
                );
                with_repo(handle, move |repo| {
                    if let Ok(mut stale) = repo.find_reference(&tracking) {
                        stale.delete()?;
                    }
                    Ok(())
                })
                .await?;
                return Ok(FetchResult {
                    new_revision_available: false,
                    revision_id: None,
                });
            }
            return Err(classify_failure("fetch", &output.stderr));
        }

        with_repo(handle, move |repo| {
            let remote = ref_oid(repo, &tracking)?;
            let new_revision_available = match remote {
                Some(r) => !contains(repo, head_oid(repo)?, r)?,
                None => false,
            };
            Ok(FetchResult {
                new_revision_available,
                revision_id: remote.map(|o| o.to_string()),
            })
        })
        .await
    }

    async fn merge_or_rebase(
        &self,
        handle: &RepoHandle,
        request: MergeRequest,
    ) -> Result<MergeResult> {
        let tracking = handle.tracking_ref();
        let plan = with_repo(handle, move |repo| plan_merge(repo, &tracking, request)).await?;

        let pre_head = match plan {
            MergePlan::UpToDate => return Ok(MergeResult::up_to_date()),
            MergePlan::Unrelated => return Ok(MergeResult::unrelated()),
            MergePlan::Run { head, .. } => head,
        };

        // Rebase needs a branch to replay; unrelated histories are only ever merged
        let strategy = if pre_head.is_none() || request.allow_unrelated_histories {
            Strategy::Merge
        } else {
            request.strategy
        };

        let upstream = handle.tracking_name();
        let mut args = match strategy {
            Strategy::Merge => vec!["merge", "--no-edit"],
            Strategy::Rebase => vec!["rebase"],
        };
        if request.allow_unrelated_histories {
            args.push("--allow-unrelated-histories");
        }
        args.push(&upstream);

        let output = self.git(handle, &args).await?;

        let (unmerged, changed) = with_repo(handle, move |repo| {
            let unmerged = index_conflicts(&repo.index()?, strategy)?;
            if !unmerged.is_empty() {
                return Ok((unmerged, Vec::new()));
            }
            let new_head = head_oid(repo)?;
            let changed = if new_head != pre_head {
                changed_paths(repo, pre_head, new_head)?
            } else {
                Vec::new()
            };
            Ok((unmerged, changed))
        })
        .await?;

        if !unmerged.is_empty() {
            return Ok(MergeResult {
                status: MergeStatus::Conflicted,
                touched_paths: unmerged,
            });
        }
        if output.success {
            return Ok(MergeResult {
                status: MergeStatus::Clean,
                touched_paths: changed,
            });
        }

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("refusing to merge unrelated histories") {
            return Ok(MergeResult::unrelated());
        }
        if combined.contains("would be overwritten by") {
            return Err(Error::DirtyWorkingTree {
                paths: parse_overwritten_paths(&combined),
            });
        }
        Err(classify_failure(strategy_verb(strategy), &output.stderr))
    }

    async fn preview_merge(
        &self,
        handle: &RepoHandle,
        request: MergeRequest,
    ) -> Result<MergeResult> {
        let tracking = handle.tracking_ref();
        with_repo(handle, move |repo| {
            let (head, remote) = match plan_merge(repo, &tracking, request)? {
                MergePlan::UpToDate => return Ok(MergeResult::up_to_date()),
                MergePlan::Unrelated => return Ok(MergeResult::unrelated()),
                MergePlan::Run { head, remote } => (head, remote),
            };

            let Some(head) = head else {
                return Ok(MergeResult {
                    status: MergeStatus::Clean,
                    touched_paths: changed_paths(repo, None, Some(remote))?,
                });
            };

            let ours = repo.find_commit(head)?;
            let theirs = repo.find_commit(remote)?;
            let mut options = git2::MergeOptions::new();
            options.find_renames(true);
            let index = repo.merge_commits(&ours, &theirs, Some(&options))?;

            if index.has_conflicts() {
                return Ok(MergeResult {
                    status: MergeStatus::Conflicted,
                    touched_paths: index_conflicts(&index, Strategy::Merge)?,
                });
            }

            let base = repo.merge_base(head, remote).ok();
            Ok(MergeResult {
                status: MergeStatus::Clean,
                touched_paths: changed_paths(repo, base, Some(remote))?,
            })
        })
        .await
    }

    async fn rollback(&self, handle: &RepoHandle, revision: Option<&str>) -> Result<()> {
        let pending = with_repo(handle, |repo| {
            Ok(pending_operation(repo).map(|s| s.to_string()))
        })
        .await?;

        match pending.as_deref() {
            Some("merge") => {
                self.git_checked(handle, &["merge", "--abort"]).await?;
            }
            Some("rebase") => {
                self.git_checked(handle, &["rebase", "--abort"]).await?;
            }
            Some(other) => {
                return Err(Error::OperationInProgress {
                    state: other.to_string(),
                })
            }
            None => {}
        }

        let head = with_repo(handle, head_oid).await?;
        match revision {
            Some(rev) if head.map(|h| h.to_string()).as_deref() != Some(rev) => {
                tracing::info!(revision = %rev, "Resetting HEAD to pre-sync revision");
                self.git_checked(handle, &["reset", "--hard", "--quiet", rev])
                    .await?;
            }
            None if head.is_some() => {
                tracing::info!("Returning branch to its unborn state");
                with_repo(handle, unborn_reset).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn push(&self, handle: &RepoHandle) -> Result<PushResult> {
        if with_repo(handle, head_oid).await?.is_none() {
            tracing::debug!("HEAD is unborn; nothing to push");
            return Ok(PushResult::accepted());
        }

        let destination = format!("HEAD:refs/heads/{}", handle.branch());
        let output = self
            .git(
                handle,
                &["push", "--porcelain", &handle.remote().name, &destination],
            )
            .await?;

        if let Some(reason) = rejected_reason(&output.stdout) {
            if NON_FAST_FORWARD_PATTERNS.iter().any(|p| reason.contains(p)) {
                return Err(Error::NonFastForward(reason));
            }
            return Ok(PushResult::rejected(reason));
        }
        if output.success {
            return Ok(PushResult::accepted());
        }
        Err(classify_failure("push", &output.stderr))
    }
}

/// What `merge_or_rebase` has to do
enum MergePlan {
    UpToDate,
    Unrelated,
    Run { head: Option<Oid>, remote: Oid },
}

fn plan_merge(repo: &Repository, tracking: &str, request: MergeRequest) -> Result<MergePlan> {
    if let Some(state) = pending_operation(repo) {
        return Err(Error::OperationInProgress {
            state: state.to_string(),
        });
    }
    let dirty = dirty_paths(repo)?;
    if !dirty.is_empty() {
        return Err(Error::DirtyWorkingTree { paths: dirty });
    }

    let Some(remote) = ref_oid(repo, tracking)? else {
        return Ok(MergePlan::UpToDate);
    };
    let Some(head) = head_oid(repo)? else {
        return Ok(MergePlan::Run { head: None, remote });
    };
    if contains(repo, Some(head), remote)? {
        return Ok(MergePlan::UpToDate);
    }

    match repo.merge_base(head, remote) {
        Ok(_) => Ok(MergePlan::Run {
            head: Some(head),
            remote,
        }),
        Err(e) if e.code() == git2::ErrorCode::NotFound => {
            if request.allow_unrelated_histories {
                Ok(MergePlan::Run {
                    head: Some(head),
                    remote,
                })
            } else {
                Ok(MergePlan::Unrelated)
            }
        }
        Err(e) => Err(Error::Git(e)),
    }
}

/// Run a libgit2 closure on a blocking worker with a freshly opened repository
async fn with_repo<T, F>(handle: &RepoHandle, f: F) -> Result<T>
where
    F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let root: PathBuf = handle.root().to_path_buf();
    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&root)?;
        f(&repo)
    })
    .await
    .map_err(|e| Error::Internal(format!("git worker failed: {}", e)))?
}

fn head_oid(repo: &Repository) -> Result<Option<Oid>> {
    match repo.head() {
        Ok(head) => Ok(head.target()),
        Err(e)
            if e.code() == git2::ErrorCode::UnbornBranch
                || e.code() == git2::ErrorCode::NotFound =>
        {
            Ok(None)
        }
        Err(e) => Err(Error::Git(e)),
    }
}

fn ref_oid(repo: &Repository, name: &str) -> Result<Option<Oid>> {
    match repo.find_reference(name) {
        Ok(reference) => Ok(Some(reference.peel_to_commit()?.id())),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(Error::Git(e)),
    }
}

/// Whether `head` already contains `commit`
fn contains(repo: &Repository, head: Option<Oid>, commit: Oid) -> Result<bool> {
    match head {
        None => Ok(false),
        Some(h) if h == commit => Ok(true),
        Some(h) => Ok(repo.graph_descendant_of(h, commit)?),
    }
}

fn count_commits(repo: &Repository, tip: Oid) -> Result<usize> {
    let mut walk = repo.revwalk()?;
    walk.push(tip)?;
    Ok(walk.count())
}

/// Tracked paths whose index or working-tree content differs from HEAD
fn dirty_paths(repo: &Repository) -> Result<Vec<String>> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(false)
        .include_ignored(false)
        .exclude_submodules(true);

    let statuses = repo.statuses(Some(&mut options))?;
    Ok(statuses
        .iter()
        .filter(|entry| entry.status() != git2::Status::CURRENT)
        .filter_map(|entry| entry.path().map(|p| p.to_string()))
        .collect())
}

fn pending_operation(repo: &Repository) -> Option<&'static str> {
    match repo.state() {
        RepositoryState::Clean => None,
        RepositoryState::Merge => Some("merge"),
        RepositoryState::Rebase
        | RepositoryState::RebaseInteractive
        | RepositoryState::RebaseMerge
        | RepositoryState::ApplyMailbox
        | RepositoryState::ApplyMailboxOrRebase => Some("rebase"),
        RepositoryState::CherryPick | RepositoryState::CherryPickSequence => Some("cherry-pick"),
        RepositoryState::Revert | RepositoryState::RevertSequence => Some("revert"),
        RepositoryState::Bisect => Some("bisect"),
    }
}

/// Unmerged entries of an index, oriented as local/remote
///
/// During a rebase git's "ours" is the upstream and "theirs" the replayed
/// local commit, so the sides are swapped.
fn index_conflicts(index: &Index, strategy: Strategy) -> Result<Vec<TouchedPath>> {
    if !index.has_conflicts() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let Some(entry) = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref())
        else {
            continue;
        };
        let path = String::from_utf8_lossy(&entry.path).into_owned();

        let (local, remote) = match strategy {
            Strategy::Merge => (conflict.our.is_some(), conflict.their.is_some()),
            Strategy::Rebase => (conflict.their.is_some(), conflict.our.is_some()),
        };
        paths.push(TouchedPath::unmerged(
            path,
            Stages {
                base: conflict.ancestor.is_some(),
                local,
                remote,
            },
        ));
    }
    Ok(paths)
}

/// Paths that differ between two commits (`None` is the empty tree)
fn changed_paths(repo: &Repository, from: Option<Oid>, to: Option<Oid>) -> Result<Vec<TouchedPath>> {
    let old_tree = from.map(|oid| repo.find_commit(oid)?.tree()).transpose()?;
    let new_tree = to.map(|oid| repo.find_commit(oid)?.tree()).transpose()?;
    let diff = repo.diff_tree_to_tree(old_tree.as_ref(), new_tree.as_ref(), None)?;

    Ok(diff
        .deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| TouchedPath::clean(p.to_string_lossy()))
        })
        .collect())
}

/// Undo a merge into an unborn branch: clear tracked files and drop the branch ref
fn unborn_reset(repo: &Repository) -> Result<()> {
    let empty = repo.find_tree(repo.treebuilder(None)?.write()?)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_tree(empty.as_object(), Some(&mut checkout))?;

    let head = repo.head()?;
    if let Some(name) = head.name() {
        repo.find_reference(name)?.delete()?;
    }
    Ok(())
}

fn strategy_verb(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Merge => "merge",
        Strategy::Rebase => "rebase",
    }
}

/// Map a failed git invocation to an error kind
fn classify_failure(operation: &str, stderr: &str) -> Error {
    let message = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    if AUTH_FAILURE_PATTERNS.iter().any(|p| stderr.contains(p)) {
        Error::AuthFailure(message)
    } else if message.is_empty() {
        Error::BackendUnavailable(format!("git {} failed", operation))
    } else {
        Error::BackendUnavailable(format!("git {} failed: {}", operation, message))
    }
}

/// Summary of the first rejected ref in `git push --porcelain` output
///
/// Rejected lines look like `!\tHEAD:refs/heads/main\t[rejected] (fetch first)`.
fn rejected_reason(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find(|line| line.starts_with('!'))
        .and_then(|line| line.split('\t').nth(2))
        .map(|summary| summary.trim().to_string())
}

/// Tab-indented file list following git's "would be overwritten" message
fn parse_overwritten_paths(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.contains("would be overwritten by"))
        .skip(1)
        .take_while(|line| line.starts_with('\t'))
        .map(|line| line.trim().to_string())
        .collect()
}
