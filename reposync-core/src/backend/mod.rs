//! Backend adapter for the external version-control client
//!
//! The orchestrator only talks to a [`Backend`]. Each operation may block on
//! network or disk I/O and reports its outcome through the types below.

mod git;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::repo::RepoHandle;
use crate::{Error, Result};

pub use git::GitBackend;

/// How remote changes are integrated into the local branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Create a merge commit (or fast-forward)
    #[default]
    Merge,
    /// Replay local commits on top of the remote branch
    Rebase,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Strategy::Merge),
            "rebase" => Ok(Strategy::Rebase),
            other => Err(Error::Config(format!(
                "Unknown strategy '{}'. Expected 'merge' or 'rebase'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Merge => write!(f, "merge"),
            Strategy::Rebase => write!(f, "rebase"),
        }
    }
}

/// What the caller allows `merge_or_rebase` to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRequest {
    /// Merge or rebase
    pub strategy: Strategy,
    /// Join histories that share no ancestor (union merge)
    pub allow_unrelated_histories: bool,
}

impl MergeRequest {
    /// A regular request that refuses unrelated histories
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            allow_unrelated_histories: false,
        }
    }

    /// An explicit union merge of unrelated histories
    pub fn union() -> Self {
        Self {
            strategy: Strategy::Merge,
            allow_unrelated_histories: true,
        }
    }
}

/// Snapshot of the working copy relative to its remote-tracking branch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    /// Current HEAD commit, `None` on an unborn branch
    pub head: Option<String>,
    /// Commits on HEAD not on the remote-tracking branch
    pub ahead: usize,
    /// Commits on the remote-tracking branch not on HEAD
    pub behind: usize,
    /// Tracked paths with uncommitted changes
    pub dirty_paths: Vec<String>,
    /// Pending merge/rebase left in the repository, if any
    pub in_progress: Option<String>,
}

impl RepoStatus {
    /// Whether uncommitted tracked changes exist
    pub fn dirty(&self) -> bool {
        !self.dirty_paths.is_empty()
    }
}

/// Result of fetching the target branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    /// Remote has commits that HEAD does not contain
    pub new_revision_available: bool,
    /// Remote branch tip, `None` if the branch does not exist remotely
    pub revision_id: Option<String>,
}

/// Classification of a merge/rebase attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeStatus {
    Clean,
    Conflicted,
    UnrelatedHistories,
}

/// Which sides of a conflicted path still have a version in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stages {
    /// Common ancestor version exists
    pub base: bool,
    /// Local version exists
    pub local: bool,
    /// Remote version exists
    pub remote: bool,
}

/// A path touched by a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TouchedPath {
    pub path: String,
    /// Index stages when the path is unmerged; `None` when it merged cleanly
    pub stages: Option<Stages>,
}

impl TouchedPath {
    /// A path that merged without conflict
    pub fn clean(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stages: None,
        }
    }

    /// An unmerged path
    pub fn unmerged(path: impl Into<String>, stages: Stages) -> Self {
        Self {
            path: path.into(),
            stages: Some(stages),
        }
    }
}

/// Result of `merge_or_rebase` or `preview_merge`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub status: MergeStatus,
    pub touched_paths: Vec<TouchedPath>,
}

impl MergeResult {
    /// Nothing to integrate
    pub fn up_to_date() -> Self {
        Self {
            status: MergeStatus::Clean,
            touched_paths: Vec::new(),
        }
    }

    /// Histories share no ancestor; nothing was changed
    pub fn unrelated() -> Self {
        Self {
            status: MergeStatus::UnrelatedHistories,
            touched_paths: Vec::new(),
        }
    }
}

/// Result of pushing to the target branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResult {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
}

impl PushResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            rejected_reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            rejected_reason: Some(reason.into()),
        }
    }
}

/// Trait for version-control backends
///
/// Errors use the kinds of [`Error`]: `BackendUnavailable`, `AuthFailure`,
/// `DirtyWorkingTree` and `NonFastForward` are the expected ones.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the name of this backend
    fn name(&self) -> &'static str;

    /// Read ahead/behind/dirty state. Never mutates anything.
    async fn status(&self, handle: &RepoHandle) -> Result<RepoStatus>;

    /// Update the remote-tracking branch from the remote
    async fn fetch(&self, handle: &RepoHandle) -> Result<FetchResult>;

    /// Integrate the remote-tracking branch into HEAD
    ///
    /// Unrelated histories are only joined when the request allows it;
    /// otherwise `UnrelatedHistories` is returned with nothing changed.
    async fn merge_or_rebase(&self, handle: &RepoHandle, request: MergeRequest)
        -> Result<MergeResult>;

    /// Predict the merge outcome without touching HEAD, the index or the working tree
    async fn preview_merge(&self, handle: &RepoHandle, request: MergeRequest)
        -> Result<MergeResult>;

    /// Abort any pending merge/rebase and move HEAD back to `revision`
    ///
    /// Only called when the working tree was clean before the attempt.
    async fn rollback(&self, handle: &RepoHandle, revision: Option<&str>) -> Result<()>;

    /// Push HEAD to the target branch
    async fn push(&self, handle: &RepoHandle) -> Result<PushResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("merge".parse::<Strategy>().unwrap(), Strategy::Merge);
        assert_eq!(" Rebase ".parse::<Strategy>().unwrap(), Strategy::Rebase);
        assert!("squash".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_strategy_display_matches_config_spelling() {
        assert_eq!(Strategy::Rebase.to_string(), "rebase");
        let toml = toml::to_string(&MergeStrategyDoc {
            strategy: Strategy::Rebase,
        })
        .unwrap();
        assert_eq!(toml.trim(), "strategy = \"rebase\"");
    }

    #[derive(Serialize)]
    struct MergeStrategyDoc {
        strategy: Strategy,
    }

    #[test]
    fn test_union_request_forces_merge() {
        let request = MergeRequest::union();
        assert_eq!(request.strategy, Strategy::Merge);
        assert!(request.allow_unrelated_histories);
        assert!(!MergeRequest::new(Strategy::Rebase).allow_unrelated_histories);
    }

    #[test]
    fn test_status_dirty() {
        let mut status = RepoStatus::default();
        assert!(!status.dirty());
        status.dirty_paths.push("frontend/app.js".to_string());
        assert!(status.dirty());
    }
}
