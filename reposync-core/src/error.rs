//! Error types for reposync

use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockInfo;

/// Result type alias for reposync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for reposync operations
#[derive(Error, Debug)]
pub enum Error {
    /// The remote or the git client could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Credentials were rejected by the remote
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Uncommitted local changes block the merge
    #[error("Working tree has uncommitted changes: {}", paths.join(", "))]
    DirtyWorkingTree {
        /// Paths with uncommitted changes
        paths: Vec<String>,
    },

    /// The remote advanced between fetch and push
    #[error("Push rejected as non-fast-forward: {0}. Run sync again.")]
    NonFastForward(String),

    /// The remote refused the push for a reason other than a race
    #[error("Push rejected by remote: {reason}")]
    PushRejected {
        /// Reason reported by the remote
        reason: String,
    },

    /// Another sync holds the lock for this repository
    #[error("A sync is already running for this repository (lock: {})", lock_path.display())]
    AlreadyRunning {
        /// Path of the lock file
        lock_path: PathBuf,
        /// Metadata of the current holder, when readable
        holder: Option<Box<LockInfo>>,
    },

    /// A merge or rebase from an earlier run is still in progress
    #[error("Repository has a {state} in progress. Finish or abort it first.")]
    OperationInProgress {
        /// Kind of the pending operation
        state: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// libgit2 error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::AuthFailure(_) => "AuthFailure",
            Error::DirtyWorkingTree { .. } => "DirtyWorkingTree",
            Error::NonFastForward(_) => "NonFastForward",
            Error::PushRejected { .. } => "PushRejected",
            Error::AlreadyRunning { .. } => "AlreadyRunning",
            Error::OperationInProgress { .. } => "OperationInProgress",
            Error::Config(_) => "Config",
            Error::Git(_) => "Git",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Internal(_) => "Internal",
        }
    }

    /// Whether re-running the sync later may succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::NonFastForward(_))
    }
}
