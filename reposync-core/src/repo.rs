//! Repository handle: the working copy and the remote/branch it syncs with

use std::path::{Path, PathBuf};

use git2::Repository;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::{Error, Result};

/// Information about a git remote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteInfo {
    /// Name of the remote (e.g., "origin")
    pub name: String,
    /// URL of the remote
    #[serde(serialize_with = "serialize_redacted")]
    pub url: String,
}

impl RemoteInfo {
    /// The URL with any embedded credentials removed, safe for logs
    pub fn redacted_url(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
                // Only fails for cannot-be-a-base URLs, which carry no userinfo
                let _ = parsed.set_username("");
                let _ = parsed.set_password(None);
                parsed.to_string()
            }
            // scp-like (git@host:path) and local paths carry no secrets
            _ => self.url.clone(),
        }
    }
}

fn serialize_redacted<S: serde::Serializer>(url: &str, s: S) -> std::result::Result<S::Ok, S::Error> {
    let info = RemoteInfo {
        name: String::new(),
        url: url.to_string(),
    };
    s.serialize_str(&info.redacted_url())
}

/// Identifies one working copy and its single active sync target
///
/// Immutable once built; every sync operation receives it by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoHandle {
    root: PathBuf,
    git_dir: PathBuf,
    remote: RemoteInfo,
    branch: String,
}

impl RepoHandle {
    /// Build a handle from already-resolved parts
    pub fn new(
        root: impl Into<PathBuf>,
        git_dir: impl Into<PathBuf>,
        remote: RemoteInfo,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            git_dir: git_dir.into(),
            remote,
            branch: branch.into(),
        }
    }

    /// Open the repository containing `path` and resolve its sync target
    ///
    /// This will search upward from the given path to find the repository root.
    /// The branch is taken from the config, or else from the current HEAD. A
    /// configured branch must be the one checked out, unless HEAD is detached.
    pub fn open(path: impl AsRef<Path>, config: &SyncConfig) -> Result<Self> {
        let path = path.as_ref();
        let repo = open_repository(path)?;

        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();
        let git_dir = repo.path().to_path_buf();

        let remote = find_remote(&repo, &config.remote_name)?;

        let branch = match (&config.target_branch, current_branch(&repo)?) {
            (None, Some(current)) => current,
            (None, None) => {
                return Err(Error::Config(
                    "HEAD is detached. Check out a branch or set sync.target_branch".to_string(),
                ))
            }
            (Some(target), Some(current)) if *target != current => {
                return Err(Error::Config(format!(
                    "HEAD is on '{}' but sync.target_branch is '{}'. Check out '{}' first",
                    current, target, target
                )))
            }
            (Some(target), Some(_)) => target.clone(),
            (Some(target), None) => {
                tracing::warn!(
                    branch = %target,
                    "HEAD is detached; it will be pushed to refs/heads/{}",
                    target
                );
                target.clone()
            }
        };

        Ok(Self {
            root,
            git_dir,
            remote,
            branch,
        })
    }

    /// Working-copy root of the repository containing `path`
    ///
    /// Used to find the per-repository config before a handle exists.
    pub fn discover_root(path: impl AsRef<Path>) -> Result<PathBuf> {
        let repo = open_repository(path.as_ref())?;
        repo.workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))
    }

    /// Get the repository root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the git directory (usually `<root>/.git`)
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The remote being synced against
    pub fn remote(&self) -> &RemoteInfo {
        &self.remote
    }

    /// The branch being pulled and pushed
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Short name of the remote-tracking branch, e.g. `origin/main`
    pub fn tracking_name(&self) -> String {
        format!("{}/{}", self.remote.name, self.branch)
    }

    /// Full name of the remote-tracking ref, e.g. `refs/remotes/origin/main`
    pub fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote.name, self.branch)
    }
}

impl std::fmt::Display for RepoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.root.display(),
            self.tracking_name(),
            self.remote.redacted_url()
        )
    }
}

/// Open a git repository, mapping "not found" to a helpful message
pub(crate) fn open_repository(path: &Path) -> Result<Repository> {
    Repository::discover(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            Error::Config(format!(
                "Not a git repository: {}. Run 'git init' first or navigate to a git repository.",
                path.display()
            ))
        } else {
            Error::Git(e)
        }
    })
}

fn find_remote(repo: &Repository, name: &str) -> Result<RemoteInfo> {
    if let Ok(remote) = repo.find_remote(name) {
        if let Some(url) = remote.url() {
            return Ok(RemoteInfo {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
    }

    let remotes = repo.remotes()?;
    let available: Vec<&str> = remotes.iter().flatten().collect();
    if available.is_empty() {
        Err(Error::Config(format!(
            "No remotes configured. Add one with 'git remote add {} <url>'",
            name
        )))
    } else {
        Err(Error::Config(format!(
            "Remote '{}' not found. Available remotes: {}",
            name,
            available.join(", ")
        )))
    }
}

/// Current branch name, including an unborn branch in a fresh repository
fn current_branch(repo: &Repository) -> Result<Option<String>> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(|s| s.to_string())),
        // Detached HEAD
        Ok(_) => Ok(None),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|target| target.strip_prefix("refs/heads/"))
                .map(|s| s.to_string()))
        }
        Err(e) => Err(Error::Git(e)),
    }
}
