//! Per-repository sync lock
//!
//! The lock is a file inside the git directory created with `create_new`, so
//! acquisition is atomic across threads and processes. [`SyncLock`] removes
//! the file when dropped, which releases the lock on every exit path the
//! process survives. A file left by a killed holder is reclaimed once its
//! recorded pid is no longer running.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::repo::RepoHandle;
use crate::{Error, Result};

/// Lock file name inside the git directory
pub const LOCK_FILE: &str = "reposync.lock";

/// Metadata written into the lock file by its holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process holding the lock
    pub pid: u32,
    /// When the lock was taken
    #[serde(with = "humantime_serde")]
    pub started_at: SystemTime,
    /// Remote being synced
    pub remote: String,
    /// Branch being synced
    pub branch: String,
}

impl LockInfo {
    fn for_handle(handle: &RepoHandle) -> Self {
        Self {
            pid: std::process::id(),
            started_at: SystemTime::now(),
            remote: handle.remote().name.clone(),
            branch: handle.branch().to_string(),
        }
    }

    /// Whether the recorded holder is still running
    ///
    /// A lock taken by this process always counts as live.
    pub fn is_alive(&self) -> bool {
        self.pid == std::process::id() || pid_is_alive(self.pid)
    }
}

/// Held sync lock; released on drop
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl SyncLock {
    /// Lock file location for a repository
    ///
    /// Keyed by working copy: handles sharing a git directory share the lock.
    pub fn lock_path(handle: &RepoHandle) -> PathBuf {
        handle.git_dir().join(LOCK_FILE)
    }

    /// Try to take the lock without waiting
    ///
    /// A lock whose holder has exited is reclaimed. Fails with
    /// [`Error::AlreadyRunning`] if a live (or unidentifiable) holder exists.
    pub fn acquire(handle: &RepoHandle) -> Result<Self> {
        match Self::try_create(handle) {
            Err(Error::AlreadyRunning {
                lock_path,
                holder: Some(holder),
            }) if !holder.is_alive() => {
                tracing::warn!(
                    path = %lock_path.display(),
                    pid = holder.pid,
                    "Reclaiming sync lock left by a process that is gone"
                );
                reclaim_stale(&lock_path, &holder)?;
                Self::try_create(handle)
            }
            other => other,
        }
    }

    fn try_create(handle: &RepoHandle) -> Result<Self> {
        let path = Self::lock_path(handle);
        let info = LockInfo::for_handle(handle);

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_info(&path).ok().flatten().map(Box::new);
                return Err(Error::AlreadyRunning {
                    lock_path: path,
                    holder,
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };

        // From here on the guard owns the file and cleans it up on failure
        let lock = Self {
            path,
            info,
            released: false,
        };
        serde_json::to_writer(&mut file, &lock.info)?;
        file.flush()?;

        tracing::debug!(path = %lock.path.display(), pid = lock.info.pid, "Sync lock acquired");
        Ok(lock)
    }

    /// Metadata of this holder
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, reporting removal errors
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)?;
        tracing::debug!(path = %self.path.display(), "Sync lock released");
        Ok(())
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove sync lock {:?}: {}", self.path, e);
            } else {
                tracing::debug!(path = %self.path.display(), "Sync lock released");
            }
        }
    }
}

/// Move a dead holder's lock aside, then delete it
///
/// The rename is atomic, so of several reclaimers only one moves the file. If
/// what was moved turns out to be a newer holder's lock, it is linked back.
fn reclaim_stale(path: &Path, stale: &LockInfo) -> Result<()> {
    let aside = path.with_extension(format!("lock.stale.{}", std::process::id()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Someone else reclaimed it first
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::Io(e)),
    }

    let moved = read_info(&aside).ok().flatten();
    if moved.as_ref() != Some(stale) {
        if let Err(e) = fs::hard_link(&aside, path) {
            tracing::warn!("Could not restore sync lock {:?}: {}", path, e);
        }
    }
    fs::remove_file(&aside)?;
    Ok(())
}

/// Current holder of a repository's lock, if any
pub fn read_lock(handle: &RepoHandle) -> Result<Option<LockInfo>> {
    read_info(&SyncLock::lock_path(handle))
}

/// What [`unlock`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockAction {
    /// No lock file existed
    NoLock,
    /// The holder had exited; its lock was removed
    RemovedStale(LockInfo),
    /// Removed although the holder may still run (or could not be read)
    RemovedForced(Option<LockInfo>),
    /// Left in place: the holder is running or unreadable and `force` was not set
    Refused(Option<LockInfo>),
}

/// Remove a repository's lock if its holder is gone, or unconditionally with `force`
pub fn unlock(handle: &RepoHandle, force: bool) -> Result<UnlockAction> {
    let path = SyncLock::lock_path(handle);
    let holder = match read_info(&path) {
        Ok(None) => return Ok(UnlockAction::NoLock),
        Ok(Some(holder)) => Some(holder),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Unreadable sync lock: {}", e);
            None
        }
    };

    let stale = holder.as_ref().is_some_and(|h| !h.is_alive());
    if !stale && !force {
        return Ok(UnlockAction::Refused(holder));
    }

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(UnlockAction::NoLock),
        Err(e) => return Err(Error::Io(e)),
    }

    match holder {
        Some(holder) if stale => {
            tracing::info!(path = %path.display(), pid = holder.pid, "Removed stale sync lock");
            Ok(UnlockAction::RemovedStale(holder))
        }
        holder => {
            tracing::warn!(path = %path.display(), "Sync lock removed by force");
            Ok(UnlockAction::RemovedForced(holder))
        }
    }
}

fn read_info(path: &Path) -> Result<Option<LockInfo>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Check if a pid is alive using `kill(pid, 0)`
#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
