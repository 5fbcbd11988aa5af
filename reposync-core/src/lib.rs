//! Reposync Core - keeps a working copy and its remote branch in step
//!
//! This crate provides the sync orchestrator, the git backend it drives,
//! conflict classification and the per-repository lock.

pub mod backend;
pub mod classify;
pub mod config;
pub mod error;
pub mod lock;
pub mod repo;
pub mod sync;

pub use backend::{Backend, GitBackend, Strategy};
pub use classify::{Conflict, ConflictKind, ConflictReport};
pub use config::{CliOverrides, Config};
pub use error::{Error, Result};
pub use repo::RepoHandle;
pub use sync::{CancelHandle, CancelResponse, SyncOptions, SyncOrchestrator, SyncOutcome};
