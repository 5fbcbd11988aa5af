//! Single-flight sync of a working copy with its remote branch
//!
//! [`SyncOrchestrator`] runs fetch, merge or rebase, and push under a
//! per-repository lock and reports a terminal [`SyncOutcome`].

pub mod attempt;
pub mod cancel;
pub mod orchestrator;
pub mod state;

pub use attempt::SyncAttempt;
pub use cancel::{CancelHandle, CancelResponse};
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncOutcome};
pub use state::{StateMachine, SyncPhase};
