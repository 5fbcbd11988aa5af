//! Sync phase state machine
//!
//! Phases only move along the transition table below; anything else is an
//! internal error. Every transition is logged and kept in the history.

use std::fmt::Debug;

use serde::Serialize;

use crate::error::{Error, Result};

/// Phase of one sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncPhase {
    Idle,
    Locking,
    Fetching,
    Merging,
    Pushing,
    Succeeded,
    Failed,
    Conflicted,
    Diverged,
    Cancelled,
}

impl SyncPhase {
    /// Terminal phases have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Succeeded
                | SyncPhase::Failed
                | SyncPhase::Conflicted
                | SyncPhase::Diverged
                | SyncPhase::Cancelled
        )
    }

    /// Whether a cancellation request is still honoured in this phase
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            SyncPhase::Idle | SyncPhase::Locking | SyncPhase::Fetching | SyncPhase::Merging
        )
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Legal transitions of a sync attempt
///
/// `Merging -> Succeeded` is only taken by dry runs, which stop after the
/// merge preview. Failure is reachable from every non-terminal phase.
pub fn sync_transitions() -> Vec<(SyncPhase, SyncPhase)> {
    use SyncPhase::*;

    let mut transitions = vec![
        (Idle, Locking),
        (Locking, Fetching),
        (Fetching, Merging),
        (Merging, Conflicted),
        (Merging, Diverged),
        (Merging, Pushing),
        (Merging, Succeeded),
        (Pushing, Succeeded),
    ];
    for phase in [Idle, Locking, Fetching, Merging, Pushing] {
        transitions.push((phase, Failed));
        if phase.is_cancellable() {
            transitions.push((phase, Cancelled));
        }
    }
    transitions
}

/// A table-driven state machine
#[derive(Debug, Clone)]
pub struct StateMachine<P: Copy + PartialEq + Debug> {
    current_phase: P,
    valid_transitions: Vec<(P, P)>,
    history: Vec<P>,
}

impl<P: Copy + PartialEq + Debug> StateMachine<P> {
    /// Create a new state machine with the given initial phase
    pub fn new(initial_phase: P) -> Self {
        Self {
            current_phase: initial_phase,
            valid_transitions: Vec::new(),
            history: vec![initial_phase],
        }
    }

    /// Add multiple valid transitions
    pub fn add_transitions(mut self, transitions: Vec<(P, P)>) -> Self {
        self.valid_transitions.extend(transitions);
        self
    }

    /// Get the current phase
    pub fn current_phase(&self) -> P {
        self.current_phase
    }

    /// Every phase visited so far, starting with the initial one
    pub fn history(&self) -> &[P] {
        &self.history
    }

    /// Check if a transition from the current phase is valid
    pub fn can_transition_to(&self, phase: P) -> bool {
        self.valid_transitions
            .iter()
            .any(|(f, t)| *f == self.current_phase && *t == phase)
    }

    /// Move to a new phase, failing if the table does not allow it
    pub fn transition_to(&mut self, phase: P) -> Result<()> {
        if !self.can_transition_to(phase) {
            return Err(Error::Internal(format!(
                "Invalid transition from {:?} to {:?}",
                self.current_phase, phase
            )));
        }

        tracing::info!(
            from = ?self.current_phase,
            to = ?phase,
            "Sync phase transition"
        );

        self.current_phase = phase;
        self.history.push(phase);
        Ok(())
    }
}

impl StateMachine<SyncPhase> {
    /// A machine in `Idle` with the sync transition table
    pub fn for_sync() -> Self {
        Self::new(SyncPhase::Idle).add_transitions(sync_transitions())
    }
}
