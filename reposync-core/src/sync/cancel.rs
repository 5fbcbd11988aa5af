//! Cancellation of an in-flight sync
//!
//! Requests are honoured until the push begins. The orchestrator claims the
//! push under the same mutex that `cancel` takes, so a request either lands
//! before the push (and the attempt rolls back) or is refused.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Answer to a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResponse {
    /// The attempt will stop and roll back
    Accepted,
    /// The push has started; it will complete or fail on its own
    Refused,
}

#[derive(Debug, Default)]
struct CancelState {
    requested: bool,
    pushing: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<CancelState>,
    notify: Notify,
}

/// Shared token for cancelling one sync attempt
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CancelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask the attempt to stop
    pub fn cancel(&self) -> CancelResponse {
        let mut state = self.state();
        if state.pushing {
            return CancelResponse::Refused;
        }
        state.requested = true;
        drop(state);

        self.inner.notify.notify_waiters();
        CancelResponse::Accepted
    }

    /// Whether a cancellation has been accepted
    pub fn is_cancelled(&self) -> bool {
        self.state().requested
    }

    /// Claim the push; returns `false` if cancellation won the race
    pub(crate) fn begin_push(&self) -> bool {
        let mut state = self.state();
        if state.requested {
            return false;
        }
        state.pushing = true;
        true
    }

    /// Resolves once a cancellation has been accepted
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
