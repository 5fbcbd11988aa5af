//! Sync orchestrator
//!
//! Sequences lock -> status -> fetch -> merge/rebase -> push for one
//! repository handle and returns a terminal [`SyncOutcome`]. Backend calls are
//! the only suspension points and always run in that order.

use std::path::PathBuf;
use std::sync::Arc;

use super::attempt::{AttemptBuilder, SyncAttempt};
use super::cancel::CancelHandle;
use super::state::{StateMachine, SyncPhase};
use crate::backend::{Backend, MergeRequest, Strategy};
use crate::classify::{classify, Classification, ConflictReport};
use crate::config::SyncConfig;
use crate::lock::{LockInfo, SyncLock};
use crate::repo::RepoHandle;
use crate::{Error, Result};

/// Options for one sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Merge or rebase
    pub strategy: Strategy,
    /// Stop after predicting the merge; nothing local is changed and nothing is pushed
    pub dry_run: bool,
    /// Join unrelated histories (only set by the explicit union command)
    pub allow_unrelated_histories: bool,
    /// Leave a conflicted merge in the working tree instead of aborting it
    pub keep_conflicts: bool,
}

impl SyncOptions {
    /// Regular sync options from configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            strategy: config.strategy,
            dry_run: false,
            allow_unrelated_histories: false,
            keep_conflicts: config.keep_conflicts,
        }
    }

    /// Options for an explicit union merge of unrelated histories
    ///
    /// Refused unless the configuration opts in.
    pub fn union(config: &SyncConfig) -> Result<Self> {
        if !config.allow_unrelated_histories {
            return Err(Error::Config(
                "Merging unrelated histories is disabled. Set sync.allow_unrelated_histories = true to allow it"
                    .to_string(),
            ));
        }
        Ok(Self {
            strategy: Strategy::Merge,
            allow_unrelated_histories: true,
            ..Self::from_config(config)
        })
    }

    /// Builder-style dry-run toggle
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn merge_request(&self) -> MergeRequest {
        if self.allow_unrelated_histories {
            MergeRequest::union()
        } else {
            MergeRequest::new(self.strategy)
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Terminal outcome of a sync invocation
#[derive(Debug)]
pub enum SyncOutcome {
    /// Remote and local agree (or, for a dry run, would agree)
    Succeeded { attempt: SyncAttempt },
    /// A backend, auth, dirty-tree, race or internal error ended the attempt
    Failed { error: Error, attempt: SyncAttempt },
    /// Paths diverged; nothing was pushed
    Conflicted {
        report: ConflictReport,
        attempt: SyncAttempt,
    },
    /// Local and remote share no history; nothing was pushed
    Diverged { attempt: SyncAttempt },
    /// Another sync holds the lock; nothing was touched
    AlreadyRunning {
        lock_path: PathBuf,
        holder: Option<LockInfo>,
    },
    /// Cancelled before the push began; local state restored
    Cancelled { attempt: SyncAttempt },
}

impl SyncOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncOutcome::Succeeded { .. } => 0,
            SyncOutcome::Failed { .. } => 1,
            SyncOutcome::Conflicted { .. } => 2,
            SyncOutcome::Diverged { .. } => 3,
            SyncOutcome::AlreadyRunning { .. } => 4,
            SyncOutcome::Cancelled { .. } => 130,
        }
    }

    /// Outcome name as shown to users
    pub fn name(&self) -> &'static str {
        match self {
            SyncOutcome::Succeeded { .. } => "Succeeded",
            SyncOutcome::Failed { .. } => "Failed",
            SyncOutcome::Conflicted { .. } => "Conflicted",
            SyncOutcome::Diverged { .. } => "Diverged",
            SyncOutcome::AlreadyRunning { .. } => "AlreadyRunning",
            SyncOutcome::Cancelled { .. } => "Cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Succeeded { .. })
    }

    /// The attempt record; `None` only for `AlreadyRunning`
    pub fn attempt(&self) -> Option<&SyncAttempt> {
        match self {
            SyncOutcome::Succeeded { attempt }
            | SyncOutcome::Failed { attempt, .. }
            | SyncOutcome::Conflicted { attempt, .. }
            | SyncOutcome::Diverged { attempt }
            | SyncOutcome::Cancelled { attempt } => Some(attempt),
            SyncOutcome::AlreadyRunning { .. } => None,
        }
    }

    /// The error behind a `Failed` outcome
    pub fn error(&self) -> Option<&Error> {
        match self {
            SyncOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Where a locked attempt stopped, before it is turned into an outcome
enum Terminal {
    Succeeded,
    Conflicted(ConflictReport),
    Diverged,
    Cancelled,
}

impl Terminal {
    fn phase(&self) -> SyncPhase {
        match self {
            Terminal::Succeeded => SyncPhase::Succeeded,
            Terminal::Conflicted(_) => SyncPhase::Conflicted,
            Terminal::Diverged => SyncPhase::Diverged,
            Terminal::Cancelled => SyncPhase::Cancelled,
        }
    }
}

/// State of one running attempt
struct Run {
    machine: StateMachine<SyncPhase>,
    attempt: AttemptBuilder,
}

impl Run {
    fn advance(&mut self, phase: SyncPhase) -> Result<()> {
        self.machine.transition_to(phase)
    }

    fn conclude(mut self, result: Result<Terminal>) -> SyncOutcome {
        let result = result.and_then(|terminal| {
            self.machine.transition_to(terminal.phase())?;
            Ok(terminal)
        });

        match result {
            Ok(terminal) => {
                let attempt = self.attempt.finish(self.machine.history());
                match terminal {
                    Terminal::Succeeded => SyncOutcome::Succeeded { attempt },
                    Terminal::Conflicted(report) => SyncOutcome::Conflicted { report, attempt },
                    Terminal::Diverged => SyncOutcome::Diverged { attempt },
                    Terminal::Cancelled => SyncOutcome::Cancelled { attempt },
                }
            }
            Err(error) => {
                if let Err(e) = self.machine.transition_to(SyncPhase::Failed) {
                    tracing::error!("{}", e);
                }
                let attempt = self.attempt.finish(self.machine.history());
                SyncOutcome::Failed { error, attempt }
            }
        }
    }
}

/// Drives sync attempts against a backend
#[derive(Clone)]
pub struct SyncOrchestrator {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl SyncOrchestrator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Run one sync attempt to a terminal outcome
    pub async fn sync(&self, handle: &RepoHandle, options: SyncOptions) -> SyncOutcome {
        self.sync_with_cancel(handle, options, &CancelHandle::new())
            .await
    }

    /// Run one sync attempt that `cancel` can stop before the push
    pub async fn sync_with_cancel(
        &self,
        handle: &RepoHandle,
        options: SyncOptions,
        cancel: &CancelHandle,
    ) -> SyncOutcome {
        tracing::info!(
            repo = %handle,
            strategy = %options.strategy,
            dry_run = options.dry_run,
            "Starting sync"
        );

        let mut run = Run {
            machine: StateMachine::for_sync(),
            attempt: AttemptBuilder::start(options.strategy, options.dry_run),
        };

        if let Err(e) = run.advance(SyncPhase::Locking) {
            return run.conclude(Err(e));
        }

        let lock = match SyncLock::acquire(handle) {
            Ok(lock) => lock,
            Err(Error::AlreadyRunning { lock_path, holder }) => {
                tracing::warn!(lock = %lock_path.display(), "Sync already running");
                return SyncOutcome::AlreadyRunning {
                    lock_path,
                    holder: holder.map(|h| *h),
                };
            }
            Err(e) => return run.conclude(Err(e)),
        };

        let result = self.drive(handle, options, cancel, &mut run).await;
        let outcome = run.conclude(result);

        if let Err(e) = lock.release() {
            tracing::warn!("Failed to release sync lock: {}", e);
        }
        tracing::info!(outcome = outcome.name(), "Sync finished");
        outcome
    }

    async fn drive(
        &self,
        handle: &RepoHandle,
        options: SyncOptions,
        cancel: &CancelHandle,
        run: &mut Run,
    ) -> Result<Terminal> {
        if cancel.is_cancelled() {
            return Ok(Terminal::Cancelled);
        }
        run.advance(SyncPhase::Fetching)?;

        let status = self.backend.status(handle).await?;
        if let Some(state) = status.in_progress {
            return Err(Error::OperationInProgress { state });
        }
        if status.dirty() {
            return Err(Error::DirtyWorkingTree {
                paths: status.dirty_paths,
            });
        }
        let pre_head = status.head;
        run.attempt.pre_head = pre_head.clone();

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Terminal::Cancelled),
            fetched = self.backend.fetch(handle) => fetched?,
        };
        tracing::info!(
            revision = ?fetched.revision_id,
            new_revision_available = fetched.new_revision_available,
            "Fetched {}",
            handle.tracking_name()
        );
        run.attempt.fetched_revision = fetched.revision_id;

        run.advance(SyncPhase::Merging)?;
        if cancel.is_cancelled() {
            return Ok(Terminal::Cancelled);
        }

        let request = options.merge_request();
        let merge = if options.dry_run {
            self.backend.preview_merge(handle, request).await?
        } else {
            match self.backend.merge_or_rebase(handle, request).await {
                Ok(merge) => merge,
                Err(e) => {
                    if let Err(rollback) = self.rollback(handle, pre_head.as_deref()).await {
                        tracing::warn!("Rollback after failed merge also failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        };
        run.attempt.merge = Some(merge.clone());

        match classify(&merge) {
            Classification::Diverged => return Ok(Terminal::Diverged),
            Classification::Conflicted(report) => {
                // A preview never touched the working tree
                if !options.dry_run {
                    if options.keep_conflicts {
                        tracing::warn!(
                            conflicts = report.len(),
                            "Leaving conflicted merge in the working tree"
                        );
                    } else {
                        self.rollback(handle, pre_head.as_deref()).await?;
                    }
                }
                return Ok(Terminal::Conflicted(report));
            }
            Classification::Clean => {}
        }

        if options.dry_run {
            return Ok(Terminal::Succeeded);
        }

        if !cancel.begin_push() {
            self.rollback(handle, pre_head.as_deref()).await?;
            return Ok(Terminal::Cancelled);
        }

        run.advance(SyncPhase::Pushing)?;
        let pushed = self.backend.push(handle).await?;
        run.attempt.push = Some(pushed.clone());

        if !pushed.accepted {
            return Err(Error::PushRejected {
                reason: pushed
                    .rejected_reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(Terminal::Succeeded)
    }

    async fn rollback(&self, handle: &RepoHandle, pre_head: Option<&str>) -> Result<()> {
        tracing::info!(revision = ?pre_head, "Restoring pre-sync state");
        self.backend.rollback(handle, pre_head).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        FetchResult, MergeResult, MergeStatus, PushResult, RepoStatus, Stages, TouchedPath,
    };
    use crate::repo::RemoteInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Canned result or an error constructor
    #[derive(Clone)]
    enum Scripted<T> {
        Ok(T),
        Err(fn() -> Error),
    }

    impl<T: Clone> Scripted<T> {
        fn get(&self) -> Result<T> {
            match self {
                Scripted::Ok(value) => Ok(value.clone()),
                Scripted::Err(make) => Err(make()),
            }
        }
    }

    /// In-memory backend that records calls
    struct FakeBackend {
        status: RepoStatus,
        fetch: Scripted<FetchResult>,
        merge: Scripted<MergeResult>,
        push: Scripted<PushResult>,
        calls: Mutex<Vec<&'static str>>,
        /// When set, fetch waits for a notification
        fetch_gate: Option<Arc<Notify>>,
        /// Notified when fetch starts
        fetch_started: Arc<Notify>,
        /// Cancel this handle from inside merge
        cancel_during_merge: Option<CancelHandle>,
        /// When set, push waits for a notification
        push_gate: Option<Arc<Notify>>,
        /// Notified when push starts
        push_started: Arc<Notify>,
    }

    impl FakeBackend {
        fn clean() -> Self {
            Self {
                status: RepoStatus {
                    head: Some("aaaa".to_string()),
                    ..Default::default()
                },
                fetch: Scripted::Ok(FetchResult {
                    new_revision_available: true,
                    revision_id: Some("bbbb".to_string()),
                }),
                merge: Scripted::Ok(MergeResult {
                    status: MergeStatus::Clean,
                    touched_paths: vec![TouchedPath::clean("frontend/index.html")],
                }),
                push: Scripted::Ok(PushResult::accepted()),
                calls: Mutex::new(Vec::new()),
                fetch_gate: None,
                fetch_started: Arc::new(Notify::new()),
                cancel_during_merge: None,
                push_gate: None,
                push_started: Arc::new(Notify::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn status(&self, _handle: &RepoHandle) -> Result<RepoStatus> {
            self.record("status");
            Ok(self.status.clone())
        }

        async fn fetch(&self, _handle: &RepoHandle) -> Result<FetchResult> {
            self.record("fetch");
            self.fetch_started.notify_one();
            if let Some(gate) = &self.fetch_gate {
                gate.notified().await;
            }
            self.fetch.get()
        }

        async fn merge_or_rebase(
            &self,
            _handle: &RepoHandle,
            _request: MergeRequest,
        ) -> Result<MergeResult> {
            self.record("merge");
            if let Some(cancel) = &self.cancel_during_merge {
                cancel.cancel();
            }
            self.merge.get()
        }

        async fn preview_merge(
            &self,
            _handle: &RepoHandle,
            _request: MergeRequest,
        ) -> Result<MergeResult> {
            self.record("preview");
            self.merge.get()
        }

        async fn rollback(&self, _handle: &RepoHandle, _revision: Option<&str>) -> Result<()> {
            self.record("rollback");
            Ok(())
        }

        async fn push(&self, _handle: &RepoHandle) -> Result<PushResult> {
            self.record("push");
            self.push_started.notify_one();
            if let Some(gate) = &self.push_gate {
                gate.notified().await;
            }
            self.push.get()
        }
    }

    fn handle(dir: &TempDir) -> RepoHandle {
        RepoHandle::new(
            dir.path(),
            dir.path(),
            RemoteInfo {
                name: "origin".to_string(),
                url: "/srv/app.git".to_string(),
            },
            "main",
        )
    }

    async fn run(backend: FakeBackend, options: SyncOptions) -> (SyncOutcome, Arc<FakeBackend>) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(backend);
        let orchestrator = SyncOrchestrator::new(backend.clone());
        let outcome = orchestrator.sync(&handle(&dir), options).await;
        assert!(
            !SyncLock::lock_path(&handle(&dir)).exists(),
            "lock must be released"
        );
        (outcome, backend)
    }

    #[tokio::test]
    async fn test_clean_sync_succeeds() {
        let (outcome, backend) = run(FakeBackend::clean(), SyncOptions::default()).await;

        assert!(outcome.is_success(), "got {outcome:?}");
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "push"]);

        let attempt = outcome.attempt().unwrap();
        assert_eq!(attempt.pre_head(), Some("aaaa"));
        assert_eq!(attempt.fetched_revision(), Some("bbbb"));
        assert_eq!(
            attempt.phases(),
            &[
                SyncPhase::Idle,
                SyncPhase::Locking,
                SyncPhase::Fetching,
                SyncPhase::Merging,
                SyncPhase::Pushing,
                SyncPhase::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn test_dirty_tree_fails_before_fetch() {
        let mut backend = FakeBackend::clean();
        backend.status.dirty_paths = vec!["frontend/app.js".to_string()];

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        match &outcome {
            SyncOutcome::Failed {
                error: Error::DirtyWorkingTree { paths },
                ..
            } => assert_eq!(paths, &vec!["frontend/app.js".to_string()]),
            other => panic!("expected DirtyWorkingTree, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(backend.calls(), vec!["status"]);
    }

    #[tokio::test]
    async fn test_pending_operation_fails_before_fetch() {
        let mut backend = FakeBackend::clean();
        backend.status.in_progress = Some("rebase".to_string());

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        assert!(matches!(
            outcome.error(),
            Some(Error::OperationInProgress { .. })
        ));
        assert_eq!(backend.calls(), vec!["status"]);
    }

    #[tokio::test]
    async fn test_conflict_rolls_back_and_skips_push() {
        let mut backend = FakeBackend::clean();
        backend.merge = Scripted::Ok(MergeResult {
            status: MergeStatus::Conflicted,
            touched_paths: vec![TouchedPath::unmerged(
                "backend/config.json",
                Stages {
                    base: true,
                    local: true,
                    remote: true,
                },
            )],
        });

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        let SyncOutcome::Conflicted { report, attempt } = &outcome else {
            panic!("expected Conflicted, got {outcome:?}");
        };
        assert_eq!(report.len(), 1);
        assert!(report.get("backend/config.json").is_some());
        assert_eq!(attempt.final_phase(), SyncPhase::Conflicted);
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "rollback"]);
    }

    #[tokio::test]
    async fn test_keep_conflicts_skips_rollback() {
        let mut backend = FakeBackend::clean();
        backend.merge = Scripted::Ok(MergeResult {
            status: MergeStatus::Conflicted,
            touched_paths: Vec::new(),
        });
        let options = SyncOptions {
            keep_conflicts: true,
            ..Default::default()
        };

        let (outcome, backend) = run(backend, options).await;

        assert_eq!(outcome.name(), "Conflicted");
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge"]);
    }

    #[tokio::test]
    async fn test_unrelated_histories_diverge() {
        let mut backend = FakeBackend::clean();
        backend.merge = Scripted::Ok(MergeResult::unrelated());

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        assert!(matches!(outcome, SyncOutcome::Diverged { .. }));
        assert_eq!(outcome.exit_code(), 3);
        assert!(!backend.calls().contains(&"push"));
    }

    #[tokio::test]
    async fn test_non_fast_forward_is_surfaced_without_retry() {
        let mut backend = FakeBackend::clean();
        backend.push = Scripted::Err(|| Error::NonFastForward("[rejected] (fetch first)".into()));

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        assert!(matches!(outcome.error(), Some(Error::NonFastForward(_))));
        // One push, no rollback of the merge, no second fetch
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "push"]);
        assert_eq!(
            outcome.attempt().unwrap().final_phase(),
            SyncPhase::Failed
        );
    }

    #[tokio::test]
    async fn test_rejected_push_fails() {
        let mut backend = FakeBackend::clean();
        backend.push = Scripted::Ok(PushResult::rejected("[remote rejected] (hook declined)"));

        let (outcome, _) = run(backend, SyncOptions::default()).await;

        match outcome.error() {
            Some(Error::PushRejected { reason }) => assert!(reason.contains("hook declined")),
            other => panic!("expected PushRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_errors_fail_the_attempt() {
        let mut backend = FakeBackend::clean();
        backend.fetch = Scripted::Err(|| Error::AuthFailure("denied".into()));

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        assert!(matches!(outcome.error(), Some(Error::AuthFailure(_))));
        assert_eq!(backend.calls(), vec!["status", "fetch"]);
    }

    #[tokio::test]
    async fn test_merge_error_rolls_back() {
        let mut backend = FakeBackend::clean();
        backend.merge = Scripted::Err(|| Error::BackendUnavailable("git merge failed".into()));

        let (outcome, backend) = run(backend, SyncOptions::default()).await;

        assert!(matches!(
            outcome.error(),
            Some(Error::BackendUnavailable(_))
        ));
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "rollback"]);
    }

    #[tokio::test]
    async fn test_dry_run_previews_without_push() {
        let options = SyncOptions::default().with_dry_run(true);
        let (outcome, backend) = run(FakeBackend::clean(), options).await;

        assert!(outcome.is_success());
        assert!(outcome.attempt().unwrap().dry_run());
        assert_eq!(backend.calls(), vec!["status", "fetch", "preview"]);
    }

    #[tokio::test]
    async fn test_dry_run_conflict_touches_nothing() {
        let mut backend = FakeBackend::clean();
        backend.merge = Scripted::Ok(MergeResult {
            status: MergeStatus::Conflicted,
            touched_paths: Vec::new(),
        });
        let options = SyncOptions::default().with_dry_run(true);

        let (outcome, backend) = run(backend, options).await;

        assert_eq!(outcome.name(), "Conflicted");
        assert_eq!(backend.calls(), vec!["status", "fetch", "preview"]);
    }

    #[tokio::test]
    async fn test_cancel_during_merge_rolls_back() {
        let cancel = CancelHandle::new();
        let mut backend = FakeBackend::clean();
        backend.cancel_during_merge = Some(cancel.clone());
        let backend = Arc::new(backend);

        let dir = TempDir::new().unwrap();
        let orchestrator = SyncOrchestrator::new(backend.clone());
        let outcome = orchestrator
            .sync_with_cancel(&handle(&dir), SyncOptions::default(), &cancel)
            .await;

        assert!(matches!(outcome, SyncOutcome::Cancelled { .. }));
        assert_eq!(outcome.exit_code(), 130);
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "rollback"]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_fetch() {
        let cancel = CancelHandle::new();
        let mut backend = FakeBackend::clean();
        backend.fetch_gate = Some(Arc::new(Notify::new()));
        let fetch_started = backend.fetch_started.clone();
        let backend = Arc::new(backend);

        let dir = TempDir::new().unwrap();
        let handle = handle(&dir);
        let orchestrator = SyncOrchestrator::new(backend.clone());

        let task = {
            let cancel = cancel.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                orchestrator
                    .sync_with_cancel(&handle, SyncOptions::default(), &cancel)
                    .await
            })
        };

        fetch_started.notified().await;
        assert_eq!(cancel.cancel(), crate::sync::CancelResponse::Accepted);

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Cancelled { .. }));
        assert_eq!(backend.calls(), vec!["status", "fetch"]);
        assert!(!SyncLock::lock_path(&handle).exists());
    }

    #[tokio::test]
    async fn test_cancel_during_push_is_refused() {
        let cancel = CancelHandle::new();
        let gate = Arc::new(Notify::new());
        let mut backend = FakeBackend::clean();
        backend.push_gate = Some(gate.clone());
        let push_started = backend.push_started.clone();
        let backend = Arc::new(backend);

        let dir = TempDir::new().unwrap();
        let handle = handle(&dir);
        let orchestrator = SyncOrchestrator::new(backend.clone());

        let task = {
            let cancel = cancel.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                orchestrator
                    .sync_with_cancel(&handle, SyncOptions::default(), &cancel)
                    .await
            })
        };

        // Push is in flight; the request must not stop it
        push_started.notified().await;
        assert_eq!(cancel.cancel(), crate::sync::CancelResponse::Refused);
        assert!(!cancel.is_cancelled());
        gate.notify_one();

        let outcome = task.await.unwrap();
        assert!(outcome.is_success(), "got {outcome:?}");
        assert!(outcome.attempt().unwrap().push().unwrap().accepted);
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "push"]);
        assert!(!SyncLock::lock_path(&handle).exists());
    }

    #[tokio::test]
    async fn test_concurrent_syncs_are_single_flight() {
        let gate = Arc::new(Notify::new());
        let mut backend = FakeBackend::clean();
        backend.fetch_gate = Some(gate.clone());
        let fetch_started = backend.fetch_started.clone();
        let backend = Arc::new(backend);

        let dir = TempDir::new().unwrap();
        let handle = handle(&dir);
        let orchestrator = SyncOrchestrator::new(backend.clone());

        let first = {
            let orchestrator = orchestrator.clone();
            let handle = handle.clone();
            tokio::spawn(async move { orchestrator.sync(&handle, SyncOptions::default()).await })
        };

        // First attempt is parked inside fetch while holding the lock
        fetch_started.notified().await;
        let second = orchestrator.sync(&handle, SyncOptions::default()).await;
        assert!(matches!(second, SyncOutcome::AlreadyRunning { .. }));
        assert_eq!(second.exit_code(), 4);
        assert!(second.attempt().is_none());

        gate.notify_one();
        let first = first.await.unwrap();
        assert!(first.is_success());

        // Only the first attempt reached the backend
        assert_eq!(backend.calls(), vec!["status", "fetch", "merge", "push"]);
        assert!(!SyncLock::lock_path(&handle).exists());
    }

    #[test]
    fn test_union_requires_opt_in() {
        let config = SyncConfig::default();
        assert!(matches!(SyncOptions::union(&config), Err(Error::Config(_))));

        let config = SyncConfig {
            allow_unrelated_histories: true,
            strategy: Strategy::Rebase,
            ..Default::default()
        };
        let options = SyncOptions::union(&config).unwrap();
        assert_eq!(options.strategy, Strategy::Merge);
        assert_eq!(options.merge_request(), MergeRequest::union());
    }

    #[test]
    fn test_regular_sync_never_allows_unrelated() {
        let config = SyncConfig {
            allow_unrelated_histories: true,
            ..Default::default()
        };
        let options = SyncOptions::from_config(&config);
        assert!(!options.merge_request().allow_unrelated_histories);
    }
}
