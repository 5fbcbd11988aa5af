//! Record of one sync attempt
//!
//! Built while the attempt runs and frozen into a [`SyncAttempt`] once a
//! terminal phase is reached. Only used for reporting; never written into
//! repository history.

use std::time::{Duration, SystemTime};

use serde::Serialize;

use super::state::SyncPhase;
use crate::backend::{MergeResult, PushResult, Strategy};

/// Finalized, read-only record of a sync attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAttempt {
    #[serde(with = "humantime_serde")]
    started_at: SystemTime,
    #[serde(with = "humantime_serde")]
    finished_at: SystemTime,
    strategy: Strategy,
    dry_run: bool,
    pre_head: Option<String>,
    fetched_revision: Option<String>,
    merge: Option<MergeResult>,
    push: Option<PushResult>,
    phases: Vec<SyncPhase>,
}

impl SyncAttempt {
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn finished_at(&self) -> SystemTime {
        self.finished_at
    }

    /// Wall-clock duration of the attempt
    pub fn duration(&self) -> Duration {
        self.finished_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// HEAD before anything was changed
    pub fn pre_head(&self) -> Option<&str> {
        self.pre_head.as_deref()
    }

    /// Remote branch tip seen by the fetch
    pub fn fetched_revision(&self) -> Option<&str> {
        self.fetched_revision.as_deref()
    }

    pub fn merge(&self) -> Option<&MergeResult> {
        self.merge.as_ref()
    }

    pub fn push(&self) -> Option<&PushResult> {
        self.push.as_ref()
    }

    /// Phases visited, in order
    pub fn phases(&self) -> &[SyncPhase] {
        &self.phases
    }

    /// Phase the attempt ended in
    pub fn final_phase(&self) -> SyncPhase {
        self.phases.last().copied().unwrap_or(SyncPhase::Idle)
    }
}

/// Mutable record of a running attempt
#[derive(Debug)]
pub(crate) struct AttemptBuilder {
    started_at: SystemTime,
    strategy: Strategy,
    dry_run: bool,
    pub(crate) pre_head: Option<String>,
    pub(crate) fetched_revision: Option<String>,
    pub(crate) merge: Option<MergeResult>,
    pub(crate) push: Option<PushResult>,
}

impl AttemptBuilder {
    pub(crate) fn start(strategy: Strategy, dry_run: bool) -> Self {
        Self {
            started_at: SystemTime::now(),
            strategy,
            dry_run,
            pre_head: None,
            fetched_revision: None,
            merge: None,
            push: None,
        }
    }

    pub(crate) fn finish(self, phases: &[SyncPhase]) -> SyncAttempt {
        SyncAttempt {
            started_at: self.started_at,
            finished_at: SystemTime::now(),
            strategy: self.strategy,
            dry_run: self.dry_run,
            pre_head: self.pre_head,
            fetched_revision: self.fetched_revision,
            merge: self.merge,
            push: self.push,
            phases: phases.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_freezes_fields() {
        let mut builder = AttemptBuilder::start(Strategy::Rebase, false);
        builder.pre_head = Some("abc123".to_string());
        builder.fetched_revision = Some("def456".to_string());
        builder.push = Some(PushResult::accepted());

        let attempt = builder.finish(&[
            SyncPhase::Idle,
            SyncPhase::Locking,
            SyncPhase::Fetching,
            SyncPhase::Merging,
            SyncPhase::Pushing,
            SyncPhase::Succeeded,
        ]);

        assert_eq!(attempt.strategy(), Strategy::Rebase);
        assert_eq!(attempt.pre_head(), Some("abc123"));
        assert_eq!(attempt.fetched_revision(), Some("def456"));
        assert!(attempt.push().unwrap().accepted);
        assert_eq!(attempt.final_phase(), SyncPhase::Succeeded);
        assert!(attempt.finished_at() >= attempt.started_at());
    }

    #[test]
    fn test_serializes_timestamps_as_text() {
        let attempt = AttemptBuilder::start(Strategy::Merge, true).finish(&[SyncPhase::Idle]);
        let json = serde_json::to_value(&attempt).unwrap();

        assert!(json["started_at"].is_string());
        assert_eq!(json["strategy"], "merge");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["phases"], serde_json::json!(["Idle"]));
    }
}
