//! Conflict classification
//!
//! Turns a [`MergeResult`] into a terminal classification. Conflicted paths are
//! paired with the kind of divergence that produced them. When the index
//! stages fit more than one explanation the path is reported as ambiguous with
//! every candidate listed; no side is ever picked.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::backend::{MergeResult, MergeStatus, Stages};

/// What one side did to a path since the common ancestor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(word)
    }
}

/// A specific local/remote divergence on one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictKind {
    BothModified,
    BothAdded,
    /// Modified locally, deleted remotely
    DeletedRemotely,
    /// Deleted locally, modified remotely
    DeletedLocally,
    /// Both sides renamed the path to different names
    RenameCollision,
    /// Renamed locally while the remote changed the original
    RenamedLocally,
    /// Renamed remotely while the local side changed the original
    RenamedRemotely,
    BothDeleted,
}

impl ConflictKind {
    /// Change made on the local side
    pub fn local(&self) -> ChangeKind {
        match self {
            ConflictKind::BothModified | ConflictKind::DeletedRemotely => ChangeKind::Modified,
            ConflictKind::RenamedRemotely => ChangeKind::Modified,
            ConflictKind::BothAdded => ChangeKind::Added,
            ConflictKind::DeletedLocally | ConflictKind::BothDeleted => ChangeKind::Deleted,
            ConflictKind::RenameCollision | ConflictKind::RenamedLocally => ChangeKind::Renamed,
        }
    }

    /// Change made on the remote side
    pub fn remote(&self) -> ChangeKind {
        match self {
            ConflictKind::BothModified | ConflictKind::DeletedLocally => ChangeKind::Modified,
            ConflictKind::RenamedLocally => ChangeKind::Modified,
            ConflictKind::BothAdded => ChangeKind::Added,
            ConflictKind::DeletedRemotely | ConflictKind::BothDeleted => ChangeKind::Deleted,
            ConflictKind::RenameCollision | ConflictKind::RenamedRemotely => ChangeKind::Renamed,
        }
    }

    /// e.g. "modified locally, deleted remotely"
    pub fn description(&self) -> String {
        format!("{} locally, {} remotely", self.local(), self.remote())
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Classification of one conflicted path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Conflict {
    /// The stages admit exactly one explanation
    Definite(ConflictKind),
    /// Several explanations fit; resolution is left to a human
    Ambiguous { candidates: Vec<ConflictKind> },
}

impl Conflict {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Conflict::Ambiguous { .. })
    }

    /// All explanations for this conflict
    pub fn candidates(&self) -> Vec<ConflictKind> {
        match self {
            Conflict::Definite(kind) => vec![*kind],
            Conflict::Ambiguous { candidates } => candidates.clone(),
        }
    }

    fn from_stages(stages: Stages) -> Option<Self> {
        let Stages {
            base,
            local,
            remote,
        } = stages;
        let conflict = match (base, local, remote) {
            (true, true, true) => Conflict::Definite(ConflictKind::BothModified),
            (false, true, true) => Conflict::Definite(ConflictKind::BothAdded),
            (true, true, false) => Conflict::Definite(ConflictKind::DeletedRemotely),
            (true, false, true) => Conflict::Definite(ConflictKind::DeletedLocally),
            (true, false, false) => Conflict::Ambiguous {
                candidates: vec![ConflictKind::RenameCollision, ConflictKind::BothDeleted],
            },
            (false, true, false) => Conflict::Ambiguous {
                candidates: vec![ConflictKind::RenameCollision, ConflictKind::RenamedLocally],
            },
            (false, false, true) => Conflict::Ambiguous {
                candidates: vec![ConflictKind::RenameCollision, ConflictKind::RenamedRemotely],
            },
            (false, false, false) => return None,
        };
        Some(conflict)
    }

    /// Combine two classifications reported for the same path
    fn union(self, other: Conflict) -> Conflict {
        if self == other {
            return self;
        }
        let mut candidates = self.candidates();
        for kind in other.candidates() {
            if !candidates.contains(&kind) {
                candidates.push(kind);
            }
        }
        Conflict::Ambiguous { candidates }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Definite(kind) => write!(f, "{} ({})", kind, kind.description()),
            Conflict::Ambiguous { candidates } => {
                let names: Vec<String> = candidates.iter().map(|k| k.to_string()).collect();
                write!(f, "AmbiguousConflict ({})", names.join(" | "))
            }
        }
    }
}

/// Conflicting path -> divergence, one entry per path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConflictReport {
    entries: BTreeMap<String, Conflict>,
}

impl ConflictReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Conflict> {
        self.entries.get(path)
    }

    /// Entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Conflict)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c))
    }

    /// Number of paths that need a human to pick an interpretation
    pub fn ambiguous_count(&self) -> usize {
        self.entries.values().filter(|c| c.is_ambiguous()).count()
    }

    fn insert(&mut self, path: String, conflict: Conflict) {
        let merged = match self.entries.remove(&path) {
            Some(existing) => existing.union(conflict),
            None => conflict,
        };
        self.entries.insert(path, merged);
    }
}

impl FromIterator<(String, Conflict)> for ConflictReport {
    fn from_iter<I: IntoIterator<Item = (String, Conflict)>>(iter: I) -> Self {
        let mut report = ConflictReport::default();
        for (path, conflict) in iter {
            report.insert(path, conflict);
        }
        report
    }
}

/// Result of classifying a merge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Safe to push
    Clean,
    /// At least one path diverged; never auto-resolved
    Conflicted(ConflictReport),
    /// Local and remote share no history
    Diverged,
}

/// Classify a merge result
///
/// Any unmerged path makes the result conflicted, even if the backend called
/// it clean, and a backend-reported conflict stays conflicted even when no
/// path could be recovered.
pub fn classify(result: &MergeResult) -> Classification {
    if result.status == MergeStatus::UnrelatedHistories {
        return Classification::Diverged;
    }

    let report: ConflictReport = result
        .touched_paths
        .iter()
        .filter_map(|touched| {
            let conflict = Conflict::from_stages(touched.stages?)?;
            Some((touched.path.clone(), conflict))
        })
        .collect();

    if result.status == MergeStatus::Conflicted || !report.is_empty() {
        Classification::Conflicted(report)
    } else {
        Classification::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TouchedPath;

    fn stages(base: bool, local: bool, remote: bool) -> Stages {
        Stages {
            base,
            local,
            remote,
        }
    }

    fn conflicted(paths: Vec<TouchedPath>) -> MergeResult {
        MergeResult {
            status: MergeStatus::Conflicted,
            touched_paths: paths,
        }
    }

    #[test]
    fn test_clean_merge() {
        let result = MergeResult {
            status: MergeStatus::Clean,
            touched_paths: vec![TouchedPath::clean("frontend/index.html")],
        };
        assert_eq!(classify(&result), Classification::Clean);
    }

    #[test]
    fn test_unrelated_histories_diverge() {
        assert_eq!(classify(&MergeResult::unrelated()), Classification::Diverged);
    }

    #[test]
    fn test_both_modified() {
        let result = conflicted(vec![
            TouchedPath::unmerged("backend/config.json", stages(true, true, true)),
            TouchedPath::clean("README.md"),
        ]);
        let Classification::Conflicted(report) = classify(&result) else {
            panic!("expected conflict");
        };
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.get("backend/config.json"),
            Some(&Conflict::Definite(ConflictKind::BothModified))
        );
    }

    #[test]
    fn test_stage_mapping() {
        let cases = [
            (stages(false, true, true), ConflictKind::BothAdded),
            (stages(true, true, false), ConflictKind::DeletedRemotely),
            (stages(true, false, true), ConflictKind::DeletedLocally),
        ];
        for (stages, expected) in cases {
            assert_eq!(
                Conflict::from_stages(stages),
                Some(Conflict::Definite(expected))
            );
        }
    }

    #[test]
    fn test_rename_shapes_are_ambiguous() {
        let both_gone = Conflict::from_stages(stages(true, false, false)).unwrap();
        assert!(both_gone.is_ambiguous());
        assert_eq!(
            both_gone.candidates(),
            vec![ConflictKind::RenameCollision, ConflictKind::BothDeleted]
        );

        let local_only = Conflict::from_stages(stages(false, true, false)).unwrap();
        assert!(local_only.candidates().contains(&ConflictKind::RenamedLocally));

        let remote_only = Conflict::from_stages(stages(false, false, true)).unwrap();
        assert!(remote_only.candidates().contains(&ConflictKind::RenamedRemotely));

        assert!(Conflict::from_stages(stages(false, false, false)).is_none());
    }

    #[test]
    fn test_duplicate_path_reported_once() {
        let result = conflicted(vec![
            TouchedPath::unmerged("backend/config.json", stages(true, true, true)),
            TouchedPath::unmerged("backend/config.json", stages(true, true, true)),
        ]);
        let Classification::Conflicted(report) = classify(&result) else {
            panic!("expected conflict");
        };
        assert_eq!(report.len(), 1);
        assert!(!report.get("backend/config.json").unwrap().is_ambiguous());
    }

    #[test]
    fn test_disagreeing_duplicates_become_ambiguous() {
        let result = conflicted(vec![
            TouchedPath::unmerged("api.py", stages(true, true, true)),
            TouchedPath::unmerged("api.py", stages(true, true, false)),
        ]);
        let Classification::Conflicted(report) = classify(&result) else {
            panic!("expected conflict");
        };
        assert_eq!(
            report.get("api.py").unwrap().candidates(),
            vec![ConflictKind::BothModified, ConflictKind::DeletedRemotely]
        );
        assert_eq!(report.ambiguous_count(), 1);
    }

    #[test]
    fn test_unmerged_path_overrides_clean_status() {
        let result = MergeResult {
            status: MergeStatus::Clean,
            touched_paths: vec![TouchedPath::unmerged("main.py", stages(true, true, true))],
        };
        assert!(matches!(classify(&result), Classification::Conflicted(_)));
    }

    #[test]
    fn test_conflicted_status_without_paths_stays_conflicted() {
        let result = conflicted(Vec::new());
        assert_eq!(
            classify(&result),
            Classification::Conflicted(ConflictReport::default())
        );
    }

    #[test]
    fn test_report_serializes_as_path_map() {
        let report: ConflictReport = [
            (
                "backend/config.json".to_string(),
                Conflict::Definite(ConflictKind::BothModified),
            ),
            (
                "old.txt".to_string(),
                Conflict::Ambiguous {
                    candidates: vec![ConflictKind::RenameCollision, ConflictKind::BothDeleted],
                },
            ),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["backend/config.json"], "BothModified");
        assert_eq!(
            json["old.txt"]["candidates"],
            serde_json::json!(["RenameCollision", "BothDeleted"])
        );
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            ConflictKind::DeletedRemotely.description(),
            "modified locally, deleted remotely"
        );
        assert_eq!(
            Conflict::Definite(ConflictKind::BothModified).to_string(),
            "BothModified (modified locally, modified remotely)"
        );
        assert_eq!(
            Conflict::Ambiguous {
                candidates: vec![ConflictKind::RenameCollision, ConflictKind::RenamedLocally]
            }
            .to_string(),
            "AmbiguousConflict (RenameCollision | RenamedLocally)"
        );
    }
}
