//! Reprocessing decision.
//!
//! Compares the commit recorded by the last successful run against the head
//! of the freshly synchronized snapshot. Commit history is read through the
//! [`CommitHistory`] trait so the decision stays independent of how the
//! repository is stored.

use anyhow::Result;

use crate::models::{CommitSummary, DocumentCommitRecord, RepositorySnapshot, Warehouse};

/// Why a full regeneration was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullReason {
    /// No commit has been processed for this warehouse yet.
    FirstRun,
    /// The recorded commit is not an ancestor of the current head.
    HistoryRewritten,
}

/// What changed since the last processed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    UpToDate,
    Full(FullReason),
    /// Commits between the recorded commit (exclusive) and head, oldest first.
    Incremental(Vec<CommitSummary>),
}

impl ChangeSet {
    pub fn requires_processing(&self) -> bool {
        !matches!(self, ChangeSet::UpToDate)
    }

    pub fn commits(&self) -> &[CommitSummary] {
        match self {
            ChangeSet::Incremental(commits) => commits,
            _ => &[],
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ChangeSet::UpToDate => "up to date".to_string(),
            ChangeSet::Full(FullReason::FirstRun) => "full (first run)".to_string(),
            ChangeSet::Full(FullReason::HistoryRewritten) => {
                "full (previous commit unreachable)".to_string()
            }
            ChangeSet::Incremental(commits) => format!("incremental ({} commits)", commits.len()),
        }
    }
}

/// Read access to a repository's commit graph.
pub trait CommitHistory {
    /// `true` if `ancestor` is reachable from `head`. Unknown ids are unreachable.
    fn is_reachable(&self, ancestor: &str, head: &str) -> Result<bool>;

    /// Commits reachable from `head` but not from `from`, oldest first.
    fn commits_between(&self, from: &str, head: &str) -> Result<Vec<CommitSummary>>;
}

/// Decide whether `warehouse` must be regenerated for `snapshot`.
///
/// A record that belongs to another warehouse counts as no record. An
/// unreachable previous commit yields [`FullReason::HistoryRewritten`]
/// rather than an error.
pub fn needs_reprocessing(
    warehouse: &Warehouse,
    snapshot: &RepositorySnapshot,
    last_record: Option<&DocumentCommitRecord>,
    history: &dyn CommitHistory,
) -> Result<ChangeSet> {
    let record = match last_record {
        Some(r) if r.warehouse_id == warehouse.id => r,
        _ => return Ok(ChangeSet::Full(FullReason::FirstRun)),
    };

    if record.commit_id == snapshot.head_commit_id {
        return Ok(ChangeSet::UpToDate);
    }

    if !snapshot.has_history() {
        return Ok(ChangeSet::Full(FullReason::HistoryRewritten));
    }

    let reachable = history
        .is_reachable(&record.commit_id, &snapshot.head_commit_id)
        .unwrap_or(false);
    if !reachable {
        return Ok(ChangeSet::Full(FullReason::HistoryRewritten));
    }

    let commits = history.commits_between(&record.commit_id, &snapshot.head_commit_id)?;
    Ok(ChangeSet::Incremental(commits))
}
