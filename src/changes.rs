//! Git-backed change detection.
//!
//! Wraps [`repo_warehouse_core::changes::needs_reprocessing`] with the
//! commit graph of the cached working copy. Graph queries are git
//! subprocesses, so they run on the blocking pool under the cache key's
//! read lock.

use anyhow::Result;
use std::sync::Arc;

use repo_warehouse_core::changes::{needs_reprocessing, ChangeSet, CommitHistory};
use repo_warehouse_core::models::{
    CommitSummary, DocumentCommitRecord, RepositorySnapshot, ResolvedLocation, Warehouse,
};
use repo_warehouse_core::PipelineError;

use crate::git::GitHistory;
use crate::locks::LockRegistry;

pub struct ChangeDetector {
    locks: Arc<LockRegistry>,
}

impl ChangeDetector {
    pub fn new(locks: Arc<LockRegistry>) -> Self {
        Self { locks }
    }

    /// Compare `snapshot` with the last processed commit of `warehouse`.
    pub async fn detect(
        &self,
        warehouse: &Warehouse,
        snapshot: &RepositorySnapshot,
        last_record: Option<DocumentCommitRecord>,
        location: &ResolvedLocation,
    ) -> Result<ChangeSet, PipelineError> {
        let lock = self.locks.cache_lock(&location.cache_key());
        let _guard = lock.read().await;

        let warehouse = warehouse.clone();
        let snapshot = snapshot.clone();
        let repo_dir = location.local_path.clone();

        let decision = tokio::task::spawn_blocking(move || {
            let history = LoggedHistory(GitHistory::new(repo_dir));
            needs_reprocessing(&warehouse, &snapshot, last_record.as_ref(), &history)
        })
        .await
        .map_err(|e| anyhow::anyhow!("change detection task aborted: {}", e))??;

        Ok(decision)
    }
}

/// Logs graph queries that fail before the decision treats the recorded
/// commit as unreachable.
struct LoggedHistory<H>(H);

impl<H: CommitHistory> CommitHistory for LoggedHistory<H> {
    fn is_reachable(&self, ancestor: &str, head: &str) -> Result<bool> {
        self.0.is_reachable(ancestor, head).inspect_err(|e| {
            tracing::warn!(
                ancestor,
                head,
                error = %format!("{:#}", e),
                "ancestry check failed, regenerating in full"
            )
        })
    }

    fn commits_between(&self, from: &str, head: &str) -> Result<Vec<CommitSummary>> {
        self.0.commits_between(from, head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use chrono::Utc;
    use repo_warehouse_core::changes::FullReason;
    use repo_warehouse_core::models::{ReferenceKind, WarehouseStatus};

    struct BrokenGraph;

    impl CommitHistory for BrokenGraph {
        fn is_reachable(&self, _ancestor: &str, _head: &str) -> Result<bool> {
            bail!("git merge-base failed: fatal: not a git repository")
        }

        fn commits_between(&self, _from: &str, _head: &str) -> Result<Vec<CommitSummary>> {
            bail!("not reached")
        }
    }

    fn warehouse() -> Warehouse {
        Warehouse {
            id: "w1".to_string(),
            address: "https://example.com/acme/widgets.git".to_string(),
            organization_name: "acme".to_string(),
            name: "widgets".to_string(),
            branch: None,
            kind: ReferenceKind::Remote,
            status: WarehouseStatus::Processing,
            progress: 10,
            error: String::new(),
            version: "c1".to_string(),
            description: String::new(),
            model: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn failed_ancestry_check_is_reported_then_treated_as_rewritten() {
        let history = LoggedHistory(BrokenGraph);
        let err = history.is_reachable("c1", "c2").unwrap_err();
        assert!(err.to_string().contains("merge-base failed"));

        let snapshot = RepositorySnapshot {
            branch_name: "main".to_string(),
            head_commit_id: "c2".to_string(),
            commit_timestamp: Utc::now(),
            commit_author: "dev".to_string(),
            commit_message: "second".to_string(),
        };
        let record = DocumentCommitRecord {
            warehouse_id: "w1".to_string(),
            commit_id: "c1".to_string(),
            commit_message: "first".to_string(),
            author: "dev".to_string(),
            processed_at: Utc::now(),
            changes: Vec::new(),
        };
        let decision = needs_reprocessing(&warehouse(), &snapshot, Some(&record), &history).unwrap();
        assert_eq!(decision, ChangeSet::Full(FullReason::HistoryRewritten));
    }
}
