//! Warehouse lifecycle service.
//!
//! Applies the transition rules from [`repo_warehouse_core::lifecycle`] to
//! stored warehouses. Submissions are idempotent by normalized address and
//! serialized with pipeline runs through the per-address run lock, so a
//! re-submission that arrives mid-run is applied once the run finishes.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use repo_warehouse_core::lifecycle::{plan_progress, plan_transition, StatusChange};
use repo_warehouse_core::models::{
    RepositoryReference, Warehouse, WarehouseStatus, PLACEHOLDER_VERSION,
};
use repo_warehouse_core::path::{normalize_address, resolve};
use repo_warehouse_core::store::WarehouseStore;
use repo_warehouse_core::PipelineError;

use crate::locks::LockRegistry;

/// Optional fields supplied with a submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub description: Option<String>,
    pub model: Option<String>,
}

pub struct WarehouseLifecycle {
    store: Arc<dyn WarehouseStore>,
    locks: Arc<LockRegistry>,
    cache_root: PathBuf,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl WarehouseLifecycle {
    pub fn new(store: Arc<dyn WarehouseStore>, locks: Arc<LockRegistry>, cache_root: PathBuf) -> Self {
        Self {
            store,
            locks,
            cache_root,
        }
    }

    pub fn store(&self) -> &Arc<dyn WarehouseStore> {
        &self.store
    }

    /// Create or reset the warehouse for `reference`.
    ///
    /// The reference is resolved before anything is written, so a malformed
    /// address never leaves a record behind.
    pub async fn submit(
        &self,
        reference: &RepositoryReference,
        options: &SubmitOptions,
    ) -> Result<Warehouse, PipelineError> {
        let location = resolve(reference, &self.cache_root)?;
        let kind = reference.effective_kind();
        let address = normalize_address(&reference.address, kind);

        let lock = self.locks.run_lock(&address);
        let _guard = lock.lock().await;

        let description = non_blank(&options.description);
        let model = non_blank(&options.model);

        if let Some(mut existing) = self.store.find_by_address(&address).await? {
            let change = plan_transition(&existing, WarehouseStatus::Pending, None, None)?;

            if reference.branch.is_some() {
                existing.branch = reference.branch.clone();
            }
            if let Some(model) = model {
                existing.model = model;
            }
            if let Some(description) = description {
                existing.description = description;
            }
            existing.status = change.status;
            existing.progress = change.progress;
            existing.error = change.error;

            self.store.save_submission(&existing).await?;
            tracing::info!(id = %existing.id, address = %address, "warehouse resubmitted");
            return Ok(existing);
        }

        let warehouse = Warehouse {
            id: Uuid::new_v4().simple().to_string(),
            address: address.clone(),
            organization_name: location.organization,
            name: location.repository_name,
            branch: reference.branch.clone(),
            kind,
            status: WarehouseStatus::Pending,
            progress: 0,
            error: String::new(),
            version: PLACEHOLDER_VERSION.to_string(),
            description: description.unwrap_or_else(|| format!("Repository from {}", address)),
            model: model.unwrap_or_default(),
            created_at: Utc::now(),
        };

        self.store.insert_warehouse(&warehouse).await?;
        tracing::info!(
            id = %warehouse.id,
            organization = %warehouse.organization_name,
            name = %warehouse.name,
            "warehouse created"
        );
        Ok(warehouse)
    }

    pub async fn get(&self, id: &str) -> Result<Warehouse, PipelineError> {
        self.store
            .get_warehouse(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("warehouse {}", id)))
    }

    /// Move warehouse `id` to `to`, persisting the change before returning.
    pub async fn advance(
        &self,
        id: &str,
        to: WarehouseStatus,
        progress: Option<u8>,
        error: Option<&str>,
    ) -> Result<Warehouse, PipelineError> {
        let current = self.get(id).await?;
        let change = plan_transition(&current, to, progress, error)?;
        self.apply(current, change).await
    }

    /// Complete a run, recording the head commit as the new version.
    pub async fn complete(&self, id: &str, version: &str) -> Result<Warehouse, PipelineError> {
        let current = self.get(id).await?;
        let change =
            plan_transition(&current, WarehouseStatus::Completed, None, None)?.with_version(version);
        self.apply(current, change).await
    }

    async fn apply(
        &self,
        current: Warehouse,
        change: StatusChange,
    ) -> Result<Warehouse, PipelineError> {
        let applied = self
            .store
            .apply_status(&current.id, current.status, &change)
            .await?;
        if !applied {
            // Someone else moved the warehouse after we read it.
            let latest = self.get(&current.id).await?;
            return Err(PipelineError::InvalidTransition {
                from: latest.status,
                to: change.status,
            });
        }

        tracing::debug!(
            id = %current.id,
            from = %current.status,
            to = %change.status,
            progress = change.progress,
            "warehouse transition"
        );

        let mut updated = current;
        updated.status = change.status;
        updated.progress = change.progress;
        updated.error = change.error;
        if let Some(version) = change.version {
            updated.version = version;
        }
        Ok(updated)
    }

    /// Report progress of a running warehouse.
    pub async fn report_progress(&self, id: &str, progress: u8) -> Result<(), PipelineError> {
        let current = self.get(id).await?;
        let progress = plan_progress(&current, progress)?;
        if !self.store.set_progress(id, progress).await? {
            let latest = self.get(id).await?;
            plan_progress(&latest, progress)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_warehouse_core::store::memory::InMemoryStore;

    fn lifecycle() -> WarehouseLifecycle {
        WarehouseLifecycle::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(LockRegistry::new()),
            PathBuf::from("/cache"),
        )
    }

    #[tokio::test]
    async fn first_submission_uses_defaults() {
        let lc = lifecycle();
        let w = lc
            .submit(
                &RepositoryReference::remote("https://example.com/org/repo"),
                &SubmitOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(w.address, "https://example.com/org/repo.git");
        assert_eq!(w.organization_name, "org");
        assert_eq!(w.name, "repo");
        assert_eq!(w.status, WarehouseStatus::Pending);
        assert_eq!(w.version, PLACEHOLDER_VERSION);
        assert_eq!(w.description, "Repository from https://example.com/org/repo.git");
        assert_eq!(w.branch, None);
    }

    #[tokio::test]
    async fn resubmission_updates_in_place() {
        let lc = lifecycle();
        let reference = RepositoryReference::remote("https://example.com/org/repo.git");
        let first = lc.submit(&reference, &SubmitOptions::default()).await.unwrap();
        lc.advance(&first.id, WarehouseStatus::Processing, None, None)
            .await
            .unwrap();
        lc.report_progress(&first.id, 40).await.unwrap();
        lc.advance(&first.id, WarehouseStatus::Failed, None, Some("boom"))
            .await
            .unwrap();

        let second = lc
            .submit(
                &reference.clone().with_branch(Some("dev".to_string())),
                &SubmitOptions {
                    description: Some("updated".to_string()),
                    model: Some("gpt-4o".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.status, WarehouseStatus::Pending);
        assert_eq!(second.progress, 0);
        assert_eq!(second.error, "");
        assert_eq!(second.description, "updated");
        assert_eq!(second.branch.as_deref(), Some("dev"));

        let (total, _) = lc.store().list_warehouses(0, 10).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn malformed_reference_writes_nothing() {
        let lc = lifecycle();
        let err = lc
            .submit(
                &RepositoryReference::remote("https://example.com/onlyone"),
                &SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReferenceResolution { .. }));
        assert_eq!(lc.store().list_warehouses(0, 10).await.unwrap().0, 0);
    }

    #[tokio::test]
    async fn advance_rejects_completed_to_processing() {
        let lc = lifecycle();
        let w = lc
            .submit(
                &RepositoryReference::remote("https://example.com/org/repo.git"),
                &SubmitOptions::default(),
            )
            .await
            .unwrap();
        lc.advance(&w.id, WarehouseStatus::Processing, None, None)
            .await
            .unwrap();
        let done = lc.complete(&w.id, "abc123").await.unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.version, "abc123");

        let err = lc
            .advance(&w.id, WarehouseStatus::Processing, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn progress_cannot_go_backwards() {
        let lc = lifecycle();
        let w = lc
            .submit(
                &RepositoryReference::remote("https://example.com/org/repo.git"),
                &SubmitOptions::default(),
            )
            .await
            .unwrap();
        assert!(lc.report_progress(&w.id, 10).await.is_err());

        lc.advance(&w.id, WarehouseStatus::Processing, None, None)
            .await
            .unwrap();
        lc.report_progress(&w.id, 30).await.unwrap();
        assert!(lc.report_progress(&w.id, 20).await.is_err());
        assert!(lc.report_progress(&w.id, 100).await.is_err());
        assert_eq!(lc.get(&w.id).await.unwrap().progress, 30);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let lc = lifecycle();
        assert!(matches!(
            lc.get("missing").await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
    }
}
