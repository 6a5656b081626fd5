//! Pipeline coordinator: one end-to-end processing run per warehouse.
//!
//! # Run Steps
//!
//! ```text
//! Pending ─▶ Processing
//!   resolve ─▶ synchronize (10%) ─▶ detect changes (15%)
//!     └─ up to date ─────────────────────────────────────────▶ Completed (100%)
//!     └─ changed: README + file tree ─▶ catalogue (25%)
//!          ─▶ one document per node (25% → 95%)
//!          ─▶ store documents + commit record ───────────────▶ Completed (100%)
//!   any failure or cancellation ─────────────────────────────▶ Failed
//! ```
//!
//! Runs for the same address are serialized by the run lock; submissions
//! take the same lock, so a re-submission never interleaves with a run.
//! Failures are recorded on the warehouse and not retried.

use anyhow::Result;
use chrono::Utc;
use globset::GlobSet;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Instrument;

use repo_warehouse_core::models::{
    Credentials, DocumentCommitRecord, GeneratedDocument, ResolvedLocation, Warehouse,
    WarehouseStatus,
};
use repo_warehouse_core::path::resolve;
use repo_warehouse_core::store::WarehouseStore;
use repo_warehouse_core::PipelineError;

use crate::changes::ChangeDetector;
use crate::config::Config;
use crate::generation::GeneratorFactory;
use crate::lifecycle::WarehouseLifecycle;
use crate::locks::LockRegistry;
use crate::progress::{
    document_percent, NoProgress, PipelineProgressEvent, PipelineProgressReporter, PipelineStep,
};
use crate::repo_files::{self, RepoFileAccess};
use crate::sync::RepositorySynchronizer;

const SYNCHRONIZED_PERCENT: u8 = 10;
const CHANGES_DETECTED_PERCENT: u8 = 15;
const CATALOGUE_READY_PERCENT: u8 = 25;

pub struct PipelineCoordinator {
    lifecycle: Arc<WarehouseLifecycle>,
    synchronizer: RepositorySynchronizer,
    detector: ChangeDetector,
    generation: Arc<dyn GeneratorFactory>,
    locks: Arc<LockRegistry>,
    cache_root: PathBuf,
    excludes: GlobSet,
    max_tree_entries: usize,
    reporter: Arc<dyn PipelineProgressReporter>,
    cancellations: Mutex<HashMap<String, CancelEntry>>,
}

/// Cancellation flag shared by every run registered for one warehouse.
///
/// Overlapping `process` calls for the same id wait on the run lock with the
/// same flag; the entry goes away when the last of them releases it.
#[derive(Default)]
struct CancelEntry {
    token: Arc<AtomicBool>,
    runs: usize,
}

/// Inputs for catalogue structuring.
struct RepositoryInputs {
    readme: String,
    file_tree: String,
}

fn skipped_note(paths: &[String]) -> String {
    let mut note = String::from("\n\n---\nSkipped (unreadable):\n");
    for path in paths {
        note.push_str(&format!("- {}\n", path));
    }
    note
}

impl PipelineCoordinator {
    pub fn new(
        config: &Config,
        store: Arc<dyn WarehouseStore>,
        generation: Arc<dyn GeneratorFactory>,
    ) -> Result<Self> {
        let locks = Arc::new(LockRegistry::new());
        let lifecycle = Arc::new(WarehouseLifecycle::new(
            store,
            locks.clone(),
            config.cache.root.clone(),
        ));

        Ok(Self {
            lifecycle,
            synchronizer: RepositorySynchronizer::new(config, locks.clone()),
            detector: ChangeDetector::new(locks.clone()),
            generation,
            locks,
            cache_root: config.cache.root.clone(),
            excludes: repo_files::exclude_set(&config.files.exclude_globs)?,
            max_tree_entries: config.generation.max_tree_entries,
            reporter: Arc::new(NoProgress),
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The lifecycle service sharing this coordinator's locks.
    pub fn lifecycle(&self) -> &Arc<WarehouseLifecycle> {
        &self.lifecycle
    }

    pub fn store(&self) -> &Arc<dyn WarehouseStore> {
        self.lifecycle.store()
    }

    /// Run the pipeline for a `Pending` warehouse without credentials.
    pub async fn process(&self, id: &str) -> Result<Warehouse, PipelineError> {
        self.process_with(id, None).await
    }

    /// Run the pipeline for a `Pending` warehouse.
    ///
    /// Returns the warehouse in its terminal state (`Completed` or `Failed`).
    /// An `Err` means the run never started: unknown id, the warehouse was
    /// not `Pending`, or the store was unreachable.
    pub async fn process_with(
        &self,
        id: &str,
        credentials: Option<Credentials>,
    ) -> Result<Warehouse, PipelineError> {
        let warehouse = self.lifecycle.get(id).await?;
        let token = self.cancel_token(id);

        let lock = self.locks.run_lock(&warehouse.address);
        let result: Result<Warehouse, PipelineError> = async {
            let _run = lock.lock().await;
            self.lifecycle
                .advance(id, WarehouseStatus::Processing, None, None)
                .await?;
            // Re-read: a resubmission may have landed while we waited.
            let started = self.lifecycle.get(id).await?;

            let repo = format!("{}/{}", started.organization_name, started.name);
            let span = tracing::info_span!("process", warehouse = %id, repo = %repo);
            self.run_to_end(&started, credentials, &token)
                .instrument(span)
                .await
        }
        .await;

        self.release_token(id);
        result
    }

    /// Re-queue a finished (or stale) warehouse so it can be processed again.
    pub async fn requeue(&self, id: &str) -> Result<Warehouse, PipelineError> {
        let warehouse = self.lifecycle.get(id).await?;
        let lock = self.locks.run_lock(&warehouse.address);
        let _run = lock.lock().await;

        let current = self.lifecycle.get(id).await?;
        if current.status == WarehouseStatus::Pending {
            return Ok(current);
        }
        self.lifecycle
            .advance(id, WarehouseStatus::Pending, None, None)
            .await
    }

    /// Ask an active or waiting run for `id` to stop at its next checkpoint.
    ///
    /// Returns `false` when no run is registered for the warehouse.
    pub fn cancel(&self, id: &str) -> bool {
        let map = self
            .cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match map.get(id) {
            Some(entry) => {
                entry.token.store(true, Ordering::SeqCst);
                tracing::info!(warehouse = %id, runs = entry.runs, "cancellation requested");
                true
            }
            None => false,
        }
    }

    fn cancel_token(&self, id: &str) -> Arc<AtomicBool> {
        let mut map = self
            .cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = map.entry(id.to_string()).or_default();
        entry.runs += 1;
        entry.token.clone()
    }

    fn release_token(&self, id: &str) {
        let mut map = self
            .cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = map.get_mut(id) {
            entry.runs = entry.runs.saturating_sub(1);
            if entry.runs == 0 {
                map.remove(id);
            }
        }
    }

    async fn run_to_end(
        &self,
        warehouse: &Warehouse,
        credentials: Option<Credentials>,
        token: &AtomicBool,
    ) -> Result<Warehouse, PipelineError> {
        let label = format!("{}/{}", warehouse.organization_name, warehouse.name);

        match self.run(warehouse, credentials, token, &label).await {
            Ok(done) => {
                tracing::info!(version = %done.version, "run completed");
                self.reporter.report(PipelineProgressEvent::Finished {
                    warehouse: label,
                    status: done.status,
                    detail: done.version.clone(),
                });
                Ok(done)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %message, "run failed");
                let failed = self
                    .lifecycle
                    .advance(&warehouse.id, WarehouseStatus::Failed, None, Some(&message))
                    .await?;
                self.reporter.report(PipelineProgressEvent::Finished {
                    warehouse: label,
                    status: failed.status,
                    detail: message,
                });
                Ok(failed)
            }
        }
    }

    async fn step(
        &self,
        id: &str,
        label: &str,
        step: PipelineStep,
        percent: u8,
    ) -> Result<(), PipelineError> {
        self.lifecycle.report_progress(id, percent).await?;
        self.reporter.report(PipelineProgressEvent::Step {
            warehouse: label.to_string(),
            step,
            percent,
        });
        Ok(())
    }

    async fn run(
        &self,
        warehouse: &Warehouse,
        credentials: Option<Credentials>,
        token: &AtomicBool,
        label: &str,
    ) -> Result<Warehouse, PipelineError> {
        let id = warehouse.id.as_str();
        let reference = warehouse.reference().with_credentials(credentials);
        let location = resolve(&reference, &self.cache_root)?;

        checkpoint(token, "synchronization")?;
        let snapshot = self.synchronizer.synchronize(&reference, &location).await?;
        tracing::info!(
            branch = %snapshot.branch_name,
            head = %snapshot.head_commit_id,
            "repository synchronized"
        );
        self.step(id, label, PipelineStep::Synchronized, SYNCHRONIZED_PERCENT)
            .await?;

        checkpoint(token, "change detection")?;
        let last_record = self.store().get_commit_record(id).await?;
        let changes = self
            .detector
            .detect(warehouse, &snapshot, last_record, &location)
            .await?;
        tracing::info!(decision = %changes.describe(), "change detection finished");
        self.step(id, label, PipelineStep::ChangesDetected, CHANGES_DETECTED_PERCENT)
            .await?;

        if !changes.requires_processing() {
            return self.lifecycle.complete(id, &snapshot.head_commit_id).await;
        }

        checkpoint(token, "catalogue structuring")?;
        let model = Some(warehouse.model.as_str()).filter(|m| !m.trim().is_empty());
        let generators = self
            .generation
            .generators(model)
            .map_err(|e| PipelineError::generation(None, format!("{:#}", e)))?;

        let inputs = self.read_inputs(&location).await?;
        let catalogue = generators
            .catalogue
            .structure(&inputs.readme, &inputs.file_tree)
            .await
            .map_err(|e| PipelineError::generation(Some("catalogue"), format!("{:#}", e)))?;
        tracing::info!(sections = catalogue.len(), "catalogue structured");
        self.step(id, label, PipelineStep::CatalogueReady, CATALOGUE_READY_PERCENT)
            .await?;

        let access = RepoFileAccess::new(
            location.local_path.clone(),
            self.locks.cache_lock(&location.cache_key()),
        );
        let entries = catalogue.entries();
        let total = entries.len();
        let mut documents = Vec::with_capacity(total);

        for (i, entry) in entries.iter().enumerate() {
            checkpoint(token, &format!("section '{}'", entry.path))?;

            let mut content = generators
                .synthesizer
                .synthesize(entry, &catalogue, &access)
                .await
                .map_err(|e| PipelineError::generation(Some(&entry.path), format!("{:#}", e)))?;
            if content.trim().is_empty() {
                return Err(PipelineError::generation(Some(&entry.path), "empty document"));
            }

            let skipped = access.take_failures();
            if !skipped.is_empty() {
                tracing::warn!(section = %entry.path, skipped = skipped.len(), "document written without some files");
                content.push_str(&skipped_note(&skipped));
            }

            documents.push(GeneratedDocument {
                warehouse_id: id.to_string(),
                path: entry.path.clone(),
                name: entry.node.name.clone(),
                prompt: entry.node.prompt.clone(),
                content,
                generated_at: Utc::now(),
            });

            let percent = document_percent(i + 1, total);
            self.lifecycle.report_progress(id, percent).await?;
            self.reporter.report(PipelineProgressEvent::Document {
                warehouse: label.to_string(),
                path: entry.path.clone(),
                n: (i + 1) as u64,
                total: total as u64,
                percent,
            });
        }

        checkpoint(token, "storing documents")?;
        self.store().replace_documents(id, &documents).await?;
        self.store()
            .put_commit_record(&DocumentCommitRecord {
                warehouse_id: id.to_string(),
                commit_id: snapshot.head_commit_id.clone(),
                commit_message: snapshot.commit_message.clone(),
                author: snapshot.commit_author.clone(),
                processed_at: Utc::now(),
                changes: changes.commits().to_vec(),
            })
            .await?;

        self.lifecycle.complete(id, &snapshot.head_commit_id).await
    }

    /// README and file tree, read under the cache read lock.
    async fn read_inputs(
        &self,
        location: &ResolvedLocation,
    ) -> Result<RepositoryInputs, PipelineError> {
        let lock = self.locks.cache_lock(&location.cache_key());
        let _guard = lock.read().await;

        let root = location.local_path.clone();
        let excludes = self.excludes.clone();
        let max_entries = self.max_tree_entries;

        tokio::task::spawn_blocking(move || -> Result<RepositoryInputs> {
            let readme = repo_files::read_readme(&root)?;
            let files = repo_files::list_files(&root, &excludes)?;
            Ok(RepositoryInputs {
                readme,
                file_tree: repo_files::render_tree(&files, max_entries),
            })
        })
        .await
        .map_err(|e| PipelineError::generation(None, format!("input task aborted: {}", e)))?
        .map_err(|e| PipelineError::generation(None, format!("cannot read repository inputs: {:#}", e)))
    }
}

fn checkpoint(token: &AtomicBool, before: &str) -> Result<(), PipelineError> {
    if token.load(Ordering::SeqCst) {
        return Err(PipelineError::Cancelled(format!("run stopped before {}", before)));
    }
    Ok(())
}
