//! End-to-end pipeline runs against a real SQLite store and real git
//! working copies, with in-process generators standing in for the model.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use repo_warehouse::config::Config;
use repo_warehouse::coordinator::PipelineCoordinator;
use repo_warehouse::generation::{
    CatalogueGenerator, DocumentSynthesizer, FileAccess, GeneratorFactory, Generators,
};
use repo_warehouse::lifecycle::SubmitOptions;
use repo_warehouse::service::{Reply, WarehouseService};
use repo_warehouse::sqlite_store::SqliteStore;
use repo_warehouse::{db, git, migrate};
use repo_warehouse_core::catalogue::{Catalogue, CatalogueEntry, CatalogueNode};
use repo_warehouse_core::lifecycle::plan_transition;
use repo_warehouse_core::models::{
    ReferenceKind, RepositoryReference, WarehouseStatus, NO_VERSION, PLACEHOLDER_VERSION,
};
use repo_warehouse_core::store::WarehouseStore;

// ============ Fixtures ============

fn git_in(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// A plain directory with a README and a couple of sources.
fn plain_source(root: &Path) -> PathBuf {
    let dir = root.join("sources").join("plainproj");
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(dir.join("README.md"), "# Plain project\n\nA tiny fixture.").unwrap();
    fs::write(dir.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    dir
}

/// A git repository on branch `develop` with one commit.
fn versioned_source(root: &Path) -> PathBuf {
    let dir = root.join("sources").join("gitproj");
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(dir.join("README.md"), "# Git project").unwrap();
    fs::write(dir.join("src/main.rs"), "fn main() {}\n").unwrap();
    git_in(&dir, &["init", "--quiet"]);
    git_in(&dir, &["symbolic-ref", "HEAD", "refs/heads/develop"]);
    git_in(&dir, &["add", "."]);
    git_in(&dir, &["commit", "--quiet", "-m", "initial import"]);
    dir
}

fn commit_file(repo: &Path, file: &str, content: &str, message: &str) -> String {
    fs::write(repo.join(file), content).unwrap();
    git_in(repo, &["add", "."]);
    git_in(repo, &["commit", "--quiet", "-m", message]);
    git_in(repo, &["rev-parse", "HEAD"])
}

/// Two-section outline; every document body names its section.
struct FakeCatalogue;

#[async_trait]
impl CatalogueGenerator for FakeCatalogue {
    async fn structure(&self, readme: &str, file_tree: &str) -> Result<Catalogue> {
        assert!(file_tree.contains("README.md"));
        let node = |title: &str| CatalogueNode {
            title: title.to_string(),
            name: title.to_uppercase(),
            prompt: format!("Describe {}", title),
            children: Vec::new(),
        };
        let mut overview = node("overview");
        overview.prompt = readme.lines().next().unwrap_or_default().to_string();
        overview.children.push(node("usage"));
        Ok(Catalogue {
            items: vec![overview, node("internals")],
        })
    }
}

#[derive(Default)]
struct FakeSynthesizer {
    calls: AtomicUsize,
    /// Relative path read for every section, if any.
    read: Option<String>,
    /// Cancel this run after the first section.
    cancel: OnceLock<(Arc<PipelineCoordinator>, String)>,
    /// Hold the first section until notified.
    gate: Option<Arc<Notify>>,
    /// Notified when the first section starts.
    entered: Notify,
    /// Answer every section with whitespace only.
    blank: bool,
}

#[async_trait]
impl DocumentSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        entry: &CatalogueEntry<'_>,
        _catalogue: &Catalogue,
        files: &dyn FileAccess,
    ) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
        if self.blank {
            return Ok(" \n".to_string());
        }
        let mut body = format!("Section {}", entry.path);
        if let Some(path) = &self.read {
            if let Ok(content) = files.read_file(path).await {
                body.push_str(&format!("\n\n{}", content));
            }
        }
        if let Some((coordinator, id)) = self.cancel.get() {
            coordinator.cancel(id);
        }
        Ok(body)
    }
}

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    store: Arc<SqliteStore>,
    synthesizer: Arc<FakeSynthesizer>,
    coordinator: Arc<PipelineCoordinator>,
}

async fn harness_with(configure: impl FnOnce(&mut Config), synthesizer: FakeSynthesizer) -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let mut config = Config::minimal(&root.join("data"));
    configure(&mut config);

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));

    let synthesizer = Arc::new(synthesizer);
    let generators = Generators {
        catalogue: Arc::new(FakeCatalogue),
        synthesizer: synthesizer.clone(),
    };
    let factory: Arc<dyn GeneratorFactory> = Arc::new(generators);
    let coordinator =
        Arc::new(PipelineCoordinator::new(&config, store.clone(), factory).unwrap());

    Harness {
        _tmp: tmp,
        root,
        store,
        synthesizer,
        coordinator,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}, FakeSynthesizer::default()).await
}

async fn submit(h: &Harness, reference: RepositoryReference) -> String {
    h.coordinator
        .lifecycle()
        .submit(&reference, &SubmitOptions::default())
        .await
        .unwrap()
        .id
}

// ============ Submission ============

#[tokio::test]
async fn resubmitting_an_address_keeps_one_warehouse() {
    let h = harness().await;
    let first = submit(&h, RepositoryReference::remote("https://example.com/acme/widgets")).await;
    let second = submit(
        &h,
        RepositoryReference::remote("https://example.com/acme/widgets.git")
            .with_branch(Some("release".into())),
    )
    .await;

    assert_eq!(first, second);
    let (total, items) = h.store.list_warehouses(0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].branch.as_deref(), Some("release"));
    assert_eq!(items[0].version, PLACEHOLDER_VERSION);
    assert_eq!(items[0].organization_name, "acme");
}

#[tokio::test]
async fn malformed_remote_is_rejected_before_any_write() {
    let h = harness().await;
    let err = h
        .coordinator
        .lifecycle()
        .submit(
            &RepositoryReference::remote("https://example.com/only-one"),
            &SubmitOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("malformed"));
    assert_eq!(h.store.list_warehouses(0, 10).await.unwrap().0, 0);
}

// ============ Processing ============

#[tokio::test]
async fn plain_directory_is_mirrored_and_documented() {
    let h = harness().await;
    let source = plain_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;

    let done = h.coordinator.process(&id).await.unwrap();
    assert_eq!(done.status, WarehouseStatus::Completed, "error: {}", done.error);
    assert_eq!(done.progress, 100);
    assert_eq!(done.version, NO_VERSION);

    let mirror = h.root.join("data/repositories/sources/plainproj");
    assert!(git::is_git_repo(&mirror));
    assert!(mirror.join("src/lib.rs").exists());

    let docs = h.store.list_documents(&id).await.unwrap();
    let paths: Vec<_> = docs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, vec!["overview", "overview/usage", "internals"]);
    assert_eq!(docs[0].prompt, "# Plain project");

    let record = h.store.get_commit_record(&id).await.unwrap().unwrap();
    assert_eq!(record.commit_id, NO_VERSION);
}

#[tokio::test]
async fn unchanged_plain_directory_is_up_to_date() {
    let h = harness().await;
    let source = plain_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;
    h.coordinator.process(&id).await.unwrap();
    let calls = h.synthesizer.calls.load(Ordering::SeqCst);

    h.coordinator.requeue(&id).await.unwrap();
    let again = h.coordinator.process(&id).await.unwrap();

    assert_eq!(again.status, WarehouseStatus::Completed);
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.store.list_documents(&id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn unreachable_remote_fails_without_progress() {
    let h = harness().await;
    let id = submit(
        &h,
        RepositoryReference::remote("file:///nonexistent/org/repo.git"),
    )
    .await;

    let done = h.coordinator.process(&id).await.unwrap();
    assert_eq!(done.status, WarehouseStatus::Failed);
    assert_eq!(done.progress, 0);
    assert!(done.error.contains("failed to synchronize"), "error: {}", done.error);
    assert!(h.store.get_commit_record(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn processing_twice_without_requeue_is_rejected() {
    let h = harness().await;
    let source = plain_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;
    h.coordinator.process(&id).await.unwrap();

    let err = h.coordinator.process(&id).await.unwrap_err();
    assert!(err.to_string().contains("invalid transition"));
}

#[tokio::test]
async fn versioned_directory_keeps_branch_and_head() {
    let h = harness().await;
    let source = versioned_source(&h.root);
    let head = git_in(&source, &["rev-parse", "HEAD"]);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;

    let done = h.coordinator.process(&id).await.unwrap();
    assert_eq!(done.status, WarehouseStatus::Completed, "error: {}", done.error);
    assert_eq!(done.version, head);

    let mirror = h.root.join("data/repositories/sources/gitproj");
    assert_eq!(git::current_branch(&mirror).unwrap().as_deref(), Some("develop"));
    assert_eq!(git::head_commit(&mirror).unwrap().unwrap().id, head);

    let record = h.store.get_commit_record(&id).await.unwrap().unwrap();
    assert_eq!(record.commit_message, "initial import");
    assert_eq!(record.author, "Fixture");
}

#[tokio::test]
async fn new_commits_are_reported_incrementally() {
    let h = harness().await;
    let source = versioned_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;
    h.coordinator.process(&id).await.unwrap();

    let second = commit_file(&source, "CHANGELOG.md", "- more\n", "add changelog");
    h.coordinator.requeue(&id).await.unwrap();
    let done = h.coordinator.process(&id).await.unwrap();

    assert_eq!(done.status, WarehouseStatus::Completed, "error: {}", done.error);
    assert_eq!(done.version, second);
    let record = h.store.get_commit_record(&id).await.unwrap().unwrap();
    assert_eq!(record.commit_id, second);
    assert_eq!(record.changes.len(), 1);
    assert_eq!(record.changes[0].summary, "add changelog");
}

#[tokio::test]
async fn path_submitted_as_git_is_mirrored_as_a_directory() {
    let h = harness().await;
    let source = versioned_source(&h.root);
    let head = git_in(&source, &["rev-parse", "HEAD"]);
    let address = source.display().to_string();

    let submitted = h
        .coordinator
        .lifecycle()
        .submit(&RepositoryReference::remote(&address), &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(submitted.address, address);
    assert_eq!(submitted.kind, ReferenceKind::Local);
    assert_eq!((submitted.organization_name.as_str(), submitted.name.as_str()), ("sources", "gitproj"));

    let done = h.coordinator.process(&submitted.id).await.unwrap();
    assert_eq!(done.status, WarehouseStatus::Completed, "error: {}", done.error);
    assert_eq!(done.version, head);

    let again = submit(&h, RepositoryReference::local(&address)).await;
    assert_eq!(again, submitted.id);
}

#[tokio::test]
async fn blank_document_fails_the_run() {
    let synthesizer = FakeSynthesizer {
        blank: true,
        ..Default::default()
    };
    let h = harness_with(|_| {}, synthesizer).await;
    let source = plain_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;

    let done = h.coordinator.process(&id).await.unwrap();
    assert_eq!(done.status, WarehouseStatus::Failed);
    assert_eq!(
        done.error,
        "generation failed for section 'overview': empty document"
    );
    assert!(h.store.list_documents(&id).await.unwrap().is_empty());
    assert!(h.store.get_commit_record(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn unreadable_files_are_noted_in_the_document() {
    let synthesizer = FakeSynthesizer {
        read: Some("does/not/exist.rs".to_string()),
        ..Default::default()
    };
    let h = harness_with(|_| {}, synthesizer).await;
    let source = plain_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;

    let done = h.coordinator.process(&id).await.unwrap();
    assert_eq!(done.status, WarehouseStatus::Completed, "error: {}", done.error);
    let docs = h.store.list_documents(&id).await.unwrap();
    assert!(docs
        .iter()
        .all(|d| d.content.contains("Skipped (unreadable):\n- does/not/exist.rs")));
}

#[tokio::test]
async fn cancelled_run_ends_failed_and_keeps_old_documents() {
    let h = harness().await;
    let source = plain_source(&h.root);
    let id = submit(&h, RepositoryReference::local(source.display().to_string())).await;

    h.synthesizer
        .cancel
        .set((h.coordinator.clone(), id.clone()))
        .ok()
        .unwrap();
    let done = h.coordinator.process(&id).await.unwrap();

    assert_eq!(done.status, WarehouseStatus::Failed);
    assert!(done.error.starts_with("cancelled:"), "error: {}", done.error);
    assert!(done.progress < 100);
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), 1);
    assert!(h.store.list_documents(&id).await.unwrap().is_empty());
    assert!(h.store.get_commit_record(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn resubmission_waits_for_the_running_pipeline() {
    let gate = Arc::new(Notify::new());
    let synthesizer = FakeSynthesizer {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let h = harness_with(|_| {}, synthesizer).await;
    let source = plain_source(&h.root);
    let address = source.display().to_string();
    let id = submit(&h, RepositoryReference::local(&address)).await;

    let coordinator = h.coordinator.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { coordinator.process(&run_id).await });
    h.synthesizer.entered.notified().await;

    let lifecycle = h.coordinator.lifecycle().clone();
    let resubmit = tokio::spawn(async move {
        let options = SubmitOptions {
            description: Some("updated".to_string()),
            ..Default::default()
        };
        lifecycle
            .submit(&RepositoryReference::local(address), &options)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!resubmit.is_finished());
    let mid_run = h.store.get_warehouse(&id).await.unwrap().unwrap();
    assert_eq!(mid_run.status, WarehouseStatus::Processing);
    assert_ne!(mid_run.description, "updated");

    gate.notify_one();
    let done = run.await.unwrap().unwrap();
    assert_eq!(done.status, WarehouseStatus::Completed, "error: {}", done.error);

    let resubmitted = resubmit.await.unwrap().unwrap();
    assert_eq!(resubmitted.id, id);
    let stored = h.store.get_warehouse(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, WarehouseStatus::Pending);
    assert_eq!(stored.progress, 0);
    assert_eq!(stored.description, "updated");
    assert_eq!(stored.version, NO_VERSION);
}

#[tokio::test]
async fn cancel_without_a_run_reports_false() {
    let h = harness().await;
    assert!(!h.coordinator.cancel("no-such-run"));
}

// ============ Store ============

#[tokio::test]
async fn status_writes_are_compare_and_set() {
    let h = harness().await;
    let id = submit(&h, RepositoryReference::remote("https://example.com/acme/cas")).await;
    let current = h.store.get_warehouse(&id).await.unwrap().unwrap();
    let change = plan_transition(&current, WarehouseStatus::Processing, None, None).unwrap();

    assert!(h
        .store
        .apply_status(&id, WarehouseStatus::Pending, &change)
        .await
        .unwrap());
    assert!(!h
        .store
        .apply_status(&id, WarehouseStatus::Pending, &change)
        .await
        .unwrap());

    assert!(h.store.set_progress(&id, 30).await.unwrap());
    assert!(!h.store.set_progress(&id, 20).await.unwrap());
    assert_eq!(h.store.get_warehouse(&id).await.unwrap().unwrap().progress, 30);
}

// ============ Service ============

#[tokio::test]
async fn service_replies_serialize_for_callers() {
    let h = harness().await;
    let service = WarehouseService::new(h.coordinator.clone());
    let source = plain_source(&h.root);
    let address = source.display().to_string();

    let submitted = service
        .submit_warehouse(&RepositoryReference::local(&address), &SubmitOptions::default())
        .await
        .ok()
        .unwrap();
    assert_eq!(submitted.organization, "sources");
    assert_eq!(submitted.name, "plainproj");

    let status = service.get_warehouse_status(&address).await.ok().unwrap();
    assert_eq!(status.id, submitted.id);
    assert_eq!(status.status, WarehouseStatus::Pending);

    let missing = service.get_change_log("nobody", "nothing").await;
    assert_eq!(
        serde_json::to_value(&missing).unwrap(),
        serde_json::json!({ "not_found": "warehouse nobody/nothing" })
    );

    match service.get_change_log("sources", "plainproj").await {
        Reply::Ok(record) => assert!(record.is_none()),
        other => panic!("unexpected reply: {:?}", other),
    }

    let page = service.list_warehouses(0, 1000).await.ok().unwrap();
    assert_eq!((page.page, page.page_size, page.total), (1, 100, 1));
}
