//! Read-only access to a synchronized working copy.
//!
//! Provides the inputs catalogue structuring needs (README text and a file
//! tree listing) and [`RepoFileAccess`], the path-scoped reader handed to
//! document synthesis. Every read holds the cache key's read lock so it can
//! never observe a half-written synchronization.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::generation::FileAccess;

/// Largest file handed to synthesis.
pub const MAX_FILE_BYTES: u64 = 512 * 1024;

const README_NAMES: &[&str] = &["readme.md", "readme.markdown", "readme.rst", "readme.txt", "readme"];

/// Locate the top-level README, matching names case-insensitively.
pub fn find_readme(root: &Path) -> Result<Option<PathBuf>> {
    let mut found: Vec<(usize, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("Failed to list {}", root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if let Some(rank) = README_NAMES.iter().position(|n| *n == name) {
            found.push((rank, entry.path()));
        }
    }
    found.sort();
    Ok(found.into_iter().next().map(|(_, p)| p))
}

/// README text of the working copy. A missing README is an empty string;
/// one that exists but cannot be read is an error.
pub fn read_readme(root: &Path) -> Result<String> {
    match find_readme(root)? {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(String::new()),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Exclusion set: `.git`, `target`, `node_modules`, plus `extra`.
pub fn exclude_set(extra: &[String]) -> Result<GlobSet> {
    let mut patterns = vec![
        "**/.git/**".to_string(),
        ".git/**".to_string(),
        "**/target/**".to_string(),
        "target/**".to_string(),
        "**/node_modules/**".to_string(),
        "node_modules/**".to_string(),
    ];
    patterns.extend(extra.iter().cloned());
    build_globset(&patterns)
}

/// Sorted, `/`-separated relative paths of every file not excluded.
pub fn list_files(root: &Path, excludes: &GlobSet) -> Result<Vec<String>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if excludes.is_match(&rel_str) {
            continue;
        }
        files.push(rel_str);
    }

    files.sort();
    Ok(files)
}

/// One path per line, capped at `max_entries`.
pub fn render_tree(files: &[String], max_entries: usize) -> String {
    let mut out = files
        .iter()
        .take(max_entries)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if files.len() > max_entries {
        out.push_str(&format!("\n... ({} more files)", files.len() - max_entries));
    }
    out
}

/// Map a caller-supplied relative path onto `root`, refusing anything that
/// could leave it.
pub fn scoped_path(root: &Path, requested: &str) -> Result<PathBuf> {
    let requested = requested.trim().trim_start_matches("./");
    if requested.is_empty() {
        bail!("empty path");
    }
    let relative = Path::new(requested);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("path '{}' escapes the repository", requested),
        }
    }
    if relative.components().any(|c| c.as_os_str() == ".git") {
        bail!("path '{}' is inside .git", requested);
    }

    let joined = root.join(relative);
    let canonical_root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    let canonical = joined
        .canonicalize()
        .with_context(|| format!("no such file: {}", requested))?;
    if !canonical.starts_with(&canonical_root) {
        bail!("path '{}' escapes the repository", requested);
    }
    Ok(canonical)
}

/// Path-scoped reader over one working copy.
///
/// Failed reads are remembered so the caller can list what a document had
/// to do without.
pub struct RepoFileAccess {
    root: PathBuf,
    cache_lock: Arc<RwLock<()>>,
    failures: Mutex<Vec<String>>,
}

impl RepoFileAccess {
    pub fn new(root: PathBuf, cache_lock: Arc<RwLock<()>>) -> Self {
        Self {
            root,
            cache_lock,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Drain the paths whose reads failed since the last call.
    pub fn take_failures(&self) -> Vec<String> {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *failures)
    }

    fn note_failure(&self, path: &str) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !failures.iter().any(|p| p == path) {
            failures.push(path.to_string());
        }
    }

    async fn read_scoped(&self, path: &str) -> Result<String> {
        let _guard = self.cache_lock.read().await;
        let full = scoped_path(&self.root, path)?;
        let meta = tokio::fs::metadata(&full).await?;
        if !meta.is_file() {
            bail!("'{}' is not a file", path);
        }
        if meta.len() > MAX_FILE_BYTES {
            bail!("'{}' is larger than {} bytes", path, MAX_FILE_BYTES);
        }
        let bytes = tokio::fs::read(&full).await?;
        String::from_utf8(bytes).with_context(|| format!("'{}' is not valid UTF-8", path))
    }
}

#[async_trait]
impl FileAccess for RepoFileAccess {
    async fn read_file(&self, path: &str) -> Result<String> {
        match self.read_scoped(path).await {
            Ok(content) => Ok(content),
            Err(e) => {
                tracing::warn!(path, error = %e, "file read failed during synthesis");
                self.note_failure(path);
                Err(e)
            }
        }
    }
}
