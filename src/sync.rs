//! Repository synchronization into the on-disk cache.
//!
//! [`RepositorySynchronizer::synchronize`] brings the working copy for a
//! reference up to date and reports the commit it ended on:
//!
//! | Source | Destination | Action |
//! |--------|-------------|--------|
//! | local, git | absent / incomplete | copy tree (no `.git`), `git init`, import source history |
//! | local, plain | absent / incomplete | copy tree, `git init` |
//! | local, git | complete | reuse while branch and head match the source, else re-mirror |
//! | local, plain | complete | reuse (re-mirror on fingerprint change with `refresh_local`) |
//! | remote | absent / incomplete | full-depth clone |
//! | remote | complete | open (`pinned`) or fetch + hard reset (`pull`) |
//!
//! A completion marker (`<cache>/.sync-state/<org>/<repo>.json`) is written
//! only after a copy or clone finishes. A destination without one is the
//! leftover of an interrupted run and is wiped and rebuilt. The marker also
//! names the source that filled the directory; two sources that resolve to
//! the same cache key replace each other's working copy instead of sharing it.
//!
//! All filesystem and git work runs on the blocking pool while the cache
//! key's write lock is held.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use repo_warehouse_core::models::{
    RepositoryReference, RepositorySnapshot, ResolvedLocation, DEFAULT_BRANCH, NO_VERSION,
};
use repo_warehouse_core::PipelineError;

use crate::config::{Config, RemoteRefresh};
use crate::git;
use crate::locks::LockRegistry;
use crate::trust::{self, Transport, TrustPolicy};

const STATE_DIR: &str = ".sync-state";

/// Written next to the cache tree once a working copy is complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMarker {
    pub source: String,
    /// Tree fingerprint of a local source at copy time.
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub head: String,
}

pub struct RepositorySynchronizer {
    cache_root: PathBuf,
    trust: Arc<dyn TrustPolicy>,
    remote_refresh: RemoteRefresh,
    refresh_local: bool,
    locks: Arc<LockRegistry>,
}

impl RepositorySynchronizer {
    pub fn new(config: &Config, locks: Arc<LockRegistry>) -> Self {
        Self {
            cache_root: config.cache.root.clone(),
            trust: trust::from_setting(&config.sync.trust),
            remote_refresh: config.sync.remote_refresh,
            refresh_local: config.sync.refresh_local,
            locks,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Bring `location` in line with `reference` and return its head.
    pub async fn synchronize(
        &self,
        reference: &RepositoryReference,
        location: &ResolvedLocation,
    ) -> Result<RepositorySnapshot, PipelineError> {
        let lock = self.locks.cache_lock(&location.cache_key());
        let _guard = lock.write().await;

        let job = SyncJob {
            reference: reference.clone(),
            location: location.clone(),
            marker_path: marker_path(&self.cache_root, location),
            transport: Transport::new(self.trust.clone())
                .with_credentials(reference.credentials.clone()),
            remote_refresh: self.remote_refresh,
            refresh_local: self.refresh_local,
        };

        let address = reference.address.clone();
        let result = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| PipelineError::Synchronization {
                address: address.clone(),
                cause: format!("synchronization task aborted: {}", e),
            })?;

        result.map_err(|e| PipelineError::Synchronization {
            address,
            cause: format!("{:#}", e),
        })
    }
}

/// Where the completion marker for `location` lives.
pub fn marker_path(cache_root: &Path, location: &ResolvedLocation) -> PathBuf {
    cache_root
        .join(STATE_DIR)
        .join(&location.organization)
        .join(format!("{}.json", location.repository_name))
}

pub fn read_marker(path: &Path) -> Option<SyncMarker> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_marker(path: &Path, marker: &SyncMarker) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(marker)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write sync marker: {}", path.display()))
}

struct SyncJob {
    reference: RepositoryReference,
    location: ResolvedLocation,
    marker_path: PathBuf,
    transport: Transport,
    remote_refresh: RemoteRefresh,
    refresh_local: bool,
}

impl SyncJob {
    fn run(&self) -> Result<RepositorySnapshot> {
        if self.reference.is_local() {
            self.sync_local()
        } else {
            self.sync_remote()
        }
    }

    fn dest(&self) -> &Path {
        &self.location.local_path
    }

    /// The marker, if the destination is a complete, openable working copy.
    fn completed(&self) -> Option<SyncMarker> {
        let marker = read_marker(&self.marker_path)?;
        if git::is_openable(self.dest()) {
            Some(marker)
        } else {
            None
        }
    }

    fn wipe(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.marker_path);
        let dest = self.dest();
        if dest.exists() {
            tracing::info!(path = %dest.display(), "removing incomplete working copy");
            std::fs::remove_dir_all(dest)
                .with_context(|| format!("Failed to remove {}", dest.display()))?;
        }
        Ok(())
    }

    fn finish(&self, source: &str, fingerprint: Option<String>) -> Result<RepositorySnapshot> {
        let snapshot = read_snapshot(self.dest())?;
        write_marker(
            &self.marker_path,
            &SyncMarker {
                source: source.to_string(),
                fingerprint,
                completed_at: Utc::now(),
                head: snapshot.head_commit_id.clone(),
            },
        )?;
        Ok(snapshot)
    }

    fn sync_remote(&self) -> Result<RepositorySnapshot> {
        let address = self.reference.address.trim();
        let requested = self.reference.branch.as_deref();

        if let Some(marker) = self.completed() {
            let current = git::current_branch(self.dest())?;
            let switched = matches!((requested, current.as_deref()), (Some(r), Some(c)) if r != c);

            if marker.source != address {
                tracing::warn!(
                    cached = %marker.source,
                    address,
                    "cache directory was cloned from another remote, re-cloning"
                );
            } else if switched {
                tracing::info!(branch = ?requested, "requested branch changed, re-cloning");
            } else if self.remote_refresh == RemoteRefresh::Pull {
                let branch = requested
                    .map(str::to_string)
                    .or(current)
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
                tracing::info!(branch = %branch, "refreshing working copy from origin");
                git::fetch_and_reset(self.dest(), &branch, &self.transport)?;
                return self.finish(address, None);
            } else {
                return read_snapshot(self.dest());
            }
        }

        self.wipe()?;
        tracing::info!(
            address,
            trust = self.transport.policy_name(),
            "cloning repository"
        );
        git::clone(address, requested, self.dest(), &self.transport)?;
        self.finish(address, None)
    }

    fn sync_local(&self) -> Result<RepositorySnapshot> {
        let source = absolute(Path::new(self.reference.address.trim()))?;
        if !source.is_dir() {
            bail!("local source '{}' is not a directory", source.display());
        }
        let versioned = git::is_git_repo(&source);

        if let Some(marker) = self.completed() {
            match self.local_change(&marker, &source, versioned)? {
                None => return read_snapshot(self.dest()),
                Some(reason) => {
                    tracing::info!(source = %source.display(), reason, "re-mirroring local source")
                }
            }
        }

        self.wipe()?;
        tracing::info!(source = %source.display(), versioned, "mirroring local source");
        let fingerprint = fingerprint_tree(&source)?;
        copy_dir_recursive(&source, self.dest())?;

        if versioned {
            let branch =
                git::current_branch(&source)?.unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            git::init(self.dest(), &branch)?;
            if git::head_commit(&source)?.is_some() {
                git::fetch_local_history(self.dest(), &source, &branch)?;
            }
        } else {
            git::init(self.dest(), DEFAULT_BRANCH)?;
        }

        self.finish(&source.to_string_lossy(), Some(fingerprint))
    }

    /// Why a complete mirror of `source` no longer matches it, if it doesn't.
    ///
    /// A versioned source is compared by branch and head on every run; the
    /// content fingerprint is only consulted with `refresh_local`.
    fn local_change(
        &self,
        marker: &SyncMarker,
        source: &Path,
        versioned: bool,
    ) -> Result<Option<&'static str>> {
        if marker.source != source.to_string_lossy() {
            return Ok(Some("cache directory was mirrored from another source"));
        }

        if versioned {
            let head = git::head_commit(source)?
                .map(|h| h.id)
                .unwrap_or_else(|| NO_VERSION.to_string());
            if head != marker.head {
                return Ok(Some("source head moved"));
            }
            let branch =
                git::current_branch(source)?.unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            if git::current_branch(self.dest())?.as_deref() != Some(branch.as_str()) {
                return Ok(Some("source branch changed"));
            }
        }

        if self.refresh_local
            && marker.fingerprint.as_deref() != Some(fingerprint_tree(source)?.as_str())
        {
            return Ok(Some("source content changed"));
        }
        Ok(None)
    }
}

/// Branch and head of the working copy at `dir`.
pub fn read_snapshot(dir: &Path) -> Result<RepositorySnapshot> {
    let branch = git::current_branch(dir)?.unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    Ok(match git::head_commit(dir)? {
        Some(head) => RepositorySnapshot {
            branch_name: branch,
            head_commit_id: head.id,
            commit_timestamp: head.timestamp,
            commit_author: head.author,
            commit_message: head.message,
        },
        None => RepositorySnapshot::without_history(branch),
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

/// Copy `src` into `dst`, skipping any `.git` directory.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create {}", dst.display()))?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_file() {
        std::fs::copy(src, dst)?;
    }
    Ok(())
}

/// SHA-256 over relative path, size and mtime of every file outside
/// `.git`, plus the source head when it is a repository.
pub fn fingerprint_tree(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    let mut entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .collect::<Result<_, walkdir::Error>>()?;
    entries.retain(|e| !e.file_type().is_dir());

    for entry in entries {
        let relative = entry.path().strip_prefix(root)?;
        let meta = entry.metadata()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
    }

    if git::is_git_repo(root) {
        if let Some(head) = git::head_commit(root)? {
            hasher.update(head.id.as_bytes());
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_skips_git_directory() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join(".git/objects")).unwrap();
        std::fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        std::fs::create_dir_all(src.path().join("src")).unwrap();
        std::fs::write(src.path().join("src/lib.rs"), "pub fn a() {}").unwrap();
        std::fs::write(src.path().join("README.md"), "# demo").unwrap();

        let dst = TempDir::new().unwrap();
        let target = dst.path().join("mirror");
        copy_dir_recursive(src.path(), &target).unwrap();

        assert!(target.join("src/lib.rs").exists());
        assert!(target.join("README.md").exists());
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn fingerprint_tracks_content_changes() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "one").unwrap();
        let before = fingerprint_tree(src.path()).unwrap();
        assert_eq!(before, fingerprint_tree(src.path()).unwrap());

        std::fs::write(src.path().join("b.txt"), "two").unwrap();
        assert_ne!(before, fingerprint_tree(src.path()).unwrap());
    }

    #[test]
    fn marker_lives_under_state_dir() {
        let location = ResolvedLocation {
            local_path: PathBuf::from("/cache/org/repo"),
            organization: "org".to_string(),
            repository_name: "repo".to_string(),
        };
        assert_eq!(
            marker_path(Path::new("/cache"), &location),
            PathBuf::from("/cache/.sync-state/org/repo.json")
        );
    }

    #[test]
    fn unreadable_marker_counts_as_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_marker(&path).is_none());
    }
}
