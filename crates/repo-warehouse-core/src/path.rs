//! Repository reference → cache-tree location.
//!
//! [`resolve`] maps a [`RepositoryReference`] to a [`ResolvedLocation`]
//! inside the repository cache:
//!
//! ```text
//! https://host/org/repo.git   →  <cache_root>/org/repo
//! git@host:org/repo.git       →  <cache_root>/org/repo
//! /data/projects/proj         →  <cache_root>/projects/proj
//! /proj                       →  <cache_root>/local/proj
//! ```
//!
//! Local directories are mirrored into the same tree as remote clones rather
//! than processed in place. Relative local paths resolve against the current
//! working directory.

use std::path::{Component, Path, PathBuf};

use crate::error::PipelineError;
use crate::models::{ReferenceKind, RepositoryReference, ResolvedLocation, LOCAL_ORGANIZATION};

/// Returns `true` when `address` is shaped like a filesystem path rather
/// than a URL: absolute, `./`- or `../`-relative, or drive-letter prefixed.
pub fn looks_local(address: &str) -> bool {
    let trimmed = address.trim();
    Path::new(trimmed).is_absolute()
        || trimmed.starts_with("./")
        || trimmed.starts_with("../")
        || trimmed.starts_with(".\\")
        || trimmed.starts_with("..\\")
        || is_drive_path(trimmed)
}

/// Map a reference to its place in the cache tree.
///
/// Fails only when a remote address has fewer than two path segments or
/// yields a segment that cannot name a directory.
pub fn resolve(
    reference: &RepositoryReference,
    cache_root: &Path,
) -> Result<ResolvedLocation, PipelineError> {
    let address = reference.address.trim();
    if address.is_empty() {
        return Err(malformed(address, "address is empty"));
    }

    let (owner, name) = if reference.is_local() || looks_local(address) {
        split_local(address)
    } else {
        split_remote(address)?
    };

    let (organization, repository_name) = normalize_owner(&owner, &name);

    for segment in [&organization, &repository_name] {
        if !is_safe_segment(segment) {
            return Err(malformed(
                address,
                &format!("'{}' cannot be used as a directory name", segment),
            ));
        }
    }

    Ok(ResolvedLocation {
        local_path: cache_root.join(&organization).join(&repository_name),
        organization,
        repository_name,
    })
}

/// Reinterpret a drive-letter owner (`"C:"`) as part of a local path.
///
/// The parent/child split is recomputed from the combined path. When no
/// usable parent remains the organization becomes `"local"` and the name is
/// kept as given.
pub fn normalize_owner(owner: &str, name: &str) -> (String, String) {
    if !is_drive_owner(owner) {
        return (owner.to_string(), name.to_string());
    }

    let combined = format!("{}/{}", owner, name);
    let segments: Vec<&str> = combined
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    match segments.as_slice() {
        [.., parent, last] if !parent.ends_with(':') && !last.ends_with(':') => {
            (parent.to_string(), last.to_string())
        }
        [.., last] if !last.ends_with(':') => (LOCAL_ORGANIZATION.to_string(), last.to_string()),
        _ => (LOCAL_ORGANIZATION.to_string(), name.to_string()),
    }
}

/// Canonical form of an address, used as the warehouse dedup key.
///
/// Remote addresses always end in `.git`; local paths are made absolute
/// against the current directory and lose trailing separators.
pub fn normalize_address(address: &str, kind: ReferenceKind) -> String {
    let trimmed = address.trim();
    match kind {
        ReferenceKind::Remote => {
            let base = trimmed.trim_end_matches('/');
            if base.ends_with(".git") {
                base.to_string()
            } else {
                format!("{}.git", base)
            }
        }
        ReferenceKind::Local if is_drive_path(trimmed) => {
            let base = trimmed.trim_end_matches(['/', '\\']);
            if base.ends_with(':') {
                trimmed.to_string()
            } else {
                base.to_string()
            }
        }
        ReferenceKind::Local => absolutize(Path::new(trimmed))
            .to_string_lossy()
            .to_string(),
    }
}

fn split_local(address: &str) -> (String, String) {
    if is_drive_path(address) {
        let segments: Vec<&str> = address
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .collect();
        return match segments.as_slice() {
            [.., parent, name] => (parent.to_string(), name.to_string()),
            [name] => (LOCAL_ORGANIZATION.to_string(), name.to_string()),
            [] => (LOCAL_ORGANIZATION.to_string(), String::new()),
        };
    }

    let absolute = absolutize(Path::new(address));
    let name = absolute
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let owner = absolute
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| LOCAL_ORGANIZATION.to_string());
    (owner, name)
}

fn split_remote(address: &str) -> Result<(String, String), PipelineError> {
    let path = if let Some(idx) = address.find("://") {
        let rest = &address[idx + 3..];
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        match rest.find('/') {
            Some(slash) => &rest[slash..],
            None => "",
        }
    } else if let Some(path) = scp_path(address) {
        path
    } else {
        return Err(malformed(
            address,
            "expected an absolute URL or an scp-style address (user@host:org/repo)",
        ));
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Err(malformed(
            address,
            "expected at least two path segments (organization/repository)",
        ));
    }

    let organization = segments[0].to_string();
    let repository = segments[1]
        .strip_suffix(".git")
        .unwrap_or(segments[1])
        .to_string();
    Ok((organization, repository))
}

/// `git@host:org/repo.git` → `org/repo.git`.
fn scp_path(address: &str) -> Option<&str> {
    let (host, path) = address.split_once(':')?;
    if host.is_empty() || host.contains('/') || path.starts_with("//") {
        return None;
    }
    Some(path)
}

fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn is_drive_path(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2
        && b[0].is_ascii_alphabetic()
        && b[1] == b':'
        && (b.len() == 2 || b[2] == b'/' || b[2] == b'\\')
}

fn is_drive_owner(owner: &str) -> bool {
    owner.len() == 2 && is_drive_path(owner)
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}

fn malformed(address: &str, reason: &str) -> PipelineError {
    PipelineError::ReferenceResolution {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}
