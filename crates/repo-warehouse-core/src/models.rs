//! Core data models used throughout Repo Warehouse.
//!
//! [`Warehouse`] is the persisted root aggregate. [`ResolvedLocation`] and
//! [`RepositorySnapshot`] are value objects recomputed from it on every run
//! and never stored on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Head commit id reported when a working copy has no commits yet.
pub const NO_VERSION: &str = "no-version";

/// Organization used when none can be derived from a reference.
pub const LOCAL_ORGANIZATION: &str = "local";

/// Branch reported for freshly initialized local imports.
pub const DEFAULT_BRANCH: &str = "main";

/// Version recorded on a warehouse before its first successful run.
pub const PLACEHOLDER_VERSION: &str = "1.0.0";

/// Author reported for a repository without commits.
pub const LOCAL_AUTHOR: &str = "local user";

/// Commit message reported for a repository without commits.
pub const INITIAL_IMPORT_MESSAGE: &str = "initial import";

/// Where a repository comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// A Git remote reached over a transport (https, ssh, file://).
    #[serde(rename = "git")]
    Remote,
    /// A directory on the local filesystem, version-controlled or not.
    #[serde(rename = "local")]
    Local,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Remote => "git",
            ReferenceKind::Local => "local",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "git" | "remote" => Ok(ReferenceKind::Remote),
            "local" => Ok(ReferenceKind::Local),
            other => Err(format!(
                "unknown repository type '{}': expected git or local",
                other
            )),
        }
    }
}

/// Transport credentials for a private remote.
///
/// Never persisted. The password is redacted from `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// A repository as submitted by a caller. Constructed per submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    pub address: String,
    pub branch: Option<String>,
    pub credentials: Option<Credentials>,
    pub kind: ReferenceKind,
}

impl RepositoryReference {
    pub fn remote(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            branch: None,
            credentials: None,
            kind: ReferenceKind::Remote,
        }
    }

    pub fn local(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            branch: None,
            credentials: None,
            kind: ReferenceKind::Local,
        }
    }

    /// Build a reference, inferring the kind from the address shape when
    /// none is given.
    pub fn new(address: impl Into<String>, kind: Option<ReferenceKind>) -> Self {
        let address = address.into();
        let kind = kind.unwrap_or_else(|| {
            if crate::path::looks_local(&address) {
                ReferenceKind::Local
            } else {
                ReferenceKind::Remote
            }
        });
        Self {
            address,
            branch: None,
            credentials: None,
            kind,
        }
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch.filter(|b| !b.trim().is_empty());
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials.filter(|c| !c.username.is_empty());
        self
    }

    /// The kind the pipeline acts on: a path-shaped address is local even
    /// when it was submitted as `git`.
    pub fn effective_kind(&self) -> ReferenceKind {
        if crate::path::looks_local(&self.address) {
            ReferenceKind::Local
        } else {
            self.kind
        }
    }

    pub fn is_local(&self) -> bool {
        self.effective_kind() == ReferenceKind::Local
    }
}

/// Canonical on-disk placement of a repository inside the cache tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub local_path: PathBuf,
    pub organization: String,
    pub repository_name: String,
}

impl ResolvedLocation {
    /// Key shared by every reference that lands on the same cache directory.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.organization, self.repository_name)
    }
}

/// Repository state as observed by one synchronization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub branch_name: String,
    pub head_commit_id: String,
    pub commit_timestamp: DateTime<Utc>,
    pub commit_author: String,
    pub commit_message: String,
}

impl RepositorySnapshot {
    /// Snapshot of a repository that has no commits yet.
    pub fn without_history(branch_name: impl Into<String>) -> Self {
        Self {
            branch_name: branch_name.into(),
            head_commit_id: NO_VERSION.to_string(),
            commit_timestamp: Utc::now(),
            commit_author: LOCAL_AUTHOR.to_string(),
            commit_message: INITIAL_IMPORT_MESSAGE.to_string(),
        }
    }

    pub fn has_history(&self) -> bool {
        self.head_commit_id != NO_VERSION
    }
}

/// Lifecycle status of a [`Warehouse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarehouseStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WarehouseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseStatus::Pending => "Pending",
            WarehouseStatus::Processing => "Processing",
            WarehouseStatus::Completed => "Completed",
            WarehouseStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for WarehouseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarehouseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(WarehouseStatus::Pending),
            "Processing" => Ok(WarehouseStatus::Processing),
            "Completed" => Ok(WarehouseStatus::Completed),
            "Failed" => Ok(WarehouseStatus::Failed),
            other => Err(format!("unknown warehouse status '{}'", other)),
        }
    }
}

/// A tracked repository. Identity is the opaque `id`; `address` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    pub address: String,
    pub organization_name: String,
    pub name: String,
    /// Branch to synchronize; `None` follows the remote's default branch.
    pub branch: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    pub status: WarehouseStatus,
    pub progress: u8,
    pub error: String,
    pub version: String,
    pub description: String,
    /// Generation model requested at submission (empty for the default).
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl Warehouse {
    /// Rebuild the reference this warehouse was submitted with.
    pub fn reference(&self) -> RepositoryReference {
        RepositoryReference {
            address: self.address.clone(),
            branch: self.branch.clone(),
            credentials: None,
            kind: self.kind,
        }
    }
}

/// One commit between two processing runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

/// The commit most recently processed into documentation for a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCommitRecord {
    pub warehouse_id: String,
    pub commit_id: String,
    pub commit_message: String,
    pub author: String,
    pub processed_at: DateTime<Utc>,
    /// Commits covered by the run that wrote this record, oldest first.
    #[serde(default)]
    pub changes: Vec<CommitSummary>,
}

/// A document produced for one catalogue node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub warehouse_id: String,
    /// Slash-joined catalogue titles from the root to this node.
    pub path: String,
    pub name: String,
    pub prompt: String,
    pub content: String,
    pub generated_at: DateTime<Utc>,
}
