//! Git subprocess helpers.
//!
//! All repository access goes through the `git` CLI, the same way the
//! cache is cloned, refreshed, and inspected. Every command runs with
//! `GIT_TERMINAL_PROMPT=0` so a missing credential fails instead of
//! blocking on a prompt.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use repo_warehouse_core::changes::CommitHistory;
use repo_warehouse_core::models::CommitSummary;

use crate::trust::Transport;

/// Field separator for `git log --format` output.
const SEP: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%cI%x1f%s";

/// Metadata of the commit `HEAD` points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadCommit {
    pub id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

fn git(dir: Option<&Path>) -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd
}

fn output(mut cmd: Command, what: &str) -> Result<Output> {
    cmd.output()
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", what))
}

fn run(cmd: Command, what: &str) -> Result<String> {
    let out = output(cmd, what)?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!("git {} failed: {}", what, stderr.trim());
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Full-depth clone of `url` into `dest`, optionally of a specific branch.
pub fn clone(url: &str, branch: Option<&str>, dest: &Path, transport: &Transport) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }

    let mut cmd = git(None);
    transport.apply(&mut cmd);
    cmd.args(["clone", "--quiet"]);
    if let Some(branch) = branch {
        cmd.args(["--branch", branch]);
    }
    cmd.arg(url).arg(dest);

    run(cmd, "clone").map(|_| ())
}

/// Fetch `branch` from `origin` and hard-reset the working copy to it.
pub fn fetch_and_reset(repo_dir: &Path, branch: &str, transport: &Transport) -> Result<()> {
    let mut cmd = git(Some(repo_dir));
    transport.apply(&mut cmd);
    cmd.args(["fetch", "--quiet", "origin", branch]);
    run(cmd, "fetch")?;

    let mut cmd = git(Some(repo_dir));
    cmd.args(["reset", "--hard", "--quiet", "FETCH_HEAD"]);
    run(cmd, "reset").map(|_| ())
}

/// Initialize an empty repository at `dir` whose unborn branch is `branch`.
pub fn init(dir: &Path, branch: &str) -> Result<()> {
    let mut cmd = git(Some(dir));
    cmd.args(["init", "--quiet"]);
    run(cmd, "init")?;

    let mut cmd = git(Some(dir));
    cmd.args(["symbolic-ref", "HEAD", &format!("refs/heads/{}", branch)]);
    run(cmd, "symbolic-ref").map(|_| ())
}

/// Import the history behind `source`'s `HEAD` into `mirror` as `branch`.
///
/// The mirror's index is reset to the imported commit; its working tree is
/// left untouched.
pub fn fetch_local_history(mirror: &Path, source: &Path, branch: &str) -> Result<()> {
    let mut cmd = git(Some(mirror));
    cmd.args(["fetch", "--quiet", "--no-tags", "--update-head-ok"])
        .arg(source)
        .arg(format!("+HEAD:refs/heads/{}", branch));
    run(cmd, "fetch")?;

    let mut cmd = git(Some(mirror));
    cmd.args(["reset", "--mixed", "--quiet"]);
    run(cmd, "reset").map(|_| ())
}

/// Returns `true` if `dir` is the top of a git working copy.
pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Returns `true` if `dir` holds a repository git can actually open.
pub fn is_openable(dir: &Path) -> bool {
    if !is_git_repo(dir) {
        return false;
    }
    let mut cmd = git(Some(dir));
    cmd.args(["rev-parse", "--git-dir"]);
    matches!(output(cmd, "rev-parse"), Ok(out) if out.status.success())
}

/// Name of the branch `HEAD` refers to, or `None` when detached.
pub fn current_branch(repo_dir: &Path) -> Result<Option<String>> {
    let mut cmd = git(Some(repo_dir));
    cmd.args(["symbolic-ref", "--quiet", "--short", "HEAD"]);
    let out = output(cmd, "symbolic-ref")?;
    if !out.status.success() {
        return Ok(None);
    }
    let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
    Ok(if name.is_empty() { None } else { Some(name) })
}

/// The commit `HEAD` points at, or `None` for a repository with no commits.
pub fn head_commit(repo_dir: &Path) -> Result<Option<HeadCommit>> {
    let mut cmd = git(Some(repo_dir));
    cmd.args(["rev-parse", "--verify", "--quiet", "HEAD"]);
    if !output(cmd, "rev-parse")?.status.success() {
        return Ok(None);
    }

    let mut cmd = git(Some(repo_dir));
    cmd.args(["log", "-1", LOG_FORMAT, "HEAD"]);
    let line = run(cmd, "log")?;
    let summary = parse_log_line(&line)?;

    Ok(Some(HeadCommit {
        id: summary.id,
        author: summary.author,
        timestamp: summary.timestamp,
        message: summary.summary,
    }))
}

/// `true` if `ancestor` is reachable from `head`.
pub fn is_ancestor(repo_dir: &Path, ancestor: &str, head: &str) -> Result<bool> {
    let mut cmd = git(Some(repo_dir));
    cmd.args(["merge-base", "--is-ancestor", ancestor, head]);
    let out = output(cmd, "merge-base")?;
    match out.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => bail!(
            "git merge-base failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ),
    }
}

/// Commits in `from..head`, oldest first.
pub fn commits_between(repo_dir: &Path, from: &str, head: &str) -> Result<Vec<CommitSummary>> {
    let mut cmd = git(Some(repo_dir));
    cmd.args(["log", "--reverse", LOG_FORMAT, &format!("{}..{}", from, head)]);
    let stdout = run(cmd, "log")?;

    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_log_line)
        .collect()
}

fn parse_log_line(line: &str) -> Result<CommitSummary> {
    let mut parts = line.splitn(4, SEP);
    let (Some(id), Some(author), Some(date), summary) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("unexpected git log output: {}", line);
    };

    let timestamp = DateTime::parse_from_rfc3339(date)
        .with_context(|| format!("invalid commit date '{}'", date))?
        .with_timezone(&Utc);

    Ok(CommitSummary {
        id: id.to_string(),
        author: author.to_string(),
        timestamp,
        summary: summary.unwrap_or_default().to_string(),
    })
}

/// Commit graph of a working copy in the cache.
pub struct GitHistory {
    repo_dir: PathBuf,
}

impl GitHistory {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

impl CommitHistory for GitHistory {
    fn is_reachable(&self, ancestor: &str, head: &str) -> Result<bool> {
        is_ancestor(&self.repo_dir, ancestor, head)
    }

    fn commits_between(&self, from: &str, head: &str) -> Result<Vec<CommitSummary>> {
        commits_between(&self.repo_dir, from, head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_line() {
        let line = format!(
            "abc123{s}Jane Dev{s}2024-05-01T12:30:00+02:00{s}fix: handle empty input",
            s = SEP
        );
        let c = parse_log_line(&line).unwrap();
        assert_eq!(c.id, "abc123");
        assert_eq!(c.author, "Jane Dev");
        assert_eq!(c.summary, "fix: handle empty input");
        assert_eq!(c.timestamp.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn empty_subject_is_allowed() {
        let line = format!("abc{s}dev{s}2024-01-01T00:00:00Z{s}", s = SEP);
        assert_eq!(parse_log_line(&line).unwrap().summary, "");
    }

    #[test]
    fn malformed_log_line_is_an_error() {
        assert!(parse_log_line("just-a-hash").is_err());
    }

    #[test]
    fn plain_directory_is_not_a_repo() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!is_git_repo(dir.path()));
        assert!(!is_openable(dir.path()));
    }
}
