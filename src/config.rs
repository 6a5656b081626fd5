//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/rwh.sqlite"
//!
//! [cache]
//! root = "./data/repositories"
//!
//! [sync]
//! remote_refresh = "pinned"   # or "pull"
//! refresh_local = false
//! trust = "strict"            # or "accept-any", or { ca-bundle = "/etc/ssl/corp.pem" }
//!
//! [generation]
//! provider = "openai"         # or "disabled"
//! model = "gpt-4o-mini"
//! max_tool_rounds = 8
//!
//! [files]
//! exclude_globs = ["**/*.lock"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Root of the repository cache tree (`<root>/<organization>/<repository>`).
    pub root: PathBuf,
}

/// What to do with a remote clone that already exists in the cache.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteRefresh {
    /// Keep the working copy at the commit it was cloned at.
    #[default]
    Pinned,
    /// Fetch and hard-reset to the tracked branch before every run.
    Pull,
}

/// TLS certificate policy for remote transports.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TrustSetting {
    #[default]
    Strict,
    AcceptAny,
    CaBundle(PathBuf),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub remote_refresh: RemoteRefresh,
    /// Re-mirror local sources whose content changed since the last copy.
    /// Versioned sources follow their head and branch regardless.
    #[serde(default)]
    pub refresh_local: bool,
    #[serde(default)]
    pub trust: TrustSetting,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Cap on file-tree lines sent to catalogue structuring.
    #[serde(default = "default_max_tree_entries")]
    pub max_tree_entries: usize,
    /// File-read round trips allowed per synthesized document.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: default_generation_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_tree_entries: default_max_tree_entries(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_generation_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_tree_entries() -> usize {
    2000
}
fn default_max_tool_rounds() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilesConfig {
    /// Extra exclusions on top of the built-in `.git`, `target`, `node_modules`.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Config {
    /// Configuration rooted at `dir`, used by tests and ad-hoc runs.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("rwh.sqlite"),
            },
            cache: CacheConfig {
                root: dir.join("repositories"),
            },
            sync: SyncConfig::default(),
            generation: GenerationConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache.root.as_os_str().is_empty() {
        anyhow::bail!("cache.root must not be empty");
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.generation.model.is_none() {
                anyhow::bail!("generation.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.generation.max_tree_entries == 0 {
        anyhow::bail!("generation.max_tree_entries must be > 0");
    }

    if let TrustSetting::CaBundle(bundle) = &config.sync.trust {
        if !bundle.exists() {
            anyhow::bail!("sync.trust.ca-bundle does not exist: {}", bundle.display());
        }
    }

    Ok(())
}
