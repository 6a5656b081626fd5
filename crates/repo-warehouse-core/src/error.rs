//! Pipeline error taxonomy.
//!
//! Every failure the pipeline can record on a warehouse maps to one
//! [`PipelineError`] variant. Application plumbing (config, CLI, database
//! setup) keeps using `anyhow`; these errors convert into it with `?`.

use thiserror::Error;

use crate::models::WarehouseStatus;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The address cannot be mapped to an organization and repository.
    #[error("malformed repository reference '{address}': {reason}")]
    ReferenceResolution { address: String, reason: String },

    /// Clone, copy, or transport failure (including TLS and credential rejection).
    #[error("failed to synchronize '{address}': {cause}")]
    Synchronization { address: String, cause: String },

    /// An external generation capability failed or returned unusable output.
    #[error(
        "generation failed{}: {message}",
        .section.as_ref().map(|s| format!(" for section '{}'", s)).unwrap_or_default()
    )]
    Generation {
        section: Option<String>,
        message: String,
    },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: WarehouseStatus,
        to: WarehouseStatus,
    },

    /// A transition or progress update carried values the state machine rejects.
    #[error("invalid lifecycle update: {0}")]
    InvalidUpdate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn generation(section: Option<&str>, message: impl Into<String>) -> Self {
        PipelineError::Generation {
            section: section.map(str::to_string),
            message: message.into(),
        }
    }
}
