//! Warehouse lifecycle transition table.
//!
//! ```text
//!             ┌──────────────── resubmit ───────────────┐
//!             ▼                                          │
//!   ──▶ Pending ──▶ Processing ──▶ Completed ────────────┤
//!                       │                                │
//!                       └────────▶ Failed ───────────────┘
//! ```
//!
//! Allowed: `Pending → Processing`, `Processing → Completed`,
//! `Processing → Failed`, and `* → Pending`. Everything else is rejected.
//!
//! Progress is only meaningful while `Processing`: it starts at 0, never
//! decreases, and reaches 100 only together with `Completed`. The error text
//! is cleared on entry to `Pending` or `Processing` and is mandatory on entry
//! to `Failed`. A failed warehouse keeps the progress it had reached.

use crate::error::PipelineError;
use crate::models::{Warehouse, WarehouseStatus};

/// The persisted effect of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: WarehouseStatus,
    pub progress: u8,
    pub error: String,
    /// New `version` to record, if the transition carries one.
    pub version: Option<String>,
}

impl StatusChange {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

pub fn is_allowed(from: WarehouseStatus, to: WarehouseStatus) -> bool {
    use WarehouseStatus::*;
    matches!(
        (from, to),
        (_, Pending) | (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
    )
}

/// Validate a transition of `current` into `to` and compute what to persist.
pub fn plan_transition(
    current: &Warehouse,
    to: WarehouseStatus,
    progress: Option<u8>,
    error: Option<&str>,
) -> Result<StatusChange, PipelineError> {
    if !is_allowed(current.status, to) {
        return Err(PipelineError::InvalidTransition {
            from: current.status,
            to,
        });
    }

    let progress = match to {
        WarehouseStatus::Pending => 0,
        WarehouseStatus::Processing => match progress {
            None | Some(0) => 0,
            Some(p) => {
                return Err(PipelineError::InvalidUpdate(format!(
                    "processing starts at 0, got {}",
                    p
                )))
            }
        },
        WarehouseStatus::Completed => match progress {
            None | Some(100) => 100,
            Some(p) => {
                return Err(PipelineError::InvalidUpdate(format!(
                    "completion requires progress 100, got {}",
                    p
                )))
            }
        },
        WarehouseStatus::Failed => match progress {
            None => current.progress,
            Some(p) if p >= current.progress && p < 100 => p,
            Some(p) => {
                return Err(PipelineError::InvalidUpdate(format!(
                    "failure progress {} outside [{}, 100)",
                    p, current.progress
                )))
            }
        },
    };

    let error = match to {
        WarehouseStatus::Failed => {
            let message = error.map(str::trim).unwrap_or_default();
            if message.is_empty() {
                return Err(PipelineError::InvalidUpdate(
                    "a failed warehouse must carry an error message".to_string(),
                ));
            }
            message.to_string()
        }
        _ => String::new(),
    };

    Ok(StatusChange {
        status: to,
        progress,
        error,
        version: None,
    })
}

/// Validate a progress report for a warehouse that is mid-run.
pub fn plan_progress(current: &Warehouse, progress: u8) -> Result<u8, PipelineError> {
    if current.status != WarehouseStatus::Processing {
        return Err(PipelineError::InvalidUpdate(format!(
            "progress can only be reported while Processing (status is {})",
            current.status
        )));
    }
    if progress < current.progress {
        return Err(PipelineError::InvalidUpdate(format!(
            "progress cannot move backwards ({} -> {})",
            current.progress, progress
        )));
    }
    if progress >= 100 {
        return Err(PipelineError::InvalidUpdate(
            "progress 100 is reserved for completion".to_string(),
        ));
    }
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReferenceKind, PLACEHOLDER_VERSION};
    use chrono::Utc;

    fn warehouse(status: WarehouseStatus, progress: u8) -> Warehouse {
        Warehouse {
            id: "w1".to_string(),
            address: "https://example.com/org/repo.git".to_string(),
            organization_name: "org".to_string(),
            name: "repo".to_string(),
            branch: None,
            kind: ReferenceKind::Remote,
            status,
            progress,
            error: String::new(),
            version: PLACEHOLDER_VERSION.to_string(),
            description: String::new(),
            model: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn transition_table() {
        use WarehouseStatus::*;
        let all = [Pending, Processing, Completed, Failed];
        for from in all {
            for to in all {
                let expected = to == Pending
                    || matches!(
                        (from, to),
                        (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
                    );
                assert_eq!(is_allowed(from, to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn completed_cannot_restart_processing_directly() {
        let w = warehouse(WarehouseStatus::Completed, 100);
        let err = plan_transition(&w, WarehouseStatus::Processing, None, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[test]
    fn pending_resets_progress_and_error() {
        let mut w = warehouse(WarehouseStatus::Failed, 40);
        w.error = "boom".to_string();
        let change = plan_transition(&w, WarehouseStatus::Pending, None, None).unwrap();
        assert_eq!(change.progress, 0);
        assert!(change.error.is_empty());
    }

    #[test]
    fn failure_keeps_progress_and_requires_message() {
        let w = warehouse(WarehouseStatus::Processing, 35);
        let change = plan_transition(&w, WarehouseStatus::Failed, None, Some("clone failed")).unwrap();
        assert_eq!(change.progress, 35);
        assert_eq!(change.error, "clone failed");

        assert!(plan_transition(&w, WarehouseStatus::Failed, None, Some("  ")).is_err());
    }

    #[test]
    fn completion_is_always_100() {
        let w = warehouse(WarehouseStatus::Processing, 90);
        let change = plan_transition(&w, WarehouseStatus::Completed, None, None).unwrap();
        assert_eq!(change.progress, 100);
        assert!(plan_transition(&w, WarehouseStatus::Completed, Some(95), None).is_err());
    }

    #[test]
    fn progress_is_monotonic_and_below_100() {
        let w = warehouse(WarehouseStatus::Processing, 30);
        assert_eq!(plan_progress(&w, 30).unwrap(), 30);
        assert_eq!(plan_progress(&w, 55).unwrap(), 55);
        assert!(plan_progress(&w, 10).is_err());
        assert!(plan_progress(&w, 100).is_err());

        let idle = warehouse(WarehouseStatus::Pending, 0);
        assert!(plan_progress(&idle, 10).is_err());
    }
}
