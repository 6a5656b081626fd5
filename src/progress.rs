//! Pipeline progress reporting.
//!
//! Reports observable progress during `rwh process` so users see which step
//! a warehouse is in and how many documents are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts. The persisted
//! `progress` column follows the same percentages.

use std::io::Write;
use std::sync::Arc;

use repo_warehouse_core::models::WarehouseStatus;

/// Step boundaries of a pipeline run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineStep {
    Synchronized,
    ChangesDetected,
    CatalogueReady,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Synchronized => "synchronized",
            PipelineStep::ChangesDetected => "changes-detected",
            PipelineStep::CatalogueReady => "catalogue-ready",
        }
    }
}

/// A single progress event for one warehouse run.
#[derive(Clone, Debug)]
pub enum PipelineProgressEvent {
    /// A step boundary was crossed.
    Step {
        warehouse: String,
        step: PipelineStep,
        percent: u8,
    },
    /// Document `n` of `total` was synthesized.
    Document {
        warehouse: String,
        path: String,
        n: u64,
        total: u64,
        percent: u8,
    },
    /// The run ended in a terminal state.
    Finished {
        warehouse: String,
        status: WarehouseStatus,
        detail: String,
    },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait PipelineProgressReporter: Send + Sync {
    fn report(&self, event: PipelineProgressEvent);
}

/// Human-friendly progress on stderr: "process org/repo  document 3 / 12  guide/setup  46%".
pub struct StderrProgress;

impl PipelineProgressReporter for StderrProgress {
    fn report(&self, event: PipelineProgressEvent) {
        let line = match &event {
            PipelineProgressEvent::Step {
                warehouse,
                step,
                percent,
            } => format!("process {}  {}  {}%\n", warehouse, step.as_str(), percent),
            PipelineProgressEvent::Document {
                warehouse,
                path,
                n,
                total,
                percent,
            } => format!(
                "process {}  document {} / {}  {}  {}%\n",
                warehouse,
                format_number(*n),
                format_number(*total),
                path,
                percent
            ),
            PipelineProgressEvent::Finished {
                warehouse,
                status,
                detail,
            } => {
                if detail.is_empty() {
                    format!("process {}  {}\n", warehouse, status)
                } else {
                    format!("process {}  {}  {}\n", warehouse, status, detail)
                }
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl PipelineProgressReporter for JsonProgress {
    fn report(&self, event: PipelineProgressEvent) {
        let obj = match &event {
            PipelineProgressEvent::Step {
                warehouse,
                step,
                percent,
            } => serde_json::json!({
                "event": "progress",
                "warehouse": warehouse,
                "step": step.as_str(),
                "percent": percent
            }),
            PipelineProgressEvent::Document {
                warehouse,
                path,
                n,
                total,
                percent,
            } => serde_json::json!({
                "event": "progress",
                "warehouse": warehouse,
                "step": "document",
                "path": path,
                "n": n,
                "total": total,
                "percent": percent
            }),
            PipelineProgressEvent::Finished {
                warehouse,
                status,
                detail,
            } => serde_json::json!({
                "event": "finished",
                "warehouse": warehouse,
                "status": status.as_str(),
                "detail": detail
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl PipelineProgressReporter for NoProgress {
    fn report(&self, _event: PipelineProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Percentage for document `n` of `total`, spread over 25..95.
pub fn document_percent(n: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    let span = 70 * n.min(total) / total;
    (25 + span) as u8
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn PipelineProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn document_percent_spans_25_to_95() {
        assert_eq!(document_percent(0, 4), 25);
        assert_eq!(document_percent(2, 4), 60);
        assert_eq!(document_percent(4, 4), 95);
        assert_eq!(document_percent(0, 0), 95);
    }
}
