//! Report items produced by command execution
//!
//! Workers forward these to the daemon while a command runs; the daemon
//! appends them to the owning task in arrival order and returns them to
//! callers as part of the task snapshot. The daemon treats them as opaque
//! payloads; only the command library assigns meaning to the codes.

use serde::{Deserialize, Serialize};

/// Severity of a report item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSeverity {
    Error,
    Warning,
    Info,
    Debug,
}

/// A single progress or diagnostic report emitted during command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportItem {
    pub severity: ReportSeverity,
    /// Machine-readable report code, e.g. `NODE_NOT_FOUND`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured payload attached by the command library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ReportItem {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ReportSeverity::Error, code, message)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ReportSeverity::Warning, code, message)
    }

    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ReportSeverity::Info, code, message)
    }

    fn new(severity: ReportSeverity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }

    /// Attach a structured context payload.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
