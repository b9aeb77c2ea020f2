//! Shared data structures and utilities for the cluster control daemon
//!
//! This crate contains the types that cross crate or process boundaries:
//! task and command DTOs, worker IPC envelopes, HTTP API bodies, and the
//! daemon configuration structures used by both binaries.

pub mod api;
pub mod config;
pub mod defaults;
pub mod ipc;
pub mod reports;
pub mod tasks;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::DaemonConfig;
pub use ipc::{DispatchEnvelope, MessagePayload, WorkerMessage};
pub use reports::{ReportItem, ReportSeverity};
pub use tasks::{AuthUser, Command, TaskDto, TaskFinishType, TaskKillReason, TaskState};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the control daemon
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests;
