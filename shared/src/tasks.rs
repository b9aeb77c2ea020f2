//! Task lifecycle types and DTOs
//!
//! These types describe a single asynchronous execution of a cluster
//! management command: the command itself, the identity it runs under,
//! the lifecycle state machine, and the snapshot returned to HTTP callers.

use serde::{Deserialize, Serialize};

use crate::reports::ReportItem;

/// Lifecycle states of a task.
///
/// The derived `Ord` follows the declaration order; a task only ever moves
/// forward through it (`Created` -> `Queued` -> `Executed` -> `Finished`,
/// with `Created` -> `Finished` allowed for a kill before dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted by the registry, not yet handed to the scheduler.
    Created,
    /// A dispatch envelope has been placed on the worker in-queue.
    Queued,
    /// A worker has claimed the envelope and reported its pid.
    Executed,
    /// Terminal; `TaskFinishType` says how it ended.
    Finished,
}

/// How a finished task ended. `Unfinished` is only meaningful while the
/// task has not reached `TaskState::Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFinishType {
    Unfinished,
    Success,
    Fail,
    Kill,
    InternalError,
}

/// Why a kill was requested on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKillReason {
    /// An authenticated caller asked for the task to be stopped.
    User,
    /// The bound worker stopped sending messages (defunct detection).
    InternalMessaging,
    /// The caller-supplied overall timeout elapsed.
    CompletionTimeout,
}

/// Options attached to a command by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOptions {
    /// Overall timeout for the whole task in seconds, measured from task
    /// creation. When absent, the daemon-wide default applies.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

/// A cluster management command submitted by a caller.
///
/// Params are an opaque key-value mapping; they are validated by the
/// command library inside the worker, not by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub options: CommandOptions,
}

impl Command {
    /// Convenience constructor for a command with no params and no options.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Map::new(),
            options: CommandOptions::default(),
        }
    }
}

/// Resolved identity a task runs under. Attached at create time and passed
/// to the worker so the command library applies the caller's permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

/// Snapshot of a task suitable for HTTP responses.
///
/// Deliberately excludes internal timestamps and worker pids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDto {
    pub task_id: String,
    pub command: Command,
    pub state: TaskState,
    pub task_finish_type: TaskFinishType,
    pub result: Option<serde_json::Value>,
    pub reports: Vec<ReportItem>,
    pub kill_reason: Option<TaskKillReason>,
}
