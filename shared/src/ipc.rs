//! Wire protocol between the daemon and its worker processes
//!
//! Each worker talks to the daemon over its stdio pipes: dispatch
//! envelopes travel down on stdin, upstream messages travel up on stdout.
//! Both directions use single-line JSON so the stream can be framed by
//! newlines. The upstream payload is decoded through a raw `{kind, data}`
//! shape with an explicit default arm, so a message of an unrecognized
//! kind still reaches the scheduler attributed to its task instead of
//! poisoning the whole stream.

use serde::{Deserialize, Serialize};

use crate::reports::ReportItem;
use crate::tasks::{AuthUser, Command, TaskFinishType};

/// Kind tags used on the wire for upstream messages.
pub mod kinds {
    pub const REPORT: &str = "report";
    pub const TASK_EXECUTED: &str = "task_executed";
    pub const TASK_FINISHED: &str = "task_finished";
}

/// Assignment of one task to whichever idle worker claims it next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub task_id: String,
    pub command: Command,
    pub auth_user: AuthUser,
}

impl DispatchEnvelope {
    /// Encode as a single JSON line (without the trailing newline).
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Payload of one upstream message, as a tagged union.
///
/// `Unknown` is never emitted by a well-behaved worker; it is produced by
/// the decoder's default arm so the scheduler can fail the owning task
/// with a diagnostic instead of guessing.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Report(ReportItem),
    TaskExecuted {
        pid: u32,
    },
    TaskFinished {
        finish_type: TaskFinishType,
        result: Option<serde_json::Value>,
    },
    Unknown {
        kind: String,
    },
}

impl MessagePayload {
    /// The wire kind tag for this payload.
    pub fn kind(&self) -> &str {
        match self {
            MessagePayload::Report(_) => kinds::REPORT,
            MessagePayload::TaskExecuted { .. } => kinds::TASK_EXECUTED,
            MessagePayload::TaskFinished { .. } => kinds::TASK_FINISHED,
            MessagePayload::Unknown { kind } => kind,
        }
    }
}

/// One upstream message, keyed by the task it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    pub task_id: String,
    pub payload: MessagePayload,
}

/// On-the-wire shape of an upstream message.
#[derive(Serialize, Deserialize)]
struct RawMessage {
    task_id: String,
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct TaskExecutedData {
    pid: u32,
}

#[derive(Serialize, Deserialize)]
struct TaskFinishedData {
    finish_type: TaskFinishType,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

impl WorkerMessage {
    pub fn report(task_id: impl Into<String>, report: ReportItem) -> Self {
        Self {
            task_id: task_id.into(),
            payload: MessagePayload::Report(report),
        }
    }

    pub fn task_executed(task_id: impl Into<String>, pid: u32) -> Self {
        Self {
            task_id: task_id.into(),
            payload: MessagePayload::TaskExecuted { pid },
        }
    }

    pub fn task_finished(
        task_id: impl Into<String>,
        finish_type: TaskFinishType,
        result: Option<serde_json::Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            payload: MessagePayload::TaskFinished {
                finish_type,
                result,
            },
        }
    }

    /// Encode as a single JSON line (without the trailing newline).
    pub fn encode(&self) -> serde_json::Result<String> {
        let (kind, data) = match &self.payload {
            MessagePayload::Report(report) => {
                (kinds::REPORT.to_string(), serde_json::to_value(report)?)
            }
            MessagePayload::TaskExecuted { pid } => (
                kinds::TASK_EXECUTED.to_string(),
                serde_json::to_value(TaskExecutedData { pid: *pid })?,
            ),
            MessagePayload::TaskFinished {
                finish_type,
                result,
            } => (
                kinds::TASK_FINISHED.to_string(),
                serde_json::to_value(TaskFinishedData {
                    finish_type: *finish_type,
                    result: result.clone(),
                })?,
            ),
            MessagePayload::Unknown { kind } => (kind.clone(), serde_json::Value::Null),
        };
        serde_json::to_string(&RawMessage {
            task_id: self.task_id.clone(),
            kind,
            data,
        })
    }

    /// Decode one JSON line. A recognized kind with a malformed data
    /// section is an error; an unrecognized kind decodes into
    /// `MessagePayload::Unknown` so the owning task can be failed.
    pub fn decode(line: &str) -> serde_json::Result<Self> {
        let raw: RawMessage = serde_json::from_str(line)?;
        let payload = match raw.kind.as_str() {
            kinds::REPORT => MessagePayload::Report(serde_json::from_value(raw.data)?),
            kinds::TASK_EXECUTED => {
                let data: TaskExecutedData = serde_json::from_value(raw.data)?;
                MessagePayload::TaskExecuted { pid: data.pid }
            }
            kinds::TASK_FINISHED => {
                let data: TaskFinishedData = serde_json::from_value(raw.data)?;
                MessagePayload::TaskFinished {
                    finish_type: data.finish_type,
                    result: data.result,
                }
            }
            _ => MessagePayload::Unknown { kind: raw.kind },
        };
        Ok(Self {
            task_id: raw.task_id,
            payload,
        })
    }
}
