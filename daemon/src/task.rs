//! Per-task record and state machine
//!
//! A task record is owned by the registry and mutated only while the
//! registry lock is held: by HTTP callers through `request_kill`, and by
//! the scheduler for everything else. The state machine moves strictly
//! forward: Created -> Queued -> Executed -> Finished, with the single
//! shortcut Created -> Finished for a kill before dispatch.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use shared::ipc::MessagePayload;
use shared::{
    AuthUser, Command, DispatchEnvelope, ReportItem, TaskDto, TaskFinishType, TaskKillReason,
    TaskState,
};

use crate::worker_pool::{ProcessSignaler, SignalError};

/// Errors raised while applying an upstream message to a task record.
///
/// Both variants mean the bound worker misbehaved; the scheduler responds
/// by force-finishing the task and signalling the worker.
#[derive(Debug, thiserror::Error)]
pub enum TaskMessageError {
    #[error("message '{kind}' not allowed in state {state:?}")]
    ProtocolViolation { state: TaskState, kind: String },
    #[error("unknown message payload type '{kind}'")]
    UnknownMessage { kind: String },
}

/// One live task: an asynchronous execution of a cluster command.
pub struct Task {
    id: String,
    command: Command,
    auth_user: AuthUser,
    state: TaskState,
    finish_type: TaskFinishType,
    result: Option<Value>,
    reports: Vec<ReportItem>,
    worker_pid: Option<u32>,
    last_message_at: Option<Instant>,
    kill_requested: bool,
    kill_reason: Option<TaskKillReason>,
    created_at: Instant,
    /// Effective overall timeout: the caller's request_timeout, or the
    /// daemon default when the caller did not set one.
    overall_timeout: Option<Duration>,
}

impl Task {
    pub fn new(
        id: String,
        command: Command,
        auth_user: AuthUser,
        default_request_timeout: Option<Duration>,
        now: Instant,
    ) -> Self {
        let overall_timeout = command
            .options
            .request_timeout
            .map(Duration::from_secs)
            .or(default_request_timeout);
        Self {
            id,
            command,
            auth_user,
            state: TaskState::Created,
            finish_type: TaskFinishType::Unfinished,
            result: None,
            reports: Vec::new(),
            worker_pid: None,
            last_message_at: None,
            kill_requested: false,
            kill_reason: None,
            created_at: now,
            overall_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_kill_requested(&self) -> bool {
        self.kill_requested
    }

    /// Apply one upstream message. Messages arriving after the task is
    /// terminal are dropped; the record never regresses.
    pub fn receive_message(
        &mut self,
        payload: MessagePayload,
        now: Instant,
    ) -> Result<(), TaskMessageError> {
        if self.state == TaskState::Finished {
            debug!(task_id = %self.id, kind = payload.kind(), "Dropping message for finished task");
            return Ok(());
        }
        let kind = payload.kind().to_string();

        match payload {
            MessagePayload::Report(report) => {
                self.reports.push(report);
                self.last_message_at = Some(now);
                Ok(())
            }
            MessagePayload::TaskExecuted { pid } => {
                if self.state != TaskState::Queued {
                    return Err(TaskMessageError::ProtocolViolation {
                        state: self.state,
                        kind,
                    });
                }
                self.state = TaskState::Executed;
                self.worker_pid = Some(pid);
                self.last_message_at = Some(now);
                Ok(())
            }
            MessagePayload::TaskFinished {
                finish_type,
                result,
            } => {
                if !matches!(self.state, TaskState::Queued | TaskState::Executed) {
                    return Err(TaskMessageError::ProtocolViolation {
                        state: self.state,
                        kind,
                    });
                }
                self.result = result;
                self.finish(finish_type, now);
                Ok(())
            }
            MessagePayload::Unknown { kind } => Err(TaskMessageError::UnknownMessage { kind }),
        }
    }

    /// Record a kill request. Idempotent; the first reason wins. The
    /// actual kill is performed by the scheduler on its next tick.
    pub fn request_kill(&mut self, reason: TaskKillReason) {
        if !self.kill_requested {
            self.kill_requested = true;
            self.kill_reason = Some(reason);
        }
    }

    /// The terminal kill action, performed only by the scheduler.
    ///
    /// - Created: finish directly, no worker exists yet.
    /// - Queued: no effect. The envelope is on the queue but unclaimed, so
    ///   there is no pid to signal; once a worker claims it the next tick
    ///   will find the task Executed and signal then.
    /// - Executed: signal the bound worker; a worker that already exited
    ///   is not an error.
    /// - Finished: no effect.
    pub fn kill(&mut self, signaler: &dyn ProcessSignaler, now: Instant) {
        match self.state {
            TaskState::Created => {
                self.finish(TaskFinishType::Kill, now);
            }
            TaskState::Queued => {}
            TaskState::Executed => {
                if let Some(pid) = self.worker_pid {
                    match signaler.terminate(pid) {
                        Ok(()) => {}
                        Err(SignalError::ProcessNotFound(_)) => {
                            debug!(task_id = %self.id, pid, "Worker already exited before kill");
                        }
                        Err(e) => {
                            warn!(task_id = %self.id, pid, error = %e, "Failed to signal worker");
                        }
                    }
                }
                self.finish(TaskFinishType::Kill, now);
            }
            TaskState::Finished => {}
        }
    }

    /// Force the task into Finished/InternalError. Used when the bound
    /// worker crashed or broke the message protocol.
    pub fn force_finish_internal_error(&mut self, now: Instant) {
        if self.state != TaskState::Finished {
            self.finish(TaskFinishType::InternalError, now);
        }
    }

    fn finish(&mut self, finish_type: TaskFinishType, now: Instant) {
        self.state = TaskState::Finished;
        self.finish_type = finish_type;
        // Entering Finished anchors the abandonment window even for tasks
        // that never received a message.
        self.last_message_at = Some(now);
    }

    /// An executing task whose worker has been silent for longer than the
    /// unresponsive window. Exactly at the window boundary the task is
    /// not yet defunct.
    pub fn is_defunct(&self, unresponsive_window: Duration, now: Instant) -> bool {
        self.state == TaskState::Executed && self.silent_longer_than(unresponsive_window, now)
    }

    /// A finished task whose caller has not collected the result within
    /// the abandonment window.
    pub fn is_abandoned(&self, abandoned_window: Duration, now: Instant) -> bool {
        self.state == TaskState::Finished && self.silent_longer_than(abandoned_window, now)
    }

    /// The caller-requested overall timeout has elapsed since creation.
    pub fn is_timed_out_overall(&self, now: Instant) -> bool {
        match self.overall_timeout {
            Some(timeout) => now.duration_since(self.created_at) > timeout,
            None => false,
        }
    }

    fn silent_longer_than(&self, window: Duration, now: Instant) -> bool {
        match self.last_message_at {
            Some(at) => now.duration_since(at) > window,
            None => false,
        }
    }

    /// Envelope assigning this task to a worker.
    pub fn dispatch_envelope(&self) -> DispatchEnvelope {
        DispatchEnvelope {
            task_id: self.id.clone(),
            command: self.command.clone(),
            auth_user: self.auth_user.clone(),
        }
    }

    /// Transition Created -> Queued when the dispatch envelope has been
    /// placed on the in-queue.
    pub fn mark_queued(&mut self) {
        debug_assert_eq!(TaskState::Created, self.state);
        self.state = TaskState::Queued;
    }

    /// Deep-copied snapshot for HTTP responses.
    pub fn to_dto(&self) -> TaskDto {
        TaskDto {
            task_id: self.id.clone(),
            command: self.command.clone(),
            state: self.state,
            task_finish_type: self.finish_type,
            result: self.result.clone(),
            reports: self.reports.clone(),
            kill_reason: self.kill_reason,
        }
    }
}
