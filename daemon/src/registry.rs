//! Task registry: id-keyed ownership of all live task records
//!
//! The registry is the only component that owns task records; everything
//! else holds task ids and looks up through it. HTTP handlers reach it
//! through `create`, `get` and `kill` only; the scheduler uses the wider
//! crate-internal surface while holding the same lock, which makes each
//! tick atomic with respect to the HTTP mutators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shared::utils::generate_task_id;
use shared::{AuthUser, Command, TaskDto, TaskKillReason, TaskState};

use crate::clock::Clock;
use crate::task::Task;

/// Errors surfaced to HTTP callers by the registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task registry is at capacity ({0} live tasks)")]
    CapacityExceeded(usize),
    #[error("task '{0}' does not exist")]
    NotFound(String),
}

pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
    max_concurrent_tasks: usize,
    default_request_timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl TaskRegistry {
    pub fn new(
        max_concurrent_tasks: usize,
        default_request_timeout: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks: HashMap::new(),
            max_concurrent_tasks,
            default_request_timeout,
            clock,
        }
    }

    /// Create a new task in state Created and return its id.
    pub fn create(
        &mut self,
        command: Command,
        auth_user: AuthUser,
    ) -> Result<String, RegistryError> {
        if self.tasks.len() >= self.max_concurrent_tasks {
            return Err(RegistryError::CapacityExceeded(self.tasks.len()));
        }

        let mut task_id = generate_task_id();
        while self.tasks.contains_key(&task_id) {
            task_id = generate_task_id();
        }

        let task = Task::new(
            task_id.clone(),
            command,
            auth_user,
            self.default_request_timeout,
            self.clock.now(),
        );
        self.tasks.insert(task_id.clone(), task);
        Ok(task_id)
    }

    /// Deep-copied snapshot of one task.
    pub fn get(&self, task_id: &str) -> Result<TaskDto, RegistryError> {
        self.tasks
            .get(task_id)
            .map(Task::to_dto)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))
    }

    /// Record a kill request on a task. Idempotent; the signal itself is
    /// delivered by the scheduler.
    pub fn kill(&mut self, task_id: &str, reason: TaskKillReason) -> Result<(), RegistryError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
        task.request_kill(reason);
        Ok(())
    }

    /// Snapshots of all live tasks.
    pub fn list(&self) -> Vec<TaskDto> {
        self.tasks.values().map(Task::to_dto).collect()
    }

    /// Remove a record. Called only by the scheduler during garbage
    /// collection.
    pub fn delete(&mut self, task_id: &str) {
        self.tasks.remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(task_id)
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    /// The executing task bound to the given worker, if any. At most one
    /// task can reference a pid at a time.
    pub fn executed_task_by_pid_mut(&mut self, pid: u32) -> Option<&mut Task> {
        self.tasks
            .values_mut()
            .find(|task| task.state() == TaskState::Executed && task.worker_pid() == Some(pid))
    }

    /// The oldest task still waiting for dispatch (FIFO on creation time).
    pub fn oldest_created(&self) -> Option<String> {
        self.tasks
            .values()
            .filter(|task| task.state() == TaskState::Created)
            .min_by_key(|task| task.created_at())
            .map(|task| task.id().to_string())
    }

    /// Number of tasks currently holding a worker slot. A slot is held
    /// from dispatch (Queued) until the task reaches Finished.
    pub fn busy_slots(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| matches!(task.state(), TaskState::Queued | TaskState::Executed))
            .count()
    }
}
