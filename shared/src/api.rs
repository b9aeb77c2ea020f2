//! API types and structures for the daemon's HTTP surface
//!
//! This module defines the request and response types used by the REST
//! endpoints through which callers submit commands and poll task results.

use serde::{Deserialize, Serialize};

use crate::tasks::{Command, TaskDto};

/// API endpoint paths, shared between the router and clients.
pub mod endpoints {
    pub const TASK_CREATE: &str = "/api/v1/task/create";
    pub const TASK_RESULT: &str = "/api/v1/task/result";
    pub const TASK_KILL: &str = "/api/v1/task/kill";
    pub const TASK_LIST: &str = "/api/v1/tasks";
}

/// HTTP header names used by the API.
pub mod headers {
    /// Bearer token identifying the caller.
    pub const AUTH_TOKEN: &str = "x-auth-token";
    /// Username a superuser wants to act as.
    pub const EFFECTIVE_USER: &str = "x-effective-user";
    /// Base64-encoded space-separated group list for the effective user.
    pub const EFFECTIVE_GROUPS: &str = "x-effective-groups";
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Request body for POST /api/v1/task/create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub command: Command,
}

/// Response body for POST /api/v1/task/create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
}

/// Query parameters for GET /api/v1/task/result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdentQuery {
    pub task_id: String,
}

/// Request body for POST /api/v1/task/kill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillTaskRequest {
    pub task_id: String,
}

/// Response body for GET /api/v1/tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_deserializes_minimal_body() {
        let request: CreateTaskRequest =
            serde_json::from_str(r#"{"command": {"name": "cluster_status"}}"#).unwrap();
        assert_eq!("cluster_status", request.command.name);
    }

    #[test]
    fn test_endpoints_are_versioned() {
        for endpoint in [
            endpoints::TASK_CREATE,
            endpoints::TASK_RESULT,
            endpoints::TASK_KILL,
            endpoints::TASK_LIST,
        ] {
            assert!(endpoint.starts_with("/api/v1/"));
        }
    }
}
