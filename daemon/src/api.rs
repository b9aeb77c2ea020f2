//! REST API implementation for the cluster control daemon
//!
//! This module provides the HTTP endpoints through which callers submit
//! cluster management commands and poll their progress. Handlers are thin
//! adapters: they authenticate the caller, then call one of the
//! registry's synchronous, lock-protected mutators and translate the
//! outcome into an HTTP response. Task state itself is only ever advanced
//! by the scheduler.

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use shared::api::{
    endpoints, headers, CreateTaskRequest, CreateTaskResponse, KillTaskRequest, TaskIdentQuery,
    TaskListResponse,
};
use shared::utils::validate_task_id;
use shared::{AuthUser, TaskDto, TaskKillReason};

use crate::auth::AuthProvider;
use crate::registry::{RegistryError, TaskRegistry};

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    /// The task registry; the scheduler holds the same lock during ticks.
    pub registry: Arc<Mutex<TaskRegistry>>,
    /// Token table resolver for authenticating callers.
    pub auth_provider: Arc<AuthProvider>,
}

impl AppState {
    pub fn new(registry: Arc<Mutex<TaskRegistry>>, auth_provider: Arc<AuthProvider>) -> Self {
        Self {
            registry,
            auth_provider,
        }
    }
}

/// Creates the main API router and defines all the application's routes.
/// This function is called once at daemon startup to build the routing tree.
pub fn create_router(state: AppState) -> Router {
    // Command payloads are small; anything bigger is a caller bug.
    const MAX_REQUEST_SIZE: usize = 1024 * 1024;

    Router::new()
        // Unauthenticated health check for init systems and monitoring.
        .route("/health", get(health_check))
        .route(endpoints::TASK_CREATE, post(handle_task_create))
        .route(endpoints::TASK_RESULT, get(handle_task_result))
        .route(endpoints::TASK_KILL, post(handle_task_kill))
        .route(endpoints::TASK_LIST, get(handle_task_list))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

/// Resolve the caller's identity from the request headers.
///
/// The presented token selects the real principal; a superuser may then
/// downgrade to an effective user via the override headers.
fn authenticate(provider: &AuthProvider, headers_map: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = match headers_map.get(headers::AUTH_TOKEN) {
        Some(value) => match value.to_str() {
            Ok(token) if !token.is_empty() => token,
            _ => {
                warn!("Malformed auth token header");
                return Err(ApiError::Unauthorized);
            }
        },
        None => {
            warn!("Missing auth token header");
            return Err(ApiError::Unauthorized);
        }
    };

    let real_user = provider
        .auth_by_token(token)
        .ok_or(ApiError::Unauthorized)?;

    let desired_username = headers_map
        .get(headers::EFFECTIVE_USER)
        .and_then(|v| v.to_str().ok());
    let desired_groups = headers_map
        .get(headers::EFFECTIVE_GROUPS)
        .and_then(|v| v.to_str().ok());

    Ok(AuthProvider::effective_user(
        real_user,
        desired_username,
        desired_groups,
    ))
}

/// The handler for the `/health` endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cluster-control-daemon",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Accept a command and create a task for it. Returns the task id
/// immediately; execution happens asynchronously.
async fn handle_task_create(
    State(state): State<AppState>,
    headers_map: HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    let auth_user = authenticate(&state.auth_provider, &headers_map)?;

    if request.command.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Command name cannot be empty".to_string(),
        ));
    }

    let command_name = request.command.name.clone();
    let task_id = {
        let mut registry = state.registry.lock().await;
        registry.create(request.command, auth_user.clone())?
    };

    info!(
        task_id = %task_id,
        command = %command_name,
        username = %auth_user.username,
        "Task created"
    );
    Ok(Json(CreateTaskResponse { task_id }))
}

/// Snapshot of one task, identified by the `task_id` query parameter.
async fn handle_task_result(
    State(state): State<AppState>,
    headers_map: HeaderMap,
    Query(query): Query<TaskIdentQuery>,
) -> Result<Json<TaskDto>, ApiError> {
    authenticate(&state.auth_provider, &headers_map)?;

    validate_task_id(&query.task_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let registry = state.registry.lock().await;
    let dto = registry.get(&query.task_id)?;
    Ok(Json(dto))
}

/// Record a kill request on a task. The scheduler delivers the actual
/// signal on its next tick; killing is cooperative for tasks not yet
/// claimed by a worker.
async fn handle_task_kill(
    State(state): State<AppState>,
    headers_map: HeaderMap,
    Json(request): Json<KillTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth_user = authenticate(&state.auth_provider, &headers_map)?;

    validate_task_id(&request.task_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    {
        let mut registry = state.registry.lock().await;
        registry.kill(&request.task_id, TaskKillReason::User)?;
    }

    info!(
        task_id = %request.task_id,
        username = %auth_user.username,
        "Task kill requested"
    );
    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Snapshots of all live tasks.
async fn handle_task_list(
    State(state): State<AppState>,
    headers_map: HeaderMap,
) -> Result<Json<TaskListResponse>, ApiError> {
    authenticate(&state.auth_provider, &headers_map)?;

    let registry = state.registry.lock().await;
    Ok(Json(TaskListResponse {
        tasks: registry.list(),
    }))
}

/// Custom error types for the API.
/// Using a dedicated enum for API errors allows for consistent error
/// handling and response formatting.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Task registry is at capacity")]
    CapacityExceeded,
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(task_id) => ApiError::NotFound(task_id),
            RegistryError::CapacityExceeded(_) => ApiError::CapacityExceeded,
        }
    }
}

/// This implementation allows `ApiError` to be converted into an HTTP
/// response. If a handler returns `Result<_, ApiError>`, axum calls
/// `into_response` on the `Err` variant.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::CapacityExceeded => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"),
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}
