use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info, warn};

use crewforge_core::config::ApiKeyRole;
use crewforge_core::error::{CrewForgeError, ErrorClass};
use crewforge_core::workflow::{ListQuery, NewWorkflow, RunRequest, WorkflowPatch};
use crewforge_tools::ToolRef;

use crate::auth;
use crate::middleware::Authenticated;
use crate::state::AppState;

/// Error response body: `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<CrewForgeError> for ApiError {
    fn from(e: CrewForgeError) -> Self {
        match &e {
            CrewForgeError::WorkflowNotFound(_) => Self::new(StatusCode::NOT_FOUND, "Workflow not found"),
            CrewForgeError::Json(_) | CrewForgeError::ToolValidation(_) => {
                Self::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            _ => match e.class() {
                ErrorClass::Configuration | ErrorClass::Structural => Self::new(
                    StatusCode::BAD_REQUEST,
                    format!("Workflow configuration error: {e}"),
                ),
                ErrorClass::Environment => Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
                ErrorClass::Execution => {
                    error!(error = %e, "Request failed");
                    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
            },
        }
    }
}

fn run_status(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Configuration | ErrorClass::Structural => StatusCode::BAD_REQUEST,
        ErrorClass::Environment => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Execution => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn require_viewer(role: &ApiKeyRole) -> Result<(), ApiError> {
    if auth::has_viewer_access(role) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::FORBIDDEN, "Forbidden"))
    }
}

fn require_operator(role: &ApiKeyRole) -> Result<(), ApiError> {
    if auth::has_operator_access(role) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::FORBIDDEN, "Forbidden"))
    }
}

// GET /
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the crewforge workflow API" }))
}

// GET /healthz
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /tools
pub async fn list_tools(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    require_viewer(&auth.role)?;
    Ok(Json(state.service.builder().registry().list_definitions()))
}

// GET /tools/{id}: id or numeric alias
pub async fn get_tool(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_viewer(&auth.role)?;
    ToolRef::parse(&id)
        .and_then(|r| state.service.builder().registry().definition(&r))
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Tool not found"))
}

// POST /workflows
pub async fn create_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewWorkflow>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&auth.role)?;
    let workflow = state.service.create(body).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

// GET /workflows?skip=0&limit=100
pub async fn list_workflows(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_viewer(&auth.role)?;
    Ok(Json(state.service.list(query).await?))
}

// GET /workflows/{id}
pub async fn get_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_viewer(&auth.role)?;
    Ok(Json(state.service.get(&id).await?))
}

// PUT /workflows/{id}
pub async fn replace_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<NewWorkflow>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&auth.role)?;
    Ok(Json(state.service.replace(&id, body).await?))
}

// POST /workflows/{id}/update
pub async fn update_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<WorkflowPatch>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&auth.role)?;
    Ok(Json(state.service.update(&id, body).await?))
}

// POST /workflows/{id}/delete
pub async fn delete_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&auth.role)?;
    match state.service.delete(&id).await {
        Ok(()) => Ok(Json(json!({ "message": "Workflow marked as deleted successfully" }))),
        Err(CrewForgeError::WorkflowNotFound(_)) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "Workflow not found or already deleted",
        )),
        Err(e) => Err(e.into()),
    }
}

// POST /workflows/{id}/plan
pub async fn plan_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&auth.role)?;
    Ok(Json(state.service.plan(&id).await?))
}

// POST /workflows/{id}/run: body is optional
pub async fn run_workflow(
    Authenticated(auth): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&auth.role)?;
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid run payload: {e}")))?
    };

    info!(workflow_id = %id, caller = %auth.name, "Run requested");
    let cancel = state.shutdown.child_token();
    let mut outcome = state.service.run(&id, request, &cancel).await?;

    let status = match outcome.error_kind {
        None => StatusCode::OK,
        Some(class) => {
            let status = run_status(class);
            if class == ErrorClass::Execution {
                outcome.error = Some(format!(
                    "Workflow execution failed, see server logs for run {}",
                    outcome.run_id
                ));
            } else {
                warn!(workflow_id = %id, run_id = %outcome.run_id, status = status.as_u16(), "Run rejected");
            }
            status
        }
    };
    Ok((status, Json(outcome)))
}
