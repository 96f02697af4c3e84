use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use db::models::{
    agent_message::AgentMessage, workflow::Workflow, workflow_event::WorkflowEvent,
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkflowsQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub since: Option<DateTime<Utc>>,
}

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/events", get(list_events))
        .route("/workflows/{id}/messages", get(list_messages))
        .route(
            "/workflows/{id}/steps/{step_id}/dispatch",
            post(dispatch_step),
        )
        .with_state(state.clone())
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ApiResponse<Vec<Workflow>>>, ApiError> {
    let workflows = match query.user_id {
        Some(user_id) => Workflow::find_by_user(&state.db.pool, &user_id).await?,
        None => Workflow::find_recent(&state.db.pool, query.limit.unwrap_or(50)).await?,
    };
    Ok(Json(ApiResponse::success(workflows)))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Workflow>>, ApiError> {
    let workflow = Workflow::find_by_id(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found".into()))?;
    Ok(Json(ApiResponse::success(workflow)))
}

async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowEvent>>>, ApiError> {
    let events = match query.since {
        Some(since) => WorkflowEvent::find_since(&state.db.pool, id, since).await?,
        None => WorkflowEvent::find_by_workflow(&state.db.pool, id).await?,
    };
    Ok(Json(ApiResponse::success(events)))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<AgentMessage>>>, ApiError> {
    let messages = AgentMessage::find_by_workflow(&state.db.pool, id).await?;
    Ok(Json(ApiResponse::success(messages)))
}

/// Manual re-dispatch for a step that is stuck idle, for example after a
/// crash between a commit and the queue send.
async fn dispatch_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(Uuid, String)>,
) -> Result<Json<ApiResponse<AgentMessage>>, ApiError> {
    let message = state.orchestrator.dispatcher().dispatch(id, &step_id).await?;
    Ok(Json(ApiResponse::success(message)))
}
