use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use db::models::revision::{CreateRevision, Revision};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListRevisionsQuery {
    pub limit: Option<i64>,
}

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/revisions", get(list_revisions).post(create_revision))
        .route("/revisions/{id}", get(get_revision))
        .with_state(state.clone())
}

/// Submit a rework request. The generation agent is called inline, so
/// the response already carries the completed or failed revision.
async fn create_revision(
    State(state): State<AppState>,
    Json(payload): Json<CreateRevision>,
) -> Result<(StatusCode, Json<ApiResponse<Revision>>), ApiError> {
    let revision = state.revisions.submit(&payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(revision))))
}

async fn get_revision(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Revision>>, ApiError> {
    let revision = Revision::find_by_id(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Revision not found".into()))?;
    Ok(Json(ApiResponse::success(revision)))
}

async fn list_revisions(
    State(state): State<AppState>,
    Query(query): Query<ListRevisionsQuery>,
) -> Result<Json<ApiResponse<Vec<Revision>>>, ApiError> {
    let revisions = Revision::find_recent(&state.db.pool, query.limit.unwrap_or(50)).await?;
    Ok(Json(ApiResponse::success(revisions)))
}
