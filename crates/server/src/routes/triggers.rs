use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use services::services::events::InputTrigger;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/triggers", post(publish_trigger))
        .with_state(state.clone())
}

/// Accept an upstream trigger and put it on the broadcast channel. The
/// orchestrator picks it up asynchronously, so the reply only says the
/// trigger was taken, not that a workflow exists yet.
async fn publish_trigger(
    State(state): State<AppState>,
    Json(trigger): Json<InputTrigger>,
) -> Result<(StatusCode, Json<ApiResponse<()>>), ApiError> {
    state.events.publish_trigger(trigger);
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(()))))
}
