use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{IntoMakeService, get},
};
use tower_http::cors::CorsLayer;

use crate::AppState;

pub mod event_stream;
pub mod revisions;
pub mod triggers;
pub mod workflows;

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub fn router(state: AppState) -> IntoMakeService<Router> {
    let base_routes = Router::new()
        .route("/health", get(health_check))
        .merge(workflows::router(&state))
        .merge(revisions::router(&state))
        .merge(triggers::router(&state))
        .route("/events/stream", get(event_stream::stream_all_events))
        .route(
            "/events/workflows/{workflow_id}",
            get(event_stream::stream_workflow_events),
        )
        .with_state(state);

    Router::new()
        .nest("/api", base_routes)
        .layer(CorsLayer::permissive())
        .into_make_service()
}
