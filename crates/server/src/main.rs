use std::sync::Arc;

use anyhow::Error as AnyhowError;
use db::DBService;
use server::{AppState, routes};
use services::services::{
    config::OrchestratorConfig,
    events::EventService,
    orchestrator::Orchestrator,
    queue::WorkQueue,
    revisions::{HttpGenerationAgent, RevisionService},
};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, prelude::*};
use utils::assets::asset_dir;

#[derive(Debug, Error)]
pub enum DraftflowError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[tokio::main]
async fn main() -> Result<(), DraftflowError> {
    // Load environment variables from `.env` if present so local development picks up overrides
    dotenv::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    // Create asset directory if it doesn't exist
    if !asset_dir().exists() {
        std::fs::create_dir_all(asset_dir())?;
    }

    let db = DBService::new().await?;
    let config = OrchestratorConfig::from_env();

    let queue = WorkQueue::new(
        db.clone(),
        config.visibility_timeout_secs,
        config.max_receive_count,
    );
    let events = EventService::new(db.clone());
    let orchestrator = Orchestrator::new(db.clone(), queue, events.clone(), config.clone());
    let revisions = RevisionService::new(
        db.clone(),
        Arc::new(HttpGenerationAgent::new(config.generation_agent_url.clone())),
    );

    events.start_relay(config.outbox_poll_interval_ms).await?;
    orchestrator.start().await?;

    let state = AppState {
        db,
        events,
        orchestrator,
        revisions,
    };
    let app_router = routes::router(state);

    let port = std::env::var("BACKEND_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .unwrap_or(8600);
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let actual_port = listener.local_addr()?.port();
    tracing::info!("Server running on http://{host}:{actual_port}");

    axum::serve(listener, app_router).await?;

    Ok(())
}
