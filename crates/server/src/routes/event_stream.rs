use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
};
use chrono::{DateTime, Utc};
use db::models::workflow_event::WorkflowEvent;
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::{convert::Infallible, time::Duration};
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    /// Only return events after this timestamp
    pub since: Option<DateTime<Utc>>,
}

/// Stream lifecycle events for one workflow via SSE.
pub async fn stream_workflow_events(
    Path(workflow_id): Path<Uuid>,
    Query(query): Query<EventStreamQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let pool = state.db.pool.clone();
    let last_event_time = query
        .since
        .unwrap_or_else(|| Utc::now() - chrono::Duration::hours(1));

    let stream = stream::unfold(
        (pool, workflow_id, last_event_time),
        |(pool, workflow_id, mut since)| async move {
            // Poll every 500ms
            tokio::time::sleep(Duration::from_millis(500)).await;

            match WorkflowEvent::find_since(&pool, workflow_id, since).await {
                Ok(events) if !events.is_empty() => {
                    if let Some(last) = events.last() {
                        since = last.created_at;
                    }

                    let json = serde_json::to_string(&events).unwrap_or_else(|_| "[]".to_string());
                    let event = Event::default().data(json).event("workflow_events");

                    Some((Ok(event), (pool, workflow_id, since)))
                }
                Ok(_) => {
                    let event = Event::default().comment("keepalive");
                    Some((Ok(event), (pool, workflow_id, since)))
                }
                Err(e) => {
                    tracing::error!("Error fetching workflow events: {}", e);
                    let event = Event::default().comment("error");
                    Some((Ok(event), (pool, workflow_id, since)))
                }
            }
        },
    );

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// Stream recent lifecycle events across all workflows.
pub async fn stream_all_events(
    Query(query): Query<EventStreamQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let pool = state.db.pool.clone();
    let last_check = query
        .since
        .unwrap_or_else(|| Utc::now() - chrono::Duration::minutes(5));

    let stream = stream::unfold((pool, last_check), |(pool, mut since)| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;

        match WorkflowEvent::find_latest(&pool, 20).await {
            Ok(events) => {
                let new_events: Vec<_> = events
                    .into_iter()
                    .filter(|e| e.created_at > since)
                    .collect();

                if !new_events.is_empty() {
                    // Newest first, so the first entry moves the cursor.
                    if let Some(newest) = new_events.first() {
                        since = newest.created_at;
                    }

                    let json =
                        serde_json::to_string(&new_events).unwrap_or_else(|_| "[]".to_string());
                    let event = Event::default().data(json).event("all_events");
                    Some((Ok(event), (pool, since)))
                } else {
                    let event = Event::default().comment("keepalive");
                    Some((Ok(event), (pool, since)))
                }
            }
            Err(e) => {
                tracing::error!("Error fetching events: {}", e);
                let event = Event::default().comment("error");
                Some((Ok(event), (pool, since)))
            }
        }
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
