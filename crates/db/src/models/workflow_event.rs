use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use super::workflow::{StepType, WorkflowStatus};

#[derive(Debug, Error)]
pub enum WorkflowEventError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Workflow event not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS)]
#[sqlx(type_name = "event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EventType {
    StepCompleted,
    WorkflowCompleted,
    ErrorOccurred,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::StepCompleted => write!(f, "step_completed"),
            EventType::WorkflowCompleted => write!(f, "workflow_completed"),
            EventType::ErrorOccurred => write!(f, "error_occurred"),
        }
    }
}

/// Typed payloads for the lifecycle events.
///
/// `StepCompleted` with status "started" is emitted when a step is
/// dispatched, not when it finishes. The misleading event name predates
/// this service and downstream consumers match on it, so it stays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
#[ts(export)]
pub enum EventPayload {
    StepCompleted {
        step_type: StepType,
        status: String,
    },
    WorkflowCompleted {
        status: WorkflowStatus,
        completed_steps: i32,
        total_steps: i32,
    },
    ErrorOccurred {
        error: String,
        step_type: StepType,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::StepCompleted { .. } => EventType::StepCompleted,
            EventPayload::WorkflowCompleted { .. } => EventType::WorkflowCompleted,
            EventPayload::ErrorOccurred { .. } => EventType::ErrorOccurred,
        }
    }
}

/// One lifecycle event, written in the same transaction as the workflow
/// state it describes. `published_at` is NULL until the relay has pushed
/// the event to subscribers, which makes the table a durable outbox.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: Option<String>,
    pub event_type: EventType,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl WorkflowEvent {
    pub async fn record<'a, E>(
        executor: E,
        workflow_id: Uuid,
        step_id: Option<&str>,
        payload: &EventPayload,
    ) -> Result<Self, WorkflowEventError>
    where
        E: sqlx::Executor<'a, Database = Sqlite>,
    {
        let data = serde_json::to_string(payload)
            .map_err(|e| WorkflowEventError::Database(sqlx::Error::Encode(Box::new(e))))?;

        let event = sqlx::query_as::<_, WorkflowEvent>(
            r#"
            INSERT INTO workflow_events (id, workflow_id, step_id, event_type, data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workflow_id)
        .bind(step_id)
        .bind(payload.event_type())
        .bind(data)
        .fetch_one(executor)
        .await?;

        Ok(event)
    }

    /// Events for a workflow, oldest first.
    pub async fn find_by_workflow(
        pool: &SqlitePool,
        workflow_id: Uuid,
    ) -> Result<Vec<Self>, WorkflowEventError> {
        let events = sqlx::query_as::<_, WorkflowEvent>(
            r#"
            SELECT * FROM workflow_events
            WHERE workflow_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(pool)
        .await?;

        Ok(events)
    }

    /// Events for a workflow after a timestamp (for polling/streaming).
    pub async fn find_since(
        pool: &SqlitePool,
        workflow_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Self>, WorkflowEventError> {
        let events = sqlx::query_as::<_, WorkflowEvent>(
            r#"
            SELECT * FROM workflow_events
            WHERE workflow_id = ?1 AND created_at > ?2
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(workflow_id)
        .bind(since)
        .fetch_all(pool)
        .await?;

        Ok(events)
    }

    /// Latest events across all workflows (for the dashboard).
    pub async fn find_latest(
        pool: &SqlitePool,
        limit: i64,
    ) -> Result<Vec<Self>, WorkflowEventError> {
        let events = sqlx::query_as::<_, WorkflowEvent>(
            r#"
            SELECT * FROM workflow_events
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(events)
    }

    /// Recorded events the relay has not pushed out yet, oldest first.
    pub async fn find_unpublished(
        pool: &SqlitePool,
        limit: i64,
    ) -> Result<Vec<Self>, WorkflowEventError> {
        let events = sqlx::query_as::<_, WorkflowEvent>(
            r#"
            SELECT * FROM workflow_events
            WHERE published_at IS NULL
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(events)
    }

    pub async fn mark_published(pool: &SqlitePool, id: Uuid) -> Result<(), WorkflowEventError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_events
            SET published_at = datetime('now', 'subsec')
            WHERE id = ?1 AND published_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowEventError::NotFound);
        }

        Ok(())
    }

    /// Parse the stored data as a typed payload.
    pub fn payload(&self) -> Option<EventPayload> {
        serde_json::from_str(&self.data).ok()
    }
}
