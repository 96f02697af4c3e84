use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Sqlite, SqlitePool, Type, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use super::workflow::AgentType;

#[derive(Debug, Error)]
pub enum AgentMessageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Agent message not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS)]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MessageType {
    Request,
    Response,
    Error,
    StatusUpdate,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Request => write!(f, "request"),
            MessageType::Response => write!(f, "response"),
            MessageType::Error => write!(f, "error"),
            MessageType::StatusUpdate => write!(f, "status_update"),
        }
    }
}

/// Envelope exchanged with the worker agents. The same shape is written
/// to the audit table, so one struct serves as wire format and row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AgentMessage {
    pub message_id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: String,
    pub agent_type: AgentType,
    pub message_type: MessageType,
    #[ts(type = "unknown")]
    pub payload: Json<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl AgentMessage {
    /// Append to the audit trail. The caller owns the message id, so a
    /// collision is a programming error and surfaces as a database error.
    pub async fn create<'a, E>(executor: E, msg: &AgentMessage) -> Result<(), AgentMessageError>
    where
        E: sqlx::Executor<'a, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO agent_messages (message_id, workflow_id, step_id, agent_type, message_type, payload, timestamp, retry_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(msg.message_id)
        .bind(msg.workflow_id)
        .bind(&msg.step_id)
        .bind(msg.agent_type)
        .bind(msg.message_type)
        .bind(msg.payload.to_string())
        .bind(msg.timestamp)
        .bind(msg.retry_count)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Insert unless this message id has been seen before. Returns false
    /// on a duplicate, which is how transport redelivery is told apart
    /// from a first delivery.
    pub async fn record_once<'a, E>(
        executor: E,
        msg: &AgentMessage,
    ) -> Result<bool, AgentMessageError>
    where
        E: sqlx::Executor<'a, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO agent_messages (message_id, workflow_id, step_id, agent_type, message_type, payload, timestamp, retry_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(msg.message_id)
        .bind(msg.workflow_id)
        .bind(&msg.step_id)
        .bind(msg.agent_type)
        .bind(msg.message_type)
        .bind(msg.payload.to_string())
        .bind(msg.timestamp)
        .bind(msg.retry_count)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        message_id: Uuid,
    ) -> Result<Option<Self>, AgentMessageError> {
        let message = sqlx::query_as::<_, AgentMessage>(
            r#"
            SELECT * FROM agent_messages
            WHERE message_id = ?1
            "#,
        )
        .bind(message_id)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// Full exchange history for a workflow, oldest first.
    pub async fn find_by_workflow(
        pool: &SqlitePool,
        workflow_id: Uuid,
    ) -> Result<Vec<Self>, AgentMessageError> {
        let messages = sqlx::query_as::<_, AgentMessage>(
            r#"
            SELECT * FROM agent_messages
            WHERE workflow_id = ?1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    /// Human readable error out of an error payload.
    pub fn error_text(&self) -> String {
        self.payload
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.payload.to_string())
    }
}
