use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool, Type, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Revision not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS)]
#[sqlx(type_name = "revision_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RevisionType {
    Content,
    Image,
}

impl std::fmt::Display for RevisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionType::Content => write!(f, "content"),
            RevisionType::Image => write!(f, "image"),
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS)]
#[sqlx(type_name = "revision_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RevisionStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionStatus::Pending => write!(f, "pending"),
            RevisionStatus::Completed => write!(f, "completed"),
            RevisionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A one-shot rework request against an already reviewed draft. Runs
/// outside the step pipeline: no queue hop, no retry budget.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Revision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub feedback: String,
    pub revision_type: RevisionType,
    pub status: RevisionStatus,
    pub user_id: String,
    #[ts(type = "unknown | null")]
    pub result: Option<Json<Value>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateRevision {
    pub feedback: String,
    pub revision_type: RevisionType,
    pub user_id: String,
}

impl Revision {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateRevision,
        id: Uuid,
    ) -> Result<Self, RevisionError> {
        let revision = sqlx::query_as::<_, Revision>(
            r#"
            INSERT INTO revisions (id, feedback, revision_type, user_id)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.feedback)
        .bind(data.revision_type)
        .bind(&data.user_id)
        .fetch_one(pool)
        .await?;

        Ok(revision)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, RevisionError> {
        let revision = sqlx::query_as::<_, Revision>(
            r#"
            SELECT * FROM revisions
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(revision)
    }

    pub async fn find_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, RevisionError> {
        let revisions = sqlx::query_as::<_, Revision>(
            r#"
            SELECT * FROM revisions
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(revisions)
    }

    pub async fn complete(
        pool: &SqlitePool,
        id: Uuid,
        result: &Value,
    ) -> Result<Self, RevisionError> {
        let revision = sqlx::query_as::<_, Revision>(
            r#"
            UPDATE revisions
            SET status = ?1, result = ?2, error = NULL
            WHERE id = ?3
            RETURNING *
            "#,
        )
        .bind(RevisionStatus::Completed)
        .bind(result.to_string())
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(RevisionError::NotFound)?;

        Ok(revision)
    }

    pub async fn fail(pool: &SqlitePool, id: Uuid, error: &str) -> Result<Self, RevisionError> {
        let revision = sqlx::query_as::<_, Revision>(
            r#"
            UPDATE revisions
            SET status = ?1, error = ?2
            WHERE id = ?3
            RETURNING *
            "#,
        )
        .bind(RevisionStatus::Failed)
        .bind(error)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(RevisionError::NotFound)?;

        Ok(revision)
    }
}
