use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Sqlite, SqlitePool, Type, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Workflow not found")]
    NotFound,
    #[error("Workflow id already exists")]
    DuplicateId,
    #[error("Workflow was modified by another writer")]
    VersionConflict,
}

/// Coarse pipeline position. Terminal states never transition again.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS)]
#[sqlx(type_name = "workflow_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum WorkflowStatus {
    Initiated,
    ContentGeneration,
    ReviewReady,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::ReviewReady | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Initiated => write!(f, "initiated"),
            WorkflowStatus::ContentGeneration => write!(f, "content_generation"),
            WorkflowStatus::ReviewReady => write!(f, "review_ready"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "step_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StepType {
    ContentGeneration,
    ImageGeneration,
    Review,
}

impl StepType {
    /// The agent expected to handle requests for this step.
    pub fn agent_type(&self) -> AgentType {
        match self {
            StepType::ContentGeneration => AgentType::ContentGenerator,
            StepType::ImageGeneration => AgentType::ImageGenerator,
            StepType::Review => AgentType::Reviewer,
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::ContentGeneration => write!(f, "content_generation"),
            StepType::ImageGeneration => write!(f, "image_generation"),
            StepType::Review => write!(f, "review"),
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "agent_type", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum AgentType {
    ContentGenerator,
    ImageGenerator,
    Reviewer,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::ContentGenerator => write!(f, "content-generator"),
            AgentType::ImageGenerator => write!(f, "image-generator"),
            AgentType::Reviewer => write!(f, "reviewer"),
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS)]
#[sqlx(type_name = "step_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One entry of a workflow's step plan. Stored as JSON inside the
/// workflow row, never as its own table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Step {
    pub step_id: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown | null")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown | null")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(step_id: &str, step_type: StepType, max_retries: u32) -> Self {
        Step {
            step_id: step_id.to_string(),
            step_type,
            status: StepStatus::Pending,
            agent_type: step_type.agent_type(),
            input: None,
            output: None,
            error: None,
            retry_count: 0,
            max_retries,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WorkflowMetadata {
    pub original_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "Record<string, unknown> | null")]
    pub user_preferences: Option<Value>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: String,
    pub input_id: String,
    pub status: WorkflowStatus,
    pub current_step: String,
    #[ts(type = "Array<Step>")]
    pub steps: Json<Vec<Step>>,
    #[ts(type = "WorkflowMetadata")]
    pub metadata: Json<WorkflowMetadata>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateWorkflow {
    pub user_id: String,
    pub input_id: String,
    pub current_step: String,
    pub steps: Vec<Step>,
    pub metadata: WorkflowMetadata,
}

impl Workflow {
    /// Insert a freshly planned workflow. Rejects an id that is already
    /// taken instead of overwriting it.
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateWorkflow,
        id: Uuid,
    ) -> Result<Self, WorkflowError> {
        let steps = serde_json::to_string(&data.steps)
            .map_err(|e| WorkflowError::Database(sqlx::Error::Encode(Box::new(e))))?;
        let metadata = serde_json::to_string(&data.metadata)
            .map_err(|e| WorkflowError::Database(sqlx::Error::Encode(Box::new(e))))?;

        let result = sqlx::query_as::<_, Workflow>(
            r#"
            INSERT INTO workflows (id, user_id, input_id, status, current_step, steps, metadata, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.user_id)
        .bind(&data.input_id)
        .bind(WorkflowStatus::Initiated)
        .bind(&data.current_step)
        .bind(steps)
        .bind(metadata)
        .fetch_one(pool)
        .await;

        match result {
            Ok(workflow) => Ok(workflow),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(WorkflowError::DuplicateId)
            }
            Err(e) => Err(WorkflowError::Database(e)),
        }
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<Self>, WorkflowError> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT * FROM workflows
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(workflow)
    }

    pub async fn find_by_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<Self>, WorkflowError> {
        let workflows = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT * FROM workflows
            WHERE user_id = ?1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(workflows)
    }

    /// Most recently created workflows (for the dashboard).
    pub async fn find_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, WorkflowError> {
        let workflows = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT * FROM workflows
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(workflows)
    }

    /// Overwrite the mutable portion of a workflow, but only if nobody
    /// else has written it since `expected_version` was read. The version
    /// column advances by one on every successful write.
    pub async fn replace<'a, E>(
        executor: E,
        id: Uuid,
        expected_version: i64,
        status: WorkflowStatus,
        current_step: &str,
        steps: &[Step],
    ) -> Result<(), WorkflowError>
    where
        E: sqlx::Executor<'a, Database = Sqlite>,
    {
        let steps_json = serde_json::to_string(steps)
            .map_err(|e| WorkflowError::Database(sqlx::Error::Encode(Box::new(e))))?;

        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET status = ?1,
                current_step = ?2,
                steps = ?3,
                version = version + 1,
                updated_at = datetime('now', 'subsec')
            WHERE id = ?4 AND version = ?5
            "#,
        )
        .bind(status)
        .bind(current_step)
        .bind(steps_json)
        .bind(id)
        .bind(expected_version)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::VersionConflict);
        }

        Ok(())
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }

    pub fn completed_steps(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
