use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use super::workflow::{CreateWorkflow, Step, StepType, Workflow, WorkflowMetadata};

// Private in-memory database per pool, so tests never observe each
// other's rows. The single connection keeps the database alive.
pub(crate) async fn setup_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("invalid sqlite config")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open sqlite memory db");

    bootstrap_schema(&pool).await;

    pool
}

async fn bootstrap_schema(pool: &SqlitePool) {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS workflows (
            id BLOB PRIMARY KEY,
            user_id TEXT NOT NULL,
            input_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'initiated',
            current_step TEXT NOT NULL,
            steps TEXT NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            version INTEGER NOT NULL DEFAULT 0
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS agent_messages (
            message_id BLOB PRIMARY KEY,
            workflow_id BLOB NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
            step_id TEXT NOT NULL,
            agent_type TEXT NOT NULL,
            message_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id BLOB PRIMARY KEY,
            queue TEXT NOT NULL,
            body TEXT NOT NULL,
            enqueued_at TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            visible_at TEXT NOT NULL,
            receive_count INTEGER NOT NULL DEFAULT 0,
            dead_lettered_at TEXT
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS workflow_events (
            id BLOB PRIMARY KEY,
            workflow_id BLOB NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
            step_id TEXT,
            event_type TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            published_at TEXT
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            id BLOB PRIMARY KEY,
            timestamp TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            feedback TEXT NOT NULL,
            revision_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            user_id TEXT NOT NULL,
            result TEXT,
            error TEXT
        );
        "#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("failed to bootstrap schema");
    }
}

/// The standard three step plan with production retry budgets.
pub(crate) fn test_step_plan() -> Vec<Step> {
    vec![
        Step::new("content-generation", StepType::ContentGeneration, 3),
        Step::new("image-generation", StepType::ImageGeneration, 3),
        Step::new("review", StepType::Review, 1),
    ]
}

pub(crate) fn test_create_workflow(user_id: &str, input_id: &str) -> CreateWorkflow {
    CreateWorkflow {
        user_id: user_id.to_string(),
        input_id: input_id.to_string(),
        current_step: "content-generation".to_string(),
        steps: test_step_plan(),
        metadata: WorkflowMetadata {
            original_input: "Write about the history of sourdough".to_string(),
            user_preferences: None,
        },
    }
}

pub(crate) async fn seed_workflow(pool: &SqlitePool) -> Workflow {
    Workflow::create(pool, &test_create_workflow("user-1", "input-1"), Uuid::new_v4())
        .await
        .expect("failed to seed workflow")
}
