use std::str::FromStr;

use chrono::Utc;
use db::{
    DBService,
    models::{
        agent_message::{AgentMessage, MessageType},
        queue_message::QueueMessage,
        workflow::{AgentType, CreateWorkflow, Workflow, WorkflowMetadata},
    },
};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
};
use uuid::Uuid;

use crate::services::{
    config::OrchestratorConfig,
    dispatcher::StepDispatcher,
    events::EventService,
    orchestrator::{self, Orchestrator},
    processor::{InboundMessage, ResponseProcessor},
    queue::WorkQueue,
};

/// Private in-memory database per test, run through the real migrations.
/// The single connection keeps the database alive.
pub(crate) async fn setup_db() -> DBService {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid sqlite url")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect to in-memory sqlite");

    sqlx::migrate!("../db/migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    DBService::from_pool(pool)
}

pub(crate) fn work_queue(db: &DBService) -> WorkQueue {
    WorkQueue::new(db.clone(), 30, 5)
}

pub(crate) fn step_dispatcher(db: &DBService) -> StepDispatcher {
    StepDispatcher::new(db.clone(), work_queue(db), EventService::new(db.clone()))
}

pub(crate) fn response_processor(db: &DBService) -> ResponseProcessor {
    ResponseProcessor::new(db.clone(), step_dispatcher(db), EventService::new(db.clone()))
}

pub(crate) fn orchestrator(db: &DBService) -> Orchestrator {
    Orchestrator::new(
        db.clone(),
        work_queue(db),
        EventService::new(db.clone()),
        OrchestratorConfig::default(),
    )
}

pub(crate) async fn seed_workflow(db: &DBService) -> Workflow {
    let plan = orchestrator::step_plan();
    let data = CreateWorkflow {
        user_id: "user-7".to_string(),
        input_id: "input-42".to_string(),
        current_step: plan[0].step_id.clone(),
        steps: plan,
        metadata: WorkflowMetadata {
            original_input: "Write about the history of sourdough".to_string(),
            user_preferences: None,
        },
    };

    Workflow::create(&db.pool, &data, Uuid::new_v4())
        .await
        .expect("seed workflow")
}

/// A request envelope with no workflow behind it, for queue level tests.
pub(crate) fn test_request_message() -> AgentMessage {
    AgentMessage {
        message_id: Uuid::new_v4(),
        workflow_id: Uuid::new_v4(),
        step_id: "content-generation".to_string(),
        agent_type: AgentType::ContentGenerator,
        message_type: MessageType::Request,
        payload: Json(serde_json::json!({"input": "draft me"})),
        timestamp: Utc::now(),
        retry_count: 0,
    }
}

pub(crate) fn inbound_body_of(delivery: &QueueMessage) -> InboundMessage {
    serde_json::from_str(&delivery.body).expect("queue body parses")
}

fn inbound(
    workflow: &Workflow,
    step_id: &str,
    message_type: MessageType,
    payload: Value,
) -> InboundMessage {
    InboundMessage {
        message_id: Uuid::new_v4(),
        workflow_id: workflow.id,
        step_id: step_id.to_string(),
        message_type,
        payload,
        timestamp: Utc::now(),
        retry_count: 0,
    }
}

pub(crate) fn inbound_response(
    workflow: &Workflow,
    step_id: &str,
    payload: Value,
) -> InboundMessage {
    inbound(workflow, step_id, MessageType::Response, payload)
}

pub(crate) fn inbound_error(workflow: &Workflow, step_id: &str, error: &str) -> InboundMessage {
    inbound(
        workflow,
        step_id,
        MessageType::Error,
        serde_json::json!({"error": error}),
    )
}

pub(crate) fn inbound_status(workflow: &Workflow, step_id: &str) -> InboundMessage {
    inbound(
        workflow,
        step_id,
        MessageType::StatusUpdate,
        serde_json::json!({"progress": "halfway"}),
    )
}
