use chrono::Utc;
use db::{
    DBService,
    models::{
        agent_message::{AgentMessage, AgentMessageError, MessageType},
        queue_message::QueueName,
        workflow::{Step, StepStatus, Workflow, WorkflowError, WorkflowStatus},
        workflow_event::{EventPayload, WorkflowEventError},
    },
};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{
    events::EventService,
    queue::{QueueError, WorkQueue},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Message(#[from] AgentMessageError),
    #[error(transparent)]
    Event(#[from] WorkflowEventError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Failed to encode request payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("Step '{step_id}' not found in workflow {workflow_id}")]
    StepNotFound { workflow_id: Uuid, step_id: String },
    #[error("Workflow {0} is terminal and takes no more dispatches")]
    WorkflowTerminal(Uuid),
    #[error("Step '{step_id}' of workflow {workflow_id} already finished")]
    StepFinished { workflow_id: Uuid, step_id: String },
    #[error("Step '{step_id}' of workflow {workflow_id} is not the active step '{current_step}'")]
    StepNotCurrent {
        workflow_id: Uuid,
        step_id: String,
        current_step: String,
    },
}

/// Body of a request message, the part a worker agent actually reads.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPayload<'a> {
    workflow_id: Uuid,
    step_id: &'a str,
    input: Value,
    user_id: &'a str,
    context: RequestContext<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestContext<'a> {
    previous_steps: Vec<&'a Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_preferences: Option<&'a Value>,
}

/// Hands a step to its worker agent: marks the step in progress, writes
/// the request to the audit trail and the outbox event, then enqueues
/// the request on the step's queue.
#[derive(Clone)]
pub struct StepDispatcher {
    db: DBService,
    queue: WorkQueue,
    events: EventService,
}

impl StepDispatcher {
    pub fn new(db: DBService, queue: WorkQueue, events: EventService) -> Self {
        Self { db, queue, events }
    }

    /// Dispatch one step of a workflow. Reloads the workflow so the
    /// version check runs against the latest row, then commits the step
    /// mutation, the audit entry and the lifecycle event together. The
    /// queue send happens after the commit; a crash in between leaves a
    /// consistent workflow with an idle step. Only the step the
    /// workflow's cursor currently points at is accepted.
    pub async fn dispatch(
        &self,
        workflow_id: Uuid,
        step_id: &str,
    ) -> Result<AgentMessage, DispatchError> {
        let Some(workflow) = Workflow::find_by_id(&self.db.pool, workflow_id).await? else {
            return Err(DispatchError::WorkflowNotFound(workflow_id));
        };
        if workflow.is_terminal() {
            return Err(DispatchError::WorkflowTerminal(workflow_id));
        }

        let Some(index) = workflow.step_index(step_id) else {
            tracing::error!(
                "[DISPATCHER] Step '{}' not found in workflow {}",
                step_id,
                workflow_id
            );
            return Err(DispatchError::StepNotFound {
                workflow_id,
                step_id: step_id.to_string(),
            });
        };

        if workflow.steps[index].status.is_terminal() {
            return Err(DispatchError::StepFinished {
                workflow_id,
                step_id: step_id.to_string(),
            });
        }

        // Steps run one at a time, in plan order. Dispatching anything
        // but the step the cursor points at would leave two steps in
        // progress and skip the ones in between.
        if step_id != workflow.current_step {
            return Err(DispatchError::StepNotCurrent {
                workflow_id,
                step_id: step_id.to_string(),
                current_step: workflow.current_step.clone(),
            });
        }

        let step_type = workflow.steps[index].step_type;
        let input = workflow.steps[index]
            .input
            .clone()
            .unwrap_or_else(|| Value::String(workflow.metadata.original_input.clone()));

        let payload = RequestPayload {
            workflow_id,
            step_id,
            input,
            user_id: &workflow.user_id,
            context: RequestContext {
                previous_steps: workflow.completed_steps(),
                user_preferences: workflow.metadata.user_preferences.as_ref(),
            },
        };

        let message = AgentMessage {
            message_id: Uuid::new_v4(),
            workflow_id,
            step_id: step_id.to_string(),
            agent_type: step_type.agent_type(),
            message_type: MessageType::Request,
            payload: Json(serde_json::to_value(&payload)?),
            timestamp: Utc::now(),
            retry_count: workflow.steps[index].retry_count,
        };

        let mut steps = workflow.steps.0.clone();
        steps[index].status = StepStatus::InProgress;
        steps[index].started_at = Some(Utc::now());

        // First dispatch moves the workflow out of initiated.
        let status = if workflow.status == WorkflowStatus::Initiated {
            WorkflowStatus::ContentGeneration
        } else {
            workflow.status
        };

        let mut tx = self.db.pool.begin().await?;
        Workflow::replace(
            &mut *tx,
            workflow_id,
            workflow.version,
            status,
            step_id,
            &steps,
        )
        .await?;
        AgentMessage::create(&mut *tx, &message).await?;
        self.events
            .record(
                &mut *tx,
                workflow_id,
                Some(step_id),
                &EventPayload::StepCompleted {
                    step_type,
                    status: "started".to_string(),
                },
            )
            .await?;
        tx.commit().await?;

        let queue = QueueName::for_step(step_type);
        self.queue.send(queue, &message).await?;
        tracing::info!(
            "[DISPATCHER] Dispatched step '{}' of workflow {} to '{}'",
            step_id,
            workflow_id,
            queue
        );

        Ok(message)
    }
}
