use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        agent_message::{AgentMessage, AgentMessageError, MessageType},
        workflow::{AgentType, StepStatus, Workflow, WorkflowError, WorkflowStatus},
        workflow_event::{EventPayload, WorkflowEventError},
    },
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::types::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{
    dispatcher::{DispatchError, StepDispatcher},
    events::EventService,
};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Message(#[from] AgentMessageError),
    #[error(transparent)]
    Event(#[from] WorkflowEventError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("Step '{step_id}' not found in workflow {workflow_id}")]
    StepNotFound { workflow_id: Uuid, step_id: String },
}

/// What a worker agent puts on the response queue. Thinner than the
/// audit envelope: agents do not report their own registry name, so
/// `agentType` is filled in from the addressed step when the message is
/// recorded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: String,
    pub message_type: MessageType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl InboundMessage {
    fn to_audit(&self, agent_type: AgentType) -> AgentMessage {
        AgentMessage {
            message_id: self.message_id,
            workflow_id: self.workflow_id,
            step_id: self.step_id.clone(),
            agent_type,
            message_type: self.message_type,
            payload: Json(self.payload.clone()),
            timestamp: self.timestamp,
            retry_count: self.retry_count,
        }
    }
}

/// How a processed message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The message changed workflow state.
    Applied,
    /// Transport redelivery of a message that was already applied.
    Duplicate,
    /// Audited but deliberately not applied, for example a late response
    /// for a step that already finished.
    Ignored,
}

/// Applies agent responses to workflow state: a response completes the
/// step and advances the pipeline, an error spends one unit of the
/// step's retry budget, a status update is only recorded.
///
/// Every state change and its audit entry commit in one transaction
/// guarded by the workflow version, so two pollers racing on the same
/// workflow cannot both win.
#[derive(Clone)]
pub struct ResponseProcessor {
    db: DBService,
    dispatcher: StepDispatcher,
    events: EventService,
}

impl ResponseProcessor {
    pub fn new(db: DBService, dispatcher: StepDispatcher, events: EventService) -> Self {
        Self {
            db,
            dispatcher,
            events,
        }
    }

    pub async fn process(&self, inbound: &InboundMessage) -> Result<ProcessOutcome, ProcessError> {
        let Some(workflow) = Workflow::find_by_id(&self.db.pool, inbound.workflow_id).await? else {
            return Err(ProcessError::WorkflowNotFound(inbound.workflow_id));
        };
        let Some(index) = workflow.step_index(&inbound.step_id) else {
            return Err(ProcessError::StepNotFound {
                workflow_id: inbound.workflow_id,
                step_id: inbound.step_id.clone(),
            });
        };

        let message = inbound.to_audit(workflow.steps[index].agent_type);

        if workflow.is_terminal() {
            if !AgentMessage::record_once(&self.db.pool, &message).await? {
                return Ok(ProcessOutcome::Duplicate);
            }
            tracing::info!(
                "[PROCESSOR] Workflow {} is {}, ignoring {} for step '{}'",
                workflow.id,
                workflow.status,
                message.message_type,
                message.step_id
            );
            return Ok(ProcessOutcome::Ignored);
        }

        match message.message_type {
            MessageType::Response => self.apply_response(&workflow, index, &message).await,
            MessageType::Error => self.apply_error(&workflow, index, &message).await,
            MessageType::StatusUpdate => {
                if !AgentMessage::record_once(&self.db.pool, &message).await? {
                    return Ok(ProcessOutcome::Duplicate);
                }
                tracing::debug!(
                    "[PROCESSOR] Status update for step '{}' of workflow {}: {}",
                    message.step_id,
                    workflow.id,
                    message.payload.0
                );
                Ok(ProcessOutcome::Applied)
            }
            MessageType::Request => {
                AgentMessage::record_once(&self.db.pool, &message).await?;
                tracing::warn!(
                    "[PROCESSOR] Request message {} arrived on the response path",
                    message.message_id
                );
                Ok(ProcessOutcome::Ignored)
            }
        }
    }

    /// A response completes the addressed step. If a later step exists
    /// the workflow advances and that step is dispatched, otherwise the
    /// whole pipeline is done and parks in review_ready.
    async fn apply_response(
        &self,
        workflow: &Workflow,
        index: usize,
        message: &AgentMessage,
    ) -> Result<ProcessOutcome, ProcessError> {
        let step = &workflow.steps[index];
        if step.status.is_terminal() {
            if !AgentMessage::record_once(&self.db.pool, message).await? {
                tracing::info!(
                    "[PROCESSOR] Duplicate delivery of message {}, acking without effect",
                    message.message_id
                );
                return Ok(ProcessOutcome::Duplicate);
            }
            tracing::info!(
                "[PROCESSOR] Step '{}' of workflow {} is already {}, ignoring late response",
                step.step_id,
                workflow.id,
                step.status
            );
            return Ok(ProcessOutcome::Ignored);
        }

        let mut steps = workflow.steps.0.clone();
        steps[index].status = StepStatus::Completed;
        steps[index].output = Some(message.payload.0.clone());
        steps[index].completed_at = Some(Utc::now());

        let next_step_id = workflow.steps.get(index + 1).map(|s| s.step_id.clone());

        let mut tx = self.db.pool.begin().await?;
        if !AgentMessage::record_once(&mut *tx, message).await? {
            tracing::info!(
                "[PROCESSOR] Duplicate delivery of message {}, acking without effect",
                message.message_id
            );
            return Ok(ProcessOutcome::Duplicate);
        }
        match &next_step_id {
            Some(next) => {
                Workflow::replace(
                    &mut *tx,
                    workflow.id,
                    workflow.version,
                    workflow.status,
                    next,
                    &steps,
                )
                .await?;
            }
            None => {
                Workflow::replace(
                    &mut *tx,
                    workflow.id,
                    workflow.version,
                    WorkflowStatus::ReviewReady,
                    "completed",
                    &steps,
                )
                .await?;
                let completed = steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Completed)
                    .count() as i32;
                self.events
                    .record(
                        &mut *tx,
                        workflow.id,
                        None,
                        &EventPayload::WorkflowCompleted {
                            status: WorkflowStatus::ReviewReady,
                            completed_steps: completed,
                            total_steps: steps.len() as i32,
                        },
                    )
                    .await?;
            }
        }
        tx.commit().await?;

        match next_step_id {
            Some(next) => {
                tracing::info!(
                    "[PROCESSOR] Step '{}' of workflow {} completed, advancing to '{}'",
                    step.step_id,
                    workflow.id,
                    next
                );
                // A crash between the commit above and this dispatch
                // leaves the step idle until someone re-dispatches it.
                self.dispatcher.dispatch(workflow.id, &next).await?;
            }
            None => {
                tracing::info!(
                    "[PROCESSOR] Workflow {} completed, awaiting human review",
                    workflow.id
                );
            }
        }

        Ok(ProcessOutcome::Applied)
    }

    /// An error either sends the step back to pending for another
    /// attempt or, once the retry budget is spent, fails the step and
    /// the workflow with it.
    async fn apply_error(
        &self,
        workflow: &Workflow,
        index: usize,
        message: &AgentMessage,
    ) -> Result<ProcessOutcome, ProcessError> {
        let step = &workflow.steps[index];
        if step.status.is_terminal() {
            if !AgentMessage::record_once(&self.db.pool, message).await? {
                tracing::info!(
                    "[PROCESSOR] Duplicate delivery of message {}, acking without effect",
                    message.message_id
                );
                return Ok(ProcessOutcome::Duplicate);
            }
            tracing::info!(
                "[PROCESSOR] Step '{}' of workflow {} is already {}, ignoring late error",
                step.step_id,
                workflow.id,
                step.status
            );
            return Ok(ProcessOutcome::Ignored);
        }

        let error = message.error_text();
        let retry_count = step.retry_count + 1;
        let mut steps = workflow.steps.0.clone();
        steps[index].retry_count = retry_count;
        steps[index].error = Some(error.clone());

        if retry_count < step.max_retries {
            steps[index].status = StepStatus::Pending;

            let mut tx = self.db.pool.begin().await?;
            if !AgentMessage::record_once(&mut *tx, message).await? {
                tracing::info!(
                    "[PROCESSOR] Duplicate delivery of message {}, acking without effect",
                    message.message_id
                );
                return Ok(ProcessOutcome::Duplicate);
            }
            Workflow::replace(
                &mut *tx,
                workflow.id,
                workflow.version,
                workflow.status,
                &workflow.current_step,
                &steps,
            )
            .await?;
            tx.commit().await?;

            tracing::warn!(
                "[PROCESSOR] Step '{}' of workflow {} errored, attempt {} of {}: {}",
                step.step_id,
                workflow.id,
                retry_count,
                step.max_retries,
                error
            );
            // Immediate redispatch, no backoff. A fast-failing worker
            // burns its retry budget in moments, which can turn into a
            // retry storm against an unhealthy agent. If that bites, a
            // delay goes here.
            self.dispatcher.dispatch(workflow.id, &step.step_id).await?;
            return Ok(ProcessOutcome::Applied);
        }

        steps[index].status = StepStatus::Failed;
        steps[index].completed_at = Some(Utc::now());

        let mut tx = self.db.pool.begin().await?;
        if !AgentMessage::record_once(&mut *tx, message).await? {
            tracing::info!(
                "[PROCESSOR] Duplicate delivery of message {}, acking without effect",
                message.message_id
            );
            return Ok(ProcessOutcome::Duplicate);
        }
        Workflow::replace(
            &mut *tx,
            workflow.id,
            workflow.version,
            WorkflowStatus::Failed,
            &workflow.current_step,
            &steps,
        )
        .await?;
        self.events
            .record(
                &mut *tx,
                workflow.id,
                Some(&step.step_id),
                &EventPayload::ErrorOccurred {
                    error: error.clone(),
                    step_type: step.step_type,
                },
            )
            .await?;
        tx.commit().await?;

        tracing::error!(
            "[PROCESSOR] Step '{}' of workflow {} failed for good after {} attempt(s): {}",
            step.step_id,
            workflow.id,
            retry_count,
            error
        );
        Ok(ProcessOutcome::Applied)
    }
}
