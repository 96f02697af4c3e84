use std::sync::Arc;
use std::time::Duration;

use db::{
    DBService,
    models::{
        queue_message::{QueueMessage, QueueName},
        workflow::{CreateWorkflow, Step, StepType, Workflow, WorkflowError, WorkflowMetadata},
    },
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use ts_rs::TS;
use uuid::Uuid;

use crate::services::{
    config::OrchestratorConfig,
    dispatcher::{DispatchError, StepDispatcher},
    events::{EventService, InputTrigger},
    processor::{InboundMessage, ProcessOutcome, ResponseProcessor},
    queue::{QueueError, WorkQueue},
};

/// Routing pair of the one upstream event that starts a workflow.
pub const INPUT_PROCESSED_SOURCE: &str = "draftflow.intake";
pub const INPUT_PROCESSED_DETAIL_TYPE: &str = "input.processed";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Trigger detail did not parse: {0}")]
    InvalidTrigger(#[from] serde_json::Error),
}

/// Detail document of an `input.processed` trigger.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProcessedInput {
    pub input_id: String,
    pub user_id: String,
    pub transcription: String,
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    pub user_preferences: Option<Value>,
}

/// Outcome tally for one batch of queue deliveries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub failed: usize,
}

/// The fixed publishing plan every workflow runs. The review step gets a
/// single attempt; a failed review goes to a human, not back to the agent.
pub fn step_plan() -> Vec<Step> {
    vec![
        Step::new("content-generation", StepType::ContentGeneration, 3),
        Step::new("image-generation", StepType::ImageGeneration, 3),
        Step::new("review", StepType::Review, 1),
    ]
}

/// Front door of the pipeline. Listens for `input.processed` triggers
/// and turns each into a workflow, and pumps agent responses from the
/// response queue through the processor.
#[derive(Clone)]
pub struct Orchestrator {
    db: DBService,
    queue: WorkQueue,
    events: EventService,
    dispatcher: StepDispatcher,
    processor: ResponseProcessor,
    config: OrchestratorConfig,
    is_running: Arc<RwLock<bool>>,
}

impl Orchestrator {
    pub fn new(
        db: DBService,
        queue: WorkQueue,
        events: EventService,
        config: OrchestratorConfig,
    ) -> Self {
        let dispatcher = StepDispatcher::new(db.clone(), queue.clone(), events.clone());
        let processor = ResponseProcessor::new(db.clone(), dispatcher.clone(), events.clone());
        Self {
            db,
            queue,
            events,
            dispatcher,
            processor,
            config,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// The dispatcher, exposed for manual re-dispatch of an idle step.
    pub fn dispatcher(&self) -> &StepDispatcher {
        &self.dispatcher
    }

    /// Plan a workflow for one processed input and dispatch its first
    /// step. Returns the workflow as created, before the dispatch moved
    /// it along.
    pub async fn initiate_workflow(
        &self,
        input: &ProcessedInput,
    ) -> Result<Workflow, OrchestratorError> {
        let plan = step_plan();
        let data = CreateWorkflow {
            user_id: input.user_id.clone(),
            input_id: input.input_id.clone(),
            current_step: plan[0].step_id.clone(),
            steps: plan,
            metadata: WorkflowMetadata {
                original_input: input.transcription.clone(),
                user_preferences: input.user_preferences.clone(),
            },
        };

        let workflow = Workflow::create(&self.db.pool, &data, Uuid::new_v4()).await?;
        tracing::info!(
            "[ORCHESTRATOR] Initiated workflow {} for user {}",
            workflow.id,
            workflow.user_id
        );

        self.dispatcher
            .dispatch(workflow.id, &workflow.current_step)
            .await?;

        Ok(workflow)
    }

    /// Route one upstream trigger. Anything other than the
    /// `input.processed` pair is logged and dropped.
    pub async fn handle_trigger(
        &self,
        trigger: &InputTrigger,
    ) -> Result<Option<Workflow>, OrchestratorError> {
        if trigger.source != INPUT_PROCESSED_SOURCE
            || trigger.detail_type != INPUT_PROCESSED_DETAIL_TYPE
        {
            tracing::info!(
                "[ORCHESTRATOR] Ignoring event {}/{}",
                trigger.source,
                trigger.detail_type
            );
            return Ok(None);
        }

        let input: ProcessedInput = serde_json::from_value(trigger.detail.clone())?;
        let workflow = self.initiate_workflow(&input).await?;
        Ok(Some(workflow))
    }

    /// Run one batch of response queue deliveries through the processor.
    /// Handled messages are acked. Failures stay on the queue; redelivery
    /// retries them until the receive budget parks them.
    pub async fn handle_message_batch(&self, batch: &[QueueMessage]) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for delivery in batch {
            let inbound: InboundMessage = match serde_json::from_str(&delivery.body) {
                Ok(inbound) => inbound,
                Err(e) => {
                    tracing::warn!(
                        "[ORCHESTRATOR] Malformed response message {}: {}",
                        delivery.id,
                        e
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            match self.processor.process(&inbound).await {
                Ok(outcome) => {
                    match outcome {
                        ProcessOutcome::Applied => summary.applied += 1,
                        ProcessOutcome::Duplicate => summary.duplicates += 1,
                        ProcessOutcome::Ignored => summary.ignored += 1,
                    }
                    if let Err(e) = self.queue.ack(delivery.id).await {
                        tracing::warn!(
                            "[ORCHESTRATOR] Failed to ack message {}: {}",
                            delivery.id,
                            e
                        );
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        "[ORCHESTRATOR] Processing message {} failed, leaving it for redelivery: {}",
                        inbound.message_id,
                        e
                    );
                }
            }
        }

        summary
    }

    /// Start the background tasks: the response queue consumer and the
    /// trigger listener.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut running = self.is_running.write().await;
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        self.spawn_response_consumer();
        self.spawn_trigger_listener();
        tracing::info!("[ORCHESTRATOR] Started");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.is_running.write().await;
        *running = false;
        tracing::info!("[ORCHESTRATOR] Stopping");
    }

    fn spawn_response_consumer(&self) {
        let orchestrator = self.clone();
        let is_running = self.is_running.clone();

        tokio::spawn(async move {
            tracing::info!(
                "[ORCHESTRATOR] Response consumer polling every {}ms",
                orchestrator.config.response_poll_interval_ms
            );

            loop {
                let running = is_running.read().await;
                if !*running {
                    break;
                }
                drop(running);

                match orchestrator
                    .queue
                    .receive(
                        QueueName::OrchestratorResponses,
                        orchestrator.config.response_batch_size,
                    )
                    .await
                {
                    Ok(batch) if batch.is_empty() => {}
                    Ok(batch) => {
                        let summary = orchestrator.handle_message_batch(&batch).await;
                        tracing::debug!(
                            "[ORCHESTRATOR] Batch done: {} applied, {} duplicate(s), {} ignored, {} failed",
                            summary.applied,
                            summary.duplicates,
                            summary.ignored,
                            summary.failed
                        );
                    }
                    Err(e) => tracing::error!("[ORCHESTRATOR] Receive failed: {}", e),
                }

                tokio::time::sleep(Duration::from_millis(
                    orchestrator.config.response_poll_interval_ms,
                ))
                .await;
            }

            tracing::info!("[ORCHESTRATOR] Response consumer stopped");
        });
    }

    fn spawn_trigger_listener(&self) {
        let orchestrator = self.clone();
        let is_running = self.is_running.clone();
        let mut triggers = self.events.subscribe_triggers();

        tokio::spawn(async move {
            loop {
                {
                    let running = is_running.read().await;
                    if !*running {
                        break;
                    }
                }

                match triggers.recv().await {
                    Ok(trigger) => {
                        if let Err(e) = orchestrator.handle_trigger(&trigger).await {
                            tracing::error!("[ORCHESTRATOR] Trigger handling failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            "[ORCHESTRATOR] Trigger listener lagged, {} trigger(s) lost",
                            missed
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            tracing::info!("[ORCHESTRATOR] Trigger listener stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{orchestrator, seed_workflow, setup_db, step_dispatcher};
    use db::models::workflow::{StepStatus, WorkflowStatus};
    use serde_json::json;

    fn processed_detail() -> Value {
        json!({
            "inputId": "input-42",
            "userId": "user-7",
            "transcription": "Write about the history of sourdough",
        })
    }

    #[tokio::test]
    async fn trigger_with_other_routing_is_dropped() {
        let db = setup_db().await;
        let orchestrator = orchestrator(&db);

        let ignored = orchestrator
            .handle_trigger(&InputTrigger {
                source: "aws.s3".to_string(),
                detail_type: "object.created".to_string(),
                detail: processed_detail(),
            })
            .await
            .unwrap();
        assert!(ignored.is_none());
        assert!(Workflow::find_recent(&db.pool, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_initiates_workflow_and_dispatches_first_step() {
        let db = setup_db().await;
        let orchestrator = orchestrator(&db);

        let workflow = orchestrator
            .handle_trigger(&InputTrigger {
                source: INPUT_PROCESSED_SOURCE.to_string(),
                detail_type: INPUT_PROCESSED_DETAIL_TYPE.to_string(),
                detail: processed_detail(),
            })
            .await
            .unwrap()
            .expect("workflow");

        // The caller sees the pre-dispatch snapshot.
        assert_eq!(workflow.status, WorkflowStatus::Initiated);
        assert_eq!(workflow.current_step, "content-generation");
        assert_eq!(workflow.user_id, "user-7");
        assert_eq!(workflow.steps.len(), 3);
        assert!(workflow.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(
            workflow.metadata.original_input,
            "Write about the history of sourdough"
        );

        let reloaded = Workflow::find_by_id(&db.pool, workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, WorkflowStatus::ContentGeneration);
        assert_eq!(reloaded.steps[0].status, StepStatus::InProgress);
        assert_eq!(
            QueueMessage::depth(&db.pool, QueueName::ContentGenerationRequests)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn malformed_trigger_detail_is_an_error() {
        let db = setup_db().await;
        let orchestrator = orchestrator(&db);

        let err = orchestrator
            .handle_trigger(&InputTrigger {
                source: INPUT_PROCESSED_SOURCE.to_string(),
                detail_type: INPUT_PROCESSED_DETAIL_TYPE.to_string(),
                detail: json!({"inputId": "input-42"}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTrigger(_)));
    }

    #[tokio::test]
    async fn batch_acks_handled_messages_and_keeps_failures() {
        let db = setup_db().await;
        let orchestrator = orchestrator(&db);
        let workflow = seed_workflow(&db).await;
        step_dispatcher(&db)
            .dispatch(workflow.id, "content-generation")
            .await
            .unwrap();

        let good = json!({
            "messageId": Uuid::new_v4(),
            "workflowId": workflow.id,
            "stepId": "content-generation",
            "messageType": "response",
            "payload": {"blogPost": "draft"},
            "timestamp": "2025-08-12T10:00:00Z",
        });
        QueueMessage::enqueue(
            &db.pool,
            QueueName::OrchestratorResponses,
            &good.to_string(),
        )
        .await
        .unwrap();
        QueueMessage::enqueue(&db.pool, QueueName::OrchestratorResponses, "not json")
            .await
            .unwrap();

        let batch = QueueMessage::claim(
            &db.pool,
            QueueName::OrchestratorResponses,
            10,
            chrono::Duration::seconds(30),
        )
        .await
        .unwrap();
        assert_eq!(batch.len(), 2);

        let summary = orchestrator.handle_message_batch(&batch).await;
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.failed, 1);

        // The handled delivery is gone, the malformed one stays for the
        // receive budget to park it eventually.
        assert_eq!(
            QueueMessage::depth(&db.pool, QueueName::OrchestratorResponses)
                .await
                .unwrap(),
            1
        );

        let reloaded = Workflow::find_by_id(&db.pool, workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.current_step, "image-generation");
    }
}
