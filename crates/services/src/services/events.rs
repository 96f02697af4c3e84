use std::sync::Arc;

use db::{
    DBService,
    models::workflow_event::{EventPayload, WorkflowEvent, WorkflowEventError},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Sqlite;
use tokio::sync::{RwLock, broadcast};
use ts_rs::TS;
use uuid::Uuid;

/// Notification from the upstream intake pipeline, shaped like a bus
/// event: routing fields plus an opaque detail document.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InputTrigger {
    pub source: String,
    pub detail_type: String,
    #[ts(type = "unknown")]
    pub detail: Value,
}

/// Event fan-out for the orchestrator.
///
/// Lifecycle events are written to the `workflow_events` table in the
/// same transaction as the state they describe, then a relay pushes the
/// unpublished backlog onto an in-process broadcast channel. Subscribers
/// get at-most-once delivery; the table keeps the durable record.
#[derive(Clone)]
pub struct EventService {
    db: DBService,
    events_tx: broadcast::Sender<WorkflowEvent>,
    triggers_tx: broadcast::Sender<InputTrigger>,
    relay_running: Arc<RwLock<bool>>,
}

impl EventService {
    pub fn new(db: DBService) -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        let (triggers_tx, _) = broadcast::channel(1000);
        Self {
            db,
            events_tx,
            triggers_tx,
            relay_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Record a lifecycle event in the outbox. Callers hand in their own
    /// executor so the write joins the surrounding transaction.
    pub async fn record<'a, E>(
        &self,
        executor: E,
        workflow_id: Uuid,
        step_id: Option<&str>,
        payload: &EventPayload,
    ) -> Result<WorkflowEvent, WorkflowEventError>
    where
        E: sqlx::Executor<'a, Database = Sqlite>,
    {
        WorkflowEvent::record(executor, workflow_id, step_id, payload).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events_tx.subscribe()
    }

    pub fn subscribe_triggers(&self) -> broadcast::Receiver<InputTrigger> {
        self.triggers_tx.subscribe()
    }

    /// Hand an upstream trigger to whoever is listening. Fire and forget;
    /// a trigger nobody consumes is simply dropped.
    pub fn publish_trigger(&self, trigger: InputTrigger) {
        match self.triggers_tx.send(trigger) {
            Ok(subscribers) => {
                tracing::debug!("[EVENTS] Trigger delivered to {} subscriber(s)", subscribers)
            }
            Err(_) => tracing::warn!("[EVENTS] Trigger dropped, nobody is listening"),
        }
    }

    /// Push the unpublished backlog to subscribers and stamp each event.
    /// A send without subscribers still counts as published; delivery to
    /// the bus is at most once by contract.
    pub async fn drain_outbox(&self, limit: i64) -> Result<usize, WorkflowEventError> {
        let pending = WorkflowEvent::find_unpublished(&self.db.pool, limit).await?;
        let drained = pending.len();

        for event in pending {
            let id = event.id;
            let _ = self.events_tx.send(event);
            WorkflowEvent::mark_published(&self.db.pool, id).await?;
        }

        Ok(drained)
    }

    /// Start the outbox relay background task.
    pub async fn start_relay(&self, poll_interval_ms: u64) -> anyhow::Result<()> {
        let mut running = self.relay_running.write().await;
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        let service = self.clone();
        let relay_running = self.relay_running.clone();

        tokio::spawn(async move {
            tracing::info!("[EVENTS] Outbox relay started, polling every {}ms", poll_interval_ms);

            loop {
                let running = relay_running.read().await;
                if !*running {
                    break;
                }
                drop(running);

                match service.drain_outbox(50).await {
                    Ok(0) => {}
                    Ok(count) => tracing::debug!("[EVENTS] Relayed {} event(s)", count),
                    Err(e) => tracing::error!("[EVENTS] Outbox drain failed: {}", e),
                }

                tokio::time::sleep(tokio::time::Duration::from_millis(poll_interval_ms)).await;
            }

            tracing::info!("[EVENTS] Outbox relay stopped");
        });

        Ok(())
    }

    pub async fn stop_relay(&self) {
        let mut running = self.relay_running.write().await;
        *running = false;
    }
}
