use chrono::Duration;
use db::{
    DBService,
    models::{
        agent_message::AgentMessage,
        queue_message::{QueueMessage, QueueMessageError, QueueName},
    },
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Message(#[from] QueueMessageError),
    #[error("Failed to serialize queue body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// SQS style interface over the durable queue table: send, receive with
/// a visibility timeout, ack on success. Messages that keep coming back
/// are parked on the dead letter shelf instead of spinning forever.
#[derive(Clone)]
pub struct WorkQueue {
    db: DBService,
    visibility_timeout: Duration,
    max_receive_count: i64,
}

impl WorkQueue {
    pub fn new(db: DBService, visibility_timeout_secs: i64, max_receive_count: i64) -> Self {
        Self {
            db,
            visibility_timeout: Duration::seconds(visibility_timeout_secs),
            max_receive_count,
        }
    }

    pub async fn send(
        &self,
        queue: QueueName,
        message: &AgentMessage,
    ) -> Result<QueueMessage, QueueError> {
        let body = serde_json::to_string(message)?;
        let queued = QueueMessage::enqueue(&self.db.pool, queue, &body).await?;
        tracing::debug!(
            "[QUEUE] Sent {} message {} to '{}'",
            message.message_type,
            message.message_id,
            queue
        );
        Ok(queued)
    }

    /// Claim up to `max` deliverable messages. Anything past its receive
    /// budget is parked instead of returned.
    pub async fn receive(
        &self,
        queue: QueueName,
        max: i64,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let claimed =
            QueueMessage::claim(&self.db.pool, queue, max, self.visibility_timeout).await?;

        let mut deliverable = Vec::with_capacity(claimed.len());
        for message in claimed {
            if message.receive_count > self.max_receive_count {
                tracing::warn!(
                    "[QUEUE] Parking message {} from '{}' after {} deliveries",
                    message.id,
                    queue,
                    message.receive_count
                );
                QueueMessage::mark_dead_letter(&self.db.pool, message.id).await?;
            } else {
                deliverable.push(message);
            }
        }

        Ok(deliverable)
    }

    pub async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        QueueMessage::ack(&self.db.pool, id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{inbound_body_of, setup_db, test_request_message};
    use db::models::queue_message::QueueMessage as Row;

    #[tokio::test]
    async fn send_receive_ack_round_trip() {
        let db = setup_db().await;
        let queue = WorkQueue::new(db.clone(), 30, 5);
        let message = test_request_message();

        queue
            .send(QueueName::ContentGenerationRequests, &message)
            .await
            .unwrap();

        let received = queue
            .receive(QueueName::ContentGenerationRequests, 10)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(inbound_body_of(&received[0]).message_id, message.message_id);

        queue.ack(received[0].id).await.unwrap();
        assert_eq!(
            Row::depth(&db.pool, QueueName::ContentGenerationRequests)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn receive_parks_messages_past_budget() {
        let db = setup_db().await;
        // Zero visibility so every receive sees the message again.
        let queue = WorkQueue::new(db.clone(), 0, 2);
        let message = test_request_message();

        queue
            .send(QueueName::OrchestratorResponses, &message)
            .await
            .unwrap();

        assert_eq!(
            queue
                .receive(QueueName::OrchestratorResponses, 10)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            queue
                .receive(QueueName::OrchestratorResponses, 10)
                .await
                .unwrap()
                .len(),
            1
        );

        // Third delivery exceeds the budget of two.
        assert!(
            queue
                .receive(QueueName::OrchestratorResponses, 10)
                .await
                .unwrap()
                .is_empty()
        );
        let parked = Row::find_dead_lettered(&db.pool, QueueName::OrchestratorResponses)
            .await
            .unwrap();
        assert_eq!(parked.len(), 1);
    }
}
