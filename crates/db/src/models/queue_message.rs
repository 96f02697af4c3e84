use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use super::workflow::StepType;

#[derive(Debug, Error)]
pub enum QueueMessageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Queue message not found")]
    NotFound,
}

/// The fixed set of queues the orchestrator talks to. One request queue
/// per step type, one shared response queue back to the orchestrator.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "queue_name", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum QueueName {
    ContentGenerationRequests,
    ImageGenerationRequests,
    ReviewRequests,
    OrchestratorResponses,
}

impl QueueName {
    pub fn for_step(step_type: StepType) -> QueueName {
        match step_type {
            StepType::ContentGeneration => QueueName::ContentGenerationRequests,
            StepType::ImageGeneration => QueueName::ImageGenerationRequests,
            StepType::Review => QueueName::ReviewRequests,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueName::ContentGenerationRequests => write!(f, "content-generation-requests"),
            QueueName::ImageGenerationRequests => write!(f, "image-generation-requests"),
            QueueName::ReviewRequests => write!(f, "review-requests"),
            QueueName::OrchestratorResponses => write!(f, "orchestrator-responses"),
        }
    }
}

/// A message sitting on one of the durable queues. Claiming a message
/// hides it for a visibility window instead of removing it, so a consumer
/// crash puts it back in play automatically.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueueMessage {
    pub id: Uuid,
    pub queue: QueueName,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
    pub receive_count: i64,
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub async fn enqueue<'a, E>(
        executor: E,
        queue: QueueName,
        body: &str,
    ) -> Result<Self, QueueMessageError>
    where
        E: sqlx::Executor<'a, Database = Sqlite>,
    {
        let message = sqlx::query_as::<_, QueueMessage>(
            r#"
            INSERT INTO queue_messages (id, queue, body, visible_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(queue)
        .bind(body)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;

        Ok(message)
    }

    /// Atomically claim up to `max` visible messages, oldest first. Each
    /// claimed message is hidden until `visibility` elapses and its
    /// receive count goes up by one, all in a single statement, so two
    /// pollers can never claim the same delivery.
    pub async fn claim(
        pool: &SqlitePool,
        queue: QueueName,
        max: i64,
        visibility: Duration,
    ) -> Result<Vec<Self>, QueueMessageError> {
        let now = Utc::now();
        let messages = sqlx::query_as::<_, QueueMessage>(
            r#"
            UPDATE queue_messages
            SET visible_at = ?1, receive_count = receive_count + 1
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = ?2 AND visible_at <= ?3 AND dead_lettered_at IS NULL
                ORDER BY enqueued_at ASC, rowid ASC
                LIMIT ?4
            )
            RETURNING *
            "#,
        )
        .bind(now + visibility)
        .bind(queue)
        .bind(now)
        .bind(max)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    /// Acknowledge a processed message. Acking twice is harmless.
    pub async fn ack(pool: &SqlitePool, id: Uuid) -> Result<(), QueueMessageError> {
        sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Park a poisoned message. Parked messages are never claimed again
    /// but stay queryable for inspection.
    pub async fn mark_dead_letter(pool: &SqlitePool, id: Uuid) -> Result<(), QueueMessageError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET dead_lettered_at = datetime('now', 'subsec')
            WHERE id = ?1 AND dead_lettered_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueMessageError::NotFound);
        }

        Ok(())
    }

    pub async fn find_dead_lettered(
        pool: &SqlitePool,
        queue: QueueName,
    ) -> Result<Vec<Self>, QueueMessageError> {
        let messages = sqlx::query_as::<_, QueueMessage>(
            r#"
            SELECT * FROM queue_messages
            WHERE queue = ?1 AND dead_lettered_at IS NOT NULL
            ORDER BY enqueued_at ASC
            "#,
        )
        .bind(queue)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    /// Live depth of a queue, parked messages excluded.
    pub async fn depth(pool: &SqlitePool, queue: QueueName) -> Result<i64, QueueMessageError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM queue_messages
            WHERE queue = ?1 AND dead_lettered_at IS NULL
            "#,
        )
        .bind(queue)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::setup_test_pool;

    #[tokio::test]
    async fn claim_hides_messages_for_visibility_window() {
        let pool = setup_test_pool().await;
        QueueMessage::enqueue(&pool, QueueName::OrchestratorResponses, "a")
            .await
            .unwrap();
        QueueMessage::enqueue(&pool, QueueName::OrchestratorResponses, "b")
            .await
            .unwrap();

        let claimed = QueueMessage::claim(
            &pool,
            QueueName::OrchestratorResponses,
            10,
            Duration::seconds(30),
        )
        .await
        .unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|m| m.receive_count == 1));

        // Hidden while the visibility window is open.
        let again = QueueMessage::claim(
            &pool,
            QueueName::OrchestratorResponses,
            10,
            Duration::seconds(30),
        )
        .await
        .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn expired_visibility_makes_message_claimable_again() {
        let pool = setup_test_pool().await;
        QueueMessage::enqueue(&pool, QueueName::ContentGenerationRequests, "x")
            .await
            .unwrap();

        // Zero visibility puts the message straight back in play.
        let first = QueueMessage::claim(
            &pool,
            QueueName::ContentGenerationRequests,
            1,
            Duration::seconds(0),
        )
        .await
        .unwrap();
        assert_eq!(first.len(), 1);

        let second = QueueMessage::claim(
            &pool,
            QueueName::ContentGenerationRequests,
            1,
            Duration::seconds(30),
        )
        .await
        .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_respects_max() {
        let pool = setup_test_pool().await;
        let first = QueueMessage::enqueue(&pool, QueueName::ReviewRequests, "first")
            .await
            .unwrap();
        QueueMessage::enqueue(&pool, QueueName::ReviewRequests, "second")
            .await
            .unwrap();

        let claimed = QueueMessage::claim(&pool, QueueName::ReviewRequests, 1, Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first.id);
        assert_eq!(claimed[0].body, "first");
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let pool = setup_test_pool().await;
        QueueMessage::enqueue(&pool, QueueName::ContentGenerationRequests, "content")
            .await
            .unwrap();

        let other = QueueMessage::claim(
            &pool,
            QueueName::ImageGenerationRequests,
            10,
            Duration::seconds(30),
        )
        .await
        .unwrap();
        assert!(other.is_empty());
        assert_eq!(
            QueueMessage::depth(&pool, QueueName::ContentGenerationRequests)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn dead_lettered_messages_are_never_claimed() {
        let pool = setup_test_pool().await;
        let msg = QueueMessage::enqueue(&pool, QueueName::OrchestratorResponses, "poison")
            .await
            .unwrap();
        QueueMessage::mark_dead_letter(&pool, msg.id).await.unwrap();

        let claimed = QueueMessage::claim(
            &pool,
            QueueName::OrchestratorResponses,
            10,
            Duration::seconds(0),
        )
        .await
        .unwrap();
        assert!(claimed.is_empty());

        let parked = QueueMessage::find_dead_lettered(&pool, QueueName::OrchestratorResponses)
            .await
            .unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].body, "poison");
        assert_eq!(
            QueueMessage::depth(&pool, QueueName::OrchestratorResponses)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let pool = setup_test_pool().await;
        let msg = QueueMessage::enqueue(&pool, QueueName::OrchestratorResponses, "done")
            .await
            .unwrap();

        QueueMessage::ack(&pool, msg.id).await.unwrap();
        QueueMessage::ack(&pool, msg.id).await.unwrap();
        assert_eq!(
            QueueMessage::depth(&pool, QueueName::OrchestratorResponses)
                .await
                .unwrap(),
            0
        );
    }
}
