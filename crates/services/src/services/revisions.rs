use std::sync::Arc;

use async_trait::async_trait;
use db::{
    DBService,
    models::revision::{CreateRevision, Revision, RevisionError, RevisionType},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation agent unreachable: {0}")]
    Unreachable(String),
    #[error("Generation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum RevisionServiceError {
    #[error(transparent)]
    Revision(#[from] RevisionError),
}

/// Body sent to the generation agent for a rework.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub revision_type: RevisionType,
    pub feedback: String,
    pub user_id: String,
}

#[async_trait]
pub trait GenerationAgent: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError>;
}

/// Calls the generation agent over HTTP.
pub struct HttpGenerationAgent {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerationAgent {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl GenerationAgent for HttpGenerationAgent {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Failed(format!("{status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GenerationError::Failed(e.to_string()))
    }
}

/// Standalone rework flow: record the request, call the generation
/// agent inline, store whatever came back. A failed revision is final;
/// the user resubmits instead of the service retrying.
#[derive(Clone)]
pub struct RevisionService {
    db: DBService,
    agent: Arc<dyn GenerationAgent>,
}

impl RevisionService {
    pub fn new(db: DBService, agent: Arc<dyn GenerationAgent>) -> Self {
        Self { db, agent }
    }

    pub async fn submit(&self, data: &CreateRevision) -> Result<Revision, RevisionServiceError> {
        let revision = Revision::create(&self.db.pool, data, Uuid::new_v4()).await?;
        tracing::info!(
            "[REVISIONS] Revision {} ({}) submitted by {}",
            revision.id,
            revision.revision_type,
            revision.user_id
        );

        let request = GenerationRequest {
            revision_type: revision.revision_type,
            feedback: revision.feedback.clone(),
            user_id: revision.user_id.clone(),
        };

        match self.agent.generate(&request).await {
            Ok(result) => {
                let done = Revision::complete(&self.db.pool, revision.id, &result).await?;
                tracing::info!("[REVISIONS] Revision {} completed", done.id);
                Ok(done)
            }
            Err(e) => {
                let failed = Revision::fail(&self.db.pool, revision.id, &e.to_string()).await?;
                tracing::error!("[REVISIONS] Revision {} failed: {}", failed.id, e);
                Ok(failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::setup_db;
    use db::models::revision::RevisionStatus;
    use serde_json::json;

    struct CannedAgent;

    #[async_trait]
    impl GenerationAgent for CannedAgent {
        async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
            Ok(json!({"revised": format!("reworked per: {}", request.feedback)}))
        }
    }

    struct DownAgent;

    #[async_trait]
    impl GenerationAgent for DownAgent {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Value, GenerationError> {
            Err(GenerationError::Unreachable("connection refused".to_string()))
        }
    }

    fn rework_request() -> CreateRevision {
        CreateRevision {
            feedback: "shorter intro".to_string(),
            revision_type: RevisionType::Content,
            user_id: "user-7".to_string(),
        }
    }

    #[tokio::test]
    async fn submit_completes_when_agent_answers() {
        let db = setup_db().await;
        let service = RevisionService::new(db.clone(), Arc::new(CannedAgent));

        let revision = service.submit(&rework_request()).await.unwrap();
        assert_eq!(revision.status, RevisionStatus::Completed);
        assert_eq!(
            revision.result.as_ref().map(|r| r.0.clone()),
            Some(json!({"revised": "reworked per: shorter intro"}))
        );
        assert!(revision.error.is_none());

        let reloaded = Revision::find_by_id(&db.pool, revision.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, RevisionStatus::Completed);
    }

    #[tokio::test]
    async fn submit_records_failure_when_agent_is_down() {
        let db = setup_db().await;
        let service = RevisionService::new(db.clone(), Arc::new(DownAgent));

        let revision = service.submit(&rework_request()).await.unwrap();
        assert_eq!(revision.status, RevisionStatus::Failed);
        assert!(revision.result.is_none());
        assert!(
            revision
                .error
                .as_deref()
                .unwrap()
                .contains("connection refused")
        );
    }
}
