use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    agent_message::AgentMessageError, queue_message::QueueMessageError, revision::RevisionError,
    workflow::WorkflowError, workflow_event::WorkflowEventError,
};
use services::services::{dispatcher::DispatchError, revisions::RevisionServiceError};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    RevisionService(#[from] RevisionServiceError),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Database(e) => ApiError::Database(e),
            WorkflowError::NotFound => ApiError::NotFound("Workflow not found".into()),
            WorkflowError::DuplicateId => {
                ApiError::Conflict("Workflow id is already taken".into())
            }
            WorkflowError::VersionConflict => {
                ApiError::Conflict("Workflow was modified concurrently, retry".into())
            }
        }
    }
}

impl From<AgentMessageError> for ApiError {
    fn from(err: AgentMessageError) -> Self {
        match err {
            AgentMessageError::Database(e) => ApiError::Database(e),
            AgentMessageError::NotFound => ApiError::NotFound("Agent message not found".into()),
        }
    }
}

impl From<WorkflowEventError> for ApiError {
    fn from(err: WorkflowEventError) -> Self {
        match err {
            WorkflowEventError::Database(e) => ApiError::Database(e),
            WorkflowEventError::NotFound => ApiError::NotFound("Workflow event not found".into()),
        }
    }
}

impl From<QueueMessageError> for ApiError {
    fn from(err: QueueMessageError) -> Self {
        match err {
            QueueMessageError::Database(e) => ApiError::Database(e),
            QueueMessageError::NotFound => ApiError::NotFound("Queue message not found".into()),
        }
    }
}

impl From<RevisionError> for ApiError {
    fn from(err: RevisionError) -> Self {
        match err {
            RevisionError::Database(e) => ApiError::Database(e),
            RevisionError::NotFound => ApiError::NotFound("Revision not found".into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Dispatch(err) => match err {
                DispatchError::WorkflowNotFound(_) | DispatchError::StepNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "DispatchError")
                }
                DispatchError::WorkflowTerminal(_)
                | DispatchError::StepFinished { .. }
                | DispatchError::StepNotCurrent { .. } => (StatusCode::CONFLICT, "DispatchError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "DispatchError"),
            },
            ApiError::RevisionService(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "RevisionServiceError")
            }
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::Conflict(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };

        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
