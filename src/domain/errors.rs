//! Domain errors for the conductor runtime.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the conductor runtime.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Plan instance not found: {0}")]
    PlanInstanceNotFound(Uuid),

    #[error("Task {task_id} not found in plan instance {plan_instance_id}")]
    TaskNotFound { plan_instance_id: Uuid, task_id: String },

    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Agent runtime error: {0}")]
    AgentRuntime(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
