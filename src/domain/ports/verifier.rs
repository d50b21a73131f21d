//! Port for the external verifier that decides when a plan instance is done.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PlanContext, TaskStatus};

/// A processed task status change, as reported to the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub plan_id: String,
    pub plan_instance_id: Uuid,
    pub task_id: String,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    /// No listener matched this transition.
    pub unmatched: bool,
}

/// Verifier decision for a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Nothing to decide yet.
    Pending,
    /// Side effects confirmed; the plan instance may be marked done.
    Verified,
    /// Side effects could not be confirmed.
    Rejected { reason: String },
}

/// The only actor allowed to move a plan instance to Done.
#[async_trait]
pub trait PlanVerifier: Send + Sync {
    async fn on_task_status_change(&self, change: &StatusChange, plan_context: &PlanContext) -> DomainResult<Verdict>;
}
