//! Port for human approval of a task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

/// Asks a human (or a stand-in) to approve a task before it proceeds.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(
        &self,
        plan_instance_id: Uuid,
        task_id: &str,
        summary: &str,
    ) -> DomainResult<ApprovalDecision>;
}

/// Gate that approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn request_approval(
        &self,
        _plan_instance_id: Uuid,
        _task_id: &str,
        _summary: &str,
    ) -> DomainResult<ApprovalDecision> {
        Ok(ApprovalDecision::Approved)
    }
}
