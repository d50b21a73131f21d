//! Built-in plan verifiers.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PlanContext, TaskStatus};
use crate::domain::ports::{PlanVerifier, StatusChange, Verdict};

/// Never verifies anything; completion must come from an explicit `mark_done`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerifier;

#[async_trait]
impl PlanVerifier for NoopVerifier {
    async fn on_task_status_change(&self, _change: &StatusChange, _plan_context: &PlanContext) -> DomainResult<Verdict> {
        Ok(Verdict::Pending)
    }
}

/// Verifies the plan once a listener has moved the main task to Done.
///
/// Also rejects when a main task transition matches no listener while some
/// task sits in Error, since nothing further will happen on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainTaskDoneVerifier;

#[async_trait]
impl PlanVerifier for MainTaskDoneVerifier {
    async fn on_task_status_change(&self, change: &StatusChange, plan_context: &PlanContext) -> DomainResult<Verdict> {
        if change.task_id != plan_context.main_task_id {
            return Ok(Verdict::Pending);
        }
        if change.new_status == TaskStatus::Done {
            return Ok(Verdict::Verified);
        }
        if change.unmatched && change.new_status == TaskStatus::Running {
            let errored: Vec<&str> = plan_context
                .tasks
                .iter()
                .filter(|(_, task)| task.status == TaskStatus::Error)
                .map(|(id, _)| id.as_str())
                .collect();
            if !errored.is_empty() {
                return Ok(Verdict::Rejected {
                    reason: format!("tasks in error: {}", errored.join(", ")),
                });
            }
        }
        Ok(Verdict::Pending)
    }
}
