//! Applies listener outcomes to a plan instance.

use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ListenerOutcome, PlanInstance, RunEvent, StatusTransition, TaskStatus, TaskUpdate};

/// What applying one outcome changed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyReport {
    /// The instance was no longer active; nothing was written.
    pub discarded: bool,
    pub transitions: Vec<StatusTransition>,
    /// Updates naming tasks that do not exist in the instance.
    pub skipped_task_ids: Vec<String>,
}

impl ApplyReport {
    pub fn main_task_errored(&self, instance: &PlanInstance) -> bool {
        self.transitions
            .iter()
            .any(|t| instance.is_main_task(&t.task_id) && t.new_status == TaskStatus::Error)
    }
}

/// Write `outcome` into `instance`.
///
/// Each update merges its context into the target task before the status
/// changes. Failed outcomes are applied the same way and are not rolled back.
/// The plan instance status is never touched here: a main task in Error
/// leaves the instance Running so the retry policy can act.
pub fn apply(instance: &mut PlanInstance, outcome: &ListenerOutcome) -> DomainResult<ApplyReport> {
    let mut report = ApplyReport::default();

    if !instance.is_active() {
        debug!(
            plan_instance_id = %instance.id,
            listener_id = %outcome.listener_id,
            status = %instance.status,
            "Discarding listener result for inactive plan instance"
        );
        instance.record(RunEvent::ResultDiscarded {
            listener_id: outcome.listener_id.clone(),
        });
        report.discarded = true;
        return Ok(report);
    }

    instance.record(RunEvent::ListenerExecuted {
        listener_id: outcome.listener_id.clone(),
        success: outcome.success,
        error: outcome.error.clone(),
    });

    for update in &outcome.task_updates {
        if instance.task(&update.task_id).is_none() {
            warn!(
                listener_id = %outcome.listener_id,
                task_id = %update.task_id,
                "Listener update targets unknown task"
            );
            report.skipped_task_ids.push(update.task_id.clone());
            continue;
        }
        if let Some(transition) = apply_update(instance, update)? {
            report.transitions.push(transition);
        }
    }

    Ok(report)
}

/// Merge one update's context and failure marker into its task, then change status.
///
/// A later failure on the same task replaces `failed_listener_id`.
pub fn apply_update(instance: &mut PlanInstance, update: &TaskUpdate) -> DomainResult<Option<StatusTransition>> {
    let task = instance.task_mut(&update.task_id)?;
    task.context.merge_values(&update.context);
    if let Some(failure) = &update.failure {
        task.context.failed_listener_id = Some(failure.listener_id.clone());
        task.context.error_info = Some(failure.clone());
    }
    instance.update_task_status(&update.task_id, update.status.clone(), &update.reason)
}
