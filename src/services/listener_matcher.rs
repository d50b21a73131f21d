//! Listener matching.
//!
//! Decides which of a plan's listeners fire for one task status transition.
//! Matching is a pure function of the plan, the executed-listener set and a
//! status snapshot, so it can be tested without running anything.

use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::domain::models::{Listener, Plan, PlanInstance, TaskStatus, TriggerCondition};

/// Listeners of `plan` triggered by `task_id` moving to `new_status` in `instance`.
pub fn find_triggered<'a>(
    plan: &'a Plan,
    instance: &PlanInstance,
    task_id: &str,
    new_status: &TaskStatus,
) -> Vec<&'a Listener> {
    match_listeners(
        plan,
        &instance.executed_listener_ids,
        &instance.statuses(),
        task_id,
        new_status,
    )
}

/// Core matching rule.
///
/// A listener survives when its trigger set contains `task_id`, its condition
/// is satisfied by the transition, and it has not fired for this instance.
/// Survivors are ordered by ascending priority; ties keep declaration order.
/// Transitions into `Retrying` never match anything.
pub fn match_listeners<'a>(
    plan: &'a Plan,
    executed: &BTreeSet<String>,
    statuses: &HashMap<String, TaskStatus>,
    task_id: &str,
    new_status: &TaskStatus,
) -> Vec<&'a Listener> {
    if *new_status == TaskStatus::Retrying {
        return Vec::new();
    }

    let mut matched: Vec<&Listener> = plan
        .listeners
        .iter()
        .filter(|listener| listener.trigger_task_id.contains(task_id))
        .filter(|listener| !executed.contains(&listener.id))
        .filter(|listener| match TriggerCondition::parse(&listener.trigger_condition) {
            Ok(condition) => condition.is_satisfied(task_id, new_status, statuses),
            Err(e) => {
                warn!(listener_id = %listener.id, error = %e, "Skipping listener with invalid trigger condition");
                false
            }
        })
        .collect();

    // Stable sort keeps declaration order among equal priorities.
    matched.sort_by_key(|listener| listener.priority);
    matched
}
