//! Per-instance driver loop.
//!
//! Each running plan instance gets one tokio task. It pops queued status
//! transitions one at a time and, for each, runs the matched listeners
//! concurrently, applies their results sequentially, reacts to main task
//! errors and retries, and reports the change to the verifier. The loop
//! sleeps on a [`Notify`] between transitions and exits once the instance is
//! no longer active.

use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Listener, ListenerOutcome, Plan, PlanContext, PlanErrorInfo, PlanInstance, PlanInstanceStatus, RunEvent,
    StatusTransition, TaskStatus,
};
use crate::domain::ports::{StatusChange, Verdict};
use crate::services::listener_executor::default_failure_update;
use crate::services::listener_matcher::find_triggered;
use crate::services::plan_runtime::RuntimeCore;
use crate::services::result_applier;
use crate::services::retry_policy::RetryDecision;

/// Mutable state of one plan instance, guarded by a single mutex.
pub(crate) struct DriverState {
    pub instance: PlanInstance,
    /// Listener to re-run when the main task's Retrying transition is processed.
    pub scheduled_retry: Option<String>,
    pub driver_running: bool,
    /// A transition has been popped and is still being processed.
    pub busy: bool,
}

impl DriverState {
    pub fn is_idle(&self) -> bool {
        self.instance.is_terminal()
            || (!self.busy && !self.instance.has_pending_transitions() && self.scheduled_retry.is_none())
    }
}

pub(crate) struct InstanceHandle {
    pub plan: Arc<Plan>,
    pub state: Mutex<DriverState>,
    pub wake: Notify,
    pub driver: Mutex<Option<JoinHandle<()>>>,
}

impl InstanceHandle {
    pub fn new(plan: Arc<Plan>, instance: PlanInstance) -> Self {
        Self {
            plan,
            state: Mutex::new(DriverState {
                instance,
                scheduled_retry: None,
                driver_running: false,
                busy: false,
            }),
            wake: Notify::new(),
            driver: Mutex::new(None),
        }
    }
}

/// Start the driver for `handle` unless one is already looping.
pub(crate) async fn ensure_driver(core: &Arc<RuntimeCore>, handle: &Arc<InstanceHandle>) {
    {
        let mut st = handle.state.lock().await;
        if st.driver_running {
            drop(st);
            handle.wake.notify_one();
            return;
        }
        st.driver_running = true;
    }

    let join = tokio::spawn(drive(Arc::clone(core), Arc::clone(handle)));
    *handle.driver.lock().await = Some(join);
}

/// Mark `instance` verified: main task Done, instance Done.
pub(crate) fn complete_instance(instance: &mut PlanInstance, reason: &str) -> DomainResult<()> {
    if instance.status != PlanInstanceStatus::Running {
        return Err(DomainError::InvalidStateTransition {
            from: instance.status.to_string(),
            to: PlanInstanceStatus::Done.to_string(),
            reason: "only a running plan instance can be marked done".to_string(),
        });
    }
    let main_task_id = instance.main_task_id.clone();
    instance.update_task_status(&main_task_id, TaskStatus::Done, reason)?;
    instance.record(RunEvent::Verified);
    instance.complete();
    info!(plan_instance_id = %instance.id, "Plan instance verified and done");
    Ok(())
}

async fn drive(core: Arc<RuntimeCore>, handle: Arc<InstanceHandle>) {
    let poll = Duration::from_millis(core.config.poll_interval_ms.max(1));
    let plan_instance_id = handle.state.lock().await.instance.id;
    debug!(%plan_instance_id, "Driver started");

    loop {
        let next = {
            let mut st = handle.state.lock().await;
            st.busy = false;
            if !st.instance.is_active() {
                st.driver_running = false;
                debug!(%plan_instance_id, status = %st.instance.status, "Driver stopping");
                break;
            }
            let next = st.instance.next_transition();
            st.busy = next.is_some();
            next
        };

        match next {
            Some(transition) => process_transition(&core, &handle, transition).await,
            None => {
                // Fallback poll in case a wakeup raced with the queue check.
                let _ = tokio::time::timeout(poll, handle.wake.notified()).await;
            }
        }
    }
}

async fn process_transition(core: &Arc<RuntimeCore>, handle: &Arc<InstanceHandle>, transition: StatusTransition) {
    let (listeners, context, is_main) = {
        let mut st = handle.state.lock().await;
        if !st.instance.is_active() {
            return;
        }
        let matched: Vec<Listener> = find_triggered(
            &handle.plan,
            &st.instance,
            &transition.task_id,
            &transition.new_status,
        )
        .into_iter()
        .cloned()
        .collect();

        for listener in &matched {
            st.instance.executed_listener_ids.insert(listener.id.clone());
            st.instance.record(RunEvent::ListenerTriggered {
                listener_id: listener.id.clone(),
                task_id: transition.task_id.clone(),
                status: transition.new_status.clone(),
            });
        }
        let is_main = st.instance.is_main_task(&transition.task_id);
        (matched, st.instance.plan_context(), is_main)
    };

    debug!(
        plan_instance_id = %transition.plan_instance_id,
        task_id = %transition.task_id,
        from = %transition.old_status,
        to = %transition.new_status,
        matched = listeners.len(),
        "Processing transition"
    );

    let unmatched = listeners.is_empty();
    if unmatched && is_main {
        debug!(
            plan_instance_id = %transition.plan_instance_id,
            status = %transition.new_status,
            "No listener for main task transition, deferring to verifier"
        );
    }
    if !unmatched {
        run_listeners(core, handle, &listeners, &context).await;
    }

    if is_main && transition.new_status == TaskStatus::Retrying {
        run_scheduled_retry(core, handle).await;
    }
    if is_main && transition.new_status == TaskStatus::Error {
        handle_main_task_error(core, handle).await;
    }

    consult_verifier(core, handle, &transition, unmatched).await;
    persist(core, handle).await;
}

/// Fan out over matched listeners; apply each result as it arrives.
async fn run_listeners(
    core: &Arc<RuntimeCore>,
    handle: &Arc<InstanceHandle>,
    listeners: &[Listener],
    context: &PlanContext,
) {
    let limit = core.config.max_concurrent_listeners.max(1);
    let pending: Vec<_> = listeners
        .iter()
        .map(|listener| core.executor.execute(listener, context))
        .collect();
    let mut outcomes = stream::iter(pending).buffer_unordered(limit);

    while let Some(outcome) = outcomes.next().await {
        apply_outcome(handle, &outcome).await;
    }
}

async fn apply_outcome(handle: &Arc<InstanceHandle>, outcome: &ListenerOutcome) {
    let mut st = handle.state.lock().await;
    if let Err(e) = result_applier::apply(&mut st.instance, outcome) {
        error!(
            plan_instance_id = %st.instance.id,
            listener_id = %outcome.listener_id,
            error = %e,
            "Failed to apply listener result"
        );
    }
}

async fn run_scheduled_retry(core: &Arc<RuntimeCore>, handle: &Arc<InstanceHandle>) {
    let (listener, context) = {
        let mut st = handle.state.lock().await;
        if !st.instance.is_active() {
            return;
        }
        let Some(listener_id) = st.scheduled_retry.take() else {
            return;
        };
        let Some(listener) = handle.plan.listener(&listener_id).cloned() else {
            let message = format!("listener {listener_id} not found for retry");
            error!(plan_instance_id = %st.instance.id, "{message}");
            st.instance.record(RunEvent::Unrecoverable {
                message: message.clone(),
            });
            st.instance.fail(PlanErrorInfo::unrecoverable(message));
            return;
        };
        (listener, st.instance.plan_context())
    };

    let outcome = core.executor.execute(&listener, &context).await;

    let mut st = handle.state.lock().await;
    let applied = match result_applier::apply(&mut st.instance, &outcome) {
        Ok(report) => !report.discarded,
        Err(e) => {
            error!(listener_id = %listener.id, error = %e, "Failed to apply retry result");
            false
        }
    };
    if !applied {
        return;
    }

    let main_task_id = st.instance.main_task_id.clone();
    let still_retrying = st
        .instance
        .main_task()
        .is_some_and(|t| t.status == TaskStatus::Retrying);

    if !outcome.success {
        // A failure output aimed at another task leaves the main task Retrying.
        if still_retrying {
            let message = outcome.error.as_deref().unwrap_or("listener reported failure");
            let update = default_failure_update(&listener, &main_task_id, message);
            if let Err(e) = result_applier::apply_update(&mut st.instance, &update) {
                error!(error = %e, "Failed to mark main task after failed retry");
            }
        }
        return;
    }

    if let Ok(main) = st.instance.task_mut(&main_task_id) {
        main.context.retry_info = None;
    }
    if still_retrying {
        if let Err(e) = st
            .instance
            .update_task_status(&main_task_id, TaskStatus::Running, "retry_succeeded")
        {
            error!(error = %e, "Failed to restore main task after retry");
        }
    }
    info!(plan_instance_id = %st.instance.id, listener_id = %listener.id, "Retry succeeded");
}

async fn handle_main_task_error(core: &Arc<RuntimeCore>, handle: &Arc<InstanceHandle>) {
    let mut st = handle.state.lock().await;
    if !st.instance.is_active() {
        return;
    }
    // A listener triggered by the error may already have moved the main task on.
    if !st
        .instance
        .main_task()
        .is_some_and(|t| t.status == TaskStatus::Error)
    {
        return;
    }

    match core.retry_policy.on_main_task_error(&mut st.instance).await {
        Ok(RetryDecision::Retry { listener_id, .. }) => st.scheduled_retry = Some(listener_id),
        Ok(RetryDecision::Exhausted { .. } | RetryDecision::Unrecoverable { .. }) => {}
        Err(e) => error!(plan_instance_id = %st.instance.id, error = %e, "Retry policy failed"),
    }
}

async fn consult_verifier(
    core: &Arc<RuntimeCore>,
    handle: &Arc<InstanceHandle>,
    transition: &StatusTransition,
    unmatched: bool,
) {
    let (change, context) = {
        let st = handle.state.lock().await;
        if !st.instance.is_active() {
            return;
        }
        let change = StatusChange {
            plan_id: st.instance.plan_id.clone(),
            plan_instance_id: st.instance.id,
            task_id: transition.task_id.clone(),
            old_status: transition.old_status.clone(),
            new_status: transition.new_status.clone(),
            unmatched,
        };
        (change, st.instance.plan_context())
    };

    let verdict = match core.verifier.on_task_status_change(&change, &context).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(plan_instance_id = %change.plan_instance_id, error = %e, "Verifier failed");
            return;
        }
    };

    let mut st = handle.state.lock().await;
    if !st.instance.is_active() {
        return;
    }
    match verdict {
        Verdict::Pending => {}
        Verdict::Verified => {
            if let Err(e) = complete_instance(&mut st.instance, "verified") {
                warn!(plan_instance_id = %change.plan_instance_id, error = %e, "Could not mark plan instance done");
            }
        }
        Verdict::Rejected { reason } => {
            info!(plan_instance_id = %change.plan_instance_id, %reason, "Verification rejected");
            let main_task_id = st.instance.main_task_id.clone();
            if let Ok(main) = st.instance.task_mut(&main_task_id) {
                main.context.verification = Some(json!({"verified": false, "reason": reason}));
            }
            st.instance.record(RunEvent::VerificationRejected { reason });
        }
    }
}

async fn persist(core: &Arc<RuntimeCore>, handle: &Arc<InstanceHandle>) {
    let st = handle.state.lock().await;
    core.persist(&st.instance).await;
}
