//! Bounded retry of the listener that put the main task into Error.
//!
//! When the main task errors, the policy finds the listener responsible and
//! either schedules a retry (main task to `Retrying`) or, once the retry
//! budget is spent, parks the plan instance in Error waiting for an explicit
//! resume. Losing track of the failing listener is fatal.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    last_failed_listener, PlanErrorInfo, PlanInstance, PlanInstanceStatus, RetryInfo, RunEvent, TaskStatus,
};

/// Process-wide retry counters keyed by (plan instance, listener).
#[derive(Debug, Default)]
pub struct RetryLedger {
    counts: RwLock<HashMap<(Uuid, String), u32>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attempts(&self, plan_instance_id: Uuid, listener_id: &str) -> u32 {
        self.counts
            .read()
            .await
            .get(&(plan_instance_id, listener_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Add one attempt and return the new count.
    pub async fn increment(&self, plan_instance_id: Uuid, listener_id: &str) -> u32 {
        let mut counts = self.counts.write().await;
        let count = counts.entry((plan_instance_id, listener_id.to_string())).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop every counter belonging to a plan instance.
    pub async fn reset_instance(&self, plan_instance_id: Uuid) {
        self.counts.write().await.retain(|(id, _), _| *id != plan_instance_id);
    }

    /// Counters for one plan instance, by listener.
    pub async fn snapshot(&self, plan_instance_id: Uuid) -> HashMap<String, u32> {
        self.counts
            .read()
            .await
            .iter()
            .filter(|((id, _), _)| *id == plan_instance_id)
            .map(|((_, listener), count)| (listener.clone(), *count))
            .collect()
    }
}

/// Result of reacting to a main task Error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Main task moved to Retrying; the listener should run again.
    Retry { listener_id: String, attempt: u32 },
    /// Retry budget spent; the instance waits for resume.
    Exhausted { listener_id: String, failed_retries: u32 },
    /// No failing listener could be identified; the instance failed for good.
    Unrecoverable { message: String },
}

pub struct RetryPolicy {
    ledger: Arc<RetryLedger>,
    max_retry_count: u32,
}

impl RetryPolicy {
    pub fn new(ledger: Arc<RetryLedger>, max_retry_count: u32) -> Self {
        Self { ledger, max_retry_count }
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    /// React to the main task having entered Error.
    pub async fn on_main_task_error(&self, instance: &mut PlanInstance) -> DomainResult<RetryDecision> {
        let failed_listener = instance
            .main_task()
            .and_then(|t| t.context.failed_listener_id.clone())
            .or_else(|| last_failed_listener(&instance.run_log, &instance.main_task_id).map(str::to_string));

        let Some(listener_id) = failed_listener else {
            let message = "main task failed but no failing listener could be identified".to_string();
            error!(plan_instance_id = %instance.id, "{message}");
            instance.record(RunEvent::Unrecoverable {
                message: message.clone(),
            });
            instance.fail(PlanErrorInfo::unrecoverable(message.clone()));
            return Ok(RetryDecision::Unrecoverable { message });
        };

        let attempts = self.ledger.attempts(instance.id, &listener_id).await;
        if attempts >= self.max_retry_count {
            warn!(
                plan_instance_id = %instance.id,
                listener_id = %listener_id,
                failed_retries = attempts,
                "Retries exhausted, waiting for resume"
            );
            instance.record(RunEvent::RetriesExhausted {
                listener_id: listener_id.clone(),
                failed_retries: attempts,
            });
            instance.fail(PlanErrorInfo::waiting_for_resume(&listener_id, attempts));
            return Ok(RetryDecision::Exhausted {
                listener_id,
                failed_retries: attempts,
            });
        }

        let attempt = self.ledger.increment(instance.id, &listener_id).await;
        self.schedule(instance, &listener_id, attempt)?;
        Ok(RetryDecision::Retry { listener_id, attempt })
    }

    /// Reopen an instance parked in Error and schedule one more attempt.
    ///
    /// Fails without mutating anything unless the instance is in Error and
    /// its main task is in Error with a `failed_listener_id`.
    pub async fn resume(&self, instance: &mut PlanInstance) -> DomainResult<RetryDecision> {
        if instance.status != PlanInstanceStatus::Error {
            return Err(DomainError::InvalidStateTransition {
                from: instance.status.to_string(),
                to: PlanInstanceStatus::Running.to_string(),
                reason: "only a plan instance in error can be resumed".to_string(),
            });
        }
        let main = instance
            .main_task()
            .ok_or_else(|| DomainError::ValidationFailed(format!("main task {} missing", instance.main_task_id)))?;
        if main.status != TaskStatus::Error {
            return Err(DomainError::InvalidStateTransition {
                from: main.status.to_string(),
                to: TaskStatus::Retrying.to_string(),
                reason: "main task is not in error".to_string(),
            });
        }
        let listener_id = main.context.failed_listener_id.clone().ok_or_else(|| {
            DomainError::ValidationFailed("main task has no failed_listener_id to resume".to_string())
        })?;

        self.ledger.reset_instance(instance.id).await;
        instance.reopen();
        instance.record(RunEvent::Resumed {
            listener_id: listener_id.clone(),
        });
        info!(plan_instance_id = %instance.id, listener_id = %listener_id, "Plan instance resumed");

        let attempt = self.ledger.increment(instance.id, &listener_id).await;
        self.schedule(instance, &listener_id, attempt)?;
        Ok(RetryDecision::Retry { listener_id, attempt })
    }

    fn schedule(&self, instance: &mut PlanInstance, listener_id: &str, attempt: u32) -> DomainResult<()> {
        let main_task_id = instance.main_task_id.clone();
        let main = instance.task_mut(&main_task_id)?;
        main.context.failed_listener_id = None;
        main.context.retry_info = Some(RetryInfo {
            attempt,
            listener_id: listener_id.to_string(),
            max_retries: self.max_retry_count,
        });

        instance.record(RunEvent::RetryScheduled {
            listener_id: listener_id.to_string(),
            attempt,
        });
        instance.update_task_status(&main_task_id, TaskStatus::Retrying, &format!("retry_attempt_{attempt}"))?;
        info!(
            plan_instance_id = %instance.id,
            listener_id,
            attempt,
            max_retries = self.max_retry_count,
            "Retry scheduled"
        );
        Ok(())
    }
}
