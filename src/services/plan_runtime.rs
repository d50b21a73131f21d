//! Plan runtime.
//!
//! Owns registered plans and live plan instances, and exposes the operations
//! external actors use: starting instances, pushing status updates, marking
//! instances done, cancelling and resuming. Each started instance is driven
//! by its own loop (see [`crate::services::plan_driver`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::memory::{InMemoryPlanInstanceRepository, InMemoryPlanRepository};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, Plan, PlanContext, PlanErrorInfo, PlanInstance, PlanInstanceStatus, RetryConfig, RuntimeConfig,
    StatusTransition, TaskStatus,
};
use crate::domain::ports::{
    AgentRuntime, ApprovalDecision, ApprovalGate, AutoApprove, CodeSandbox, PlanInstanceRepository, PlanRepository,
    PlanVerifier,
};
use crate::services::listener_executor::ListenerExecutor;
use crate::services::plan_driver::{complete_instance, ensure_driver, InstanceHandle};
use crate::services::retry_policy::{RetryDecision, RetryLedger, RetryPolicy};
use crate::services::verifiers::NoopVerifier;

/// Shared state behind a [`PlanRuntime`] and its drivers.
pub(crate) struct RuntimeCore {
    pub config: RuntimeConfig,
    pub executor: ListenerExecutor,
    pub retry_policy: RetryPolicy,
    pub verifier: Arc<dyn PlanVerifier>,
    pub approval_gate: Arc<dyn ApprovalGate>,
    pub plan_repo: Arc<dyn PlanRepository>,
    pub instance_repo: Arc<dyn PlanInstanceRepository>,
    pub plans: RwLock<HashMap<String, Arc<Plan>>>,
    pub instances: RwLock<HashMap<Uuid, Arc<InstanceHandle>>>,
}

impl RuntimeCore {
    /// Save a snapshot. Failures are logged and otherwise ignored.
    pub async fn persist(&self, instance: &PlanInstance) {
        if let Err(e) = self.instance_repo.save(instance).await {
            warn!(plan_instance_id = %instance.id, error = %e, "Failed to persist plan instance");
        }
    }
}

/// Builder for [`PlanRuntime`].
pub struct PlanRuntimeBuilder {
    agent_runtime: Arc<dyn AgentRuntime>,
    sandbox: Arc<dyn CodeSandbox>,
    runtime_config: RuntimeConfig,
    retry_config: RetryConfig,
    verifier: Arc<dyn PlanVerifier>,
    approval_gate: Arc<dyn ApprovalGate>,
    plan_repo: Arc<dyn PlanRepository>,
    instance_repo: Arc<dyn PlanInstanceRepository>,
    ledger: Arc<RetryLedger>,
}

impl PlanRuntimeBuilder {
    pub fn with_config(mut self, config: &Config) -> Self {
        self.runtime_config = config.runtime.clone();
        self.retry_config = config.retry.clone();
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.retry_config.max_retry_count = max_retry_count;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn PlanVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval_gate = gate;
        self
    }

    pub fn with_repositories(
        mut self,
        plan_repo: Arc<dyn PlanRepository>,
        instance_repo: Arc<dyn PlanInstanceRepository>,
    ) -> Self {
        self.plan_repo = plan_repo;
        self.instance_repo = instance_repo;
        self
    }

    /// Share retry counters with another runtime or an observer.
    pub fn with_retry_ledger(mut self, ledger: Arc<RetryLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn build(self) -> PlanRuntime {
        let executor = ListenerExecutor::new(self.agent_runtime, self.sandbox)
            .with_timeout(Duration::from_millis(self.runtime_config.listener_timeout_ms));
        let retry_policy = RetryPolicy::new(self.ledger, self.retry_config.max_retry_count);

        PlanRuntime {
            core: Arc::new(RuntimeCore {
                config: self.runtime_config,
                executor,
                retry_policy,
                verifier: self.verifier,
                approval_gate: self.approval_gate,
                plan_repo: self.plan_repo,
                instance_repo: self.instance_repo,
                plans: RwLock::new(HashMap::new()),
                instances: RwLock::new(HashMap::new()),
            }),
        }
    }
}

/// Aggregate view of one plan instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub plan_instance_id: Uuid,
    pub plan_id: String,
    pub status: PlanInstanceStatus,
    pub main_task_id: String,
    pub task_statuses: BTreeMap<String, TaskStatus>,
    pub executed_listeners: Vec<String>,
    pub retry_counts: BTreeMap<String, u32>,
    pub transitions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<PlanErrorInfo>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

/// Cheaply cloneable handle to the runtime.
#[derive(Clone)]
pub struct PlanRuntime {
    core: Arc<RuntimeCore>,
}

impl PlanRuntime {
    pub fn builder(agent_runtime: Arc<dyn AgentRuntime>, sandbox: Arc<dyn CodeSandbox>) -> PlanRuntimeBuilder {
        PlanRuntimeBuilder {
            agent_runtime,
            sandbox,
            runtime_config: RuntimeConfig::default(),
            retry_config: RetryConfig::default(),
            verifier: Arc::new(NoopVerifier),
            approval_gate: Arc::new(AutoApprove),
            plan_repo: Arc::new(InMemoryPlanRepository::new()),
            instance_repo: Arc::new(InMemoryPlanInstanceRepository::new()),
            ledger: Arc::new(RetryLedger::new()),
        }
    }

    pub fn retry_ledger(&self) -> &Arc<RetryLedger> {
        self.core.retry_policy.ledger()
    }

    /// Validate and register a plan, storing it in the plan repository.
    ///
    /// A plan whose main task id is not among its tasks falls back to the
    /// configured main task id when that one is declared.
    pub async fn register_plan(&self, mut plan: Plan) -> DomainResult<()> {
        let fallback = &self.core.config.main_task_id;
        if plan.task(&plan.main_task_id).is_none() && plan.task(fallback).is_some() {
            plan.main_task_id.clone_from(fallback);
        }
        plan.validate()?;

        if self.core.plan_repo.get(&plan.id).await?.is_some() {
            self.core.plan_repo.update(&plan).await?;
        } else {
            self.core.plan_repo.create(&plan).await?;
        }

        info!(
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            listeners = plan.listeners.len(),
            "Plan registered"
        );
        self.core.plans.write().await.insert(plan.id.clone(), Arc::new(plan));
        Ok(())
    }

    async fn plan(&self, plan_id: &str) -> DomainResult<Arc<Plan>> {
        if let Some(plan) = self.core.plans.read().await.get(plan_id) {
            return Ok(Arc::clone(plan));
        }
        let plan = self
            .core
            .plan_repo
            .get(plan_id)
            .await?
            .ok_or_else(|| DomainError::PlanNotFound(plan_id.to_string()))?;
        let plan = Arc::new(plan);
        self.core
            .plans
            .write()
            .await
            .insert(plan_id.to_string(), Arc::clone(&plan));
        Ok(plan)
    }

    async fn handle(&self, plan_instance_id: Uuid) -> DomainResult<Arc<InstanceHandle>> {
        self.core
            .instances
            .read()
            .await
            .get(&plan_instance_id)
            .cloned()
            .ok_or(DomainError::PlanInstanceNotFound(plan_instance_id))
    }

    /// Create a plan instance in NotStarted.
    pub async fn create_instance(&self, plan_id: &str, prompt: &str) -> DomainResult<Uuid> {
        let plan = self.plan(plan_id).await?;
        let instance = PlanInstance::from_plan(&plan, prompt);
        let id = instance.id;

        self.core.persist(&instance).await;
        self.core
            .instances
            .write()
            .await
            .insert(id, Arc::new(InstanceHandle::new(plan, instance)));

        info!(plan_id, plan_instance_id = %id, "Plan instance created");
        Ok(id)
    }

    /// Seed context, start the main task and launch the driver.
    #[instrument(skip(self), level = "debug")]
    pub async fn start(&self, plan_instance_id: Uuid) -> DomainResult<()> {
        let handle = self.handle(plan_instance_id).await?;
        {
            let mut st = handle.state.lock().await;
            let plan = Arc::clone(&handle.plan);
            st.instance.start(&plan)?;
            self.core.persist(&st.instance).await;
        }
        info!(%plan_instance_id, "Plan instance started");
        ensure_driver(&self.core, &handle).await;
        Ok(())
    }

    /// Create and start an instance in one step.
    pub async fn run(&self, plan_id: &str, prompt: &str) -> DomainResult<Uuid> {
        let id = self.create_instance(plan_id, prompt).await?;
        self.start(id).await?;
        Ok(id)
    }

    /// Push an externally observed status change.
    #[instrument(skip(self), level = "debug")]
    pub async fn update_task_status(
        &self,
        plan_instance_id: Uuid,
        task_id: &str,
        status: TaskStatus,
        reason: &str,
    ) -> DomainResult<Option<StatusTransition>> {
        let handle = self.handle(plan_instance_id).await?;
        let transition = {
            let mut st = handle.state.lock().await;
            if !st.instance.is_active() {
                return Err(DomainError::InvalidStateTransition {
                    from: st.instance.status.to_string(),
                    to: status.to_string(),
                    reason: format!("plan instance is {}", st.instance.status),
                });
            }
            let transition = st.instance.update_task_status(task_id, status, reason)?;
            self.core.persist(&st.instance).await;
            transition
        };
        handle.wake.notify_one();
        Ok(transition)
    }

    /// Mark the instance done on behalf of an external verifier.
    #[instrument(skip(self), level = "debug")]
    pub async fn mark_done(&self, plan_instance_id: Uuid) -> DomainResult<()> {
        let handle = self.handle(plan_instance_id).await?;
        {
            let mut st = handle.state.lock().await;
            complete_instance(&mut st.instance, "marked_done")?;
            self.core.persist(&st.instance).await;
        }
        handle.wake.notify_one();
        Ok(())
    }

    /// Cancel the instance and stop its driver.
    #[instrument(skip(self), level = "debug")]
    pub async fn cancel(&self, plan_instance_id: Uuid) -> DomainResult<()> {
        let handle = self.handle(plan_instance_id).await?;
        {
            let mut st = handle.state.lock().await;
            if !st.instance.cancel() {
                return Err(DomainError::InvalidStateTransition {
                    from: st.instance.status.to_string(),
                    to: PlanInstanceStatus::Cancelled.to_string(),
                    reason: "plan instance already finished".to_string(),
                });
            }
            st.scheduled_retry = None;
            self.core.persist(&st.instance).await;
        }
        if let Some(driver) = handle.driver.lock().await.take() {
            driver.abort();
        }
        info!(%plan_instance_id, "Plan instance cancelled");
        Ok(())
    }

    /// Resume an instance parked after exhausting its retries.
    #[instrument(skip(self), level = "debug")]
    pub async fn resume(&self, plan_instance_id: Uuid) -> DomainResult<()> {
        let handle = self.handle(plan_instance_id).await?;
        {
            let mut st = handle.state.lock().await;
            if let RetryDecision::Retry { listener_id, .. } =
                self.core.retry_policy.resume(&mut st.instance).await?
            {
                st.scheduled_retry = Some(listener_id);
            }
            self.core.persist(&st.instance).await;
        }
        ensure_driver(&self.core, &handle).await;
        Ok(())
    }

    /// Ask the approval gate about `task_id`; approval sets it Running,
    /// rejection sets it Error.
    pub async fn request_approval(
        &self,
        plan_instance_id: Uuid,
        task_id: &str,
        summary: &str,
    ) -> DomainResult<ApprovalDecision> {
        let handle = self.handle(plan_instance_id).await?;
        if handle.state.lock().await.instance.task(task_id).is_none() {
            return Err(DomainError::TaskNotFound {
                plan_instance_id,
                task_id: task_id.to_string(),
            });
        }

        let decision = self
            .core
            .approval_gate
            .request_approval(plan_instance_id, task_id, summary)
            .await?;

        match &decision {
            ApprovalDecision::Approved => {
                self.update_task_status(plan_instance_id, task_id, TaskStatus::Running, "approved")
                    .await?;
            }
            ApprovalDecision::Rejected { reason } => {
                {
                    let mut st = handle.state.lock().await;
                    let task = st.instance.task_mut(task_id)?;
                    task.context
                        .values
                        .insert("approval_rejection".to_string(), Value::String(reason.clone()));
                }
                self.update_task_status(plan_instance_id, task_id, TaskStatus::Error, "approval_rejected")
                    .await?;
            }
        }
        Ok(decision)
    }

    /// Read accessor for external verifiers.
    pub async fn get_plan_context(&self, plan_instance_id: Uuid) -> DomainResult<PlanContext> {
        Ok(self.get_instance(plan_instance_id).await?.plan_context())
    }

    /// Snapshot of an instance, from memory or the instance repository.
    pub async fn get_instance(&self, plan_instance_id: Uuid) -> DomainResult<PlanInstance> {
        if let Ok(handle) = self.handle(plan_instance_id).await {
            return Ok(handle.state.lock().await.instance.clone());
        }
        self.core
            .instance_repo
            .get(plan_instance_id)
            .await?
            .ok_or(DomainError::PlanInstanceNotFound(plan_instance_id))
    }

    pub async fn list_instances(&self) -> Vec<Uuid> {
        self.core.instances.read().await.keys().copied().collect()
    }

    pub async fn execution_summary(&self, plan_instance_id: Uuid) -> DomainResult<ExecutionSummary> {
        let instance = self.get_instance(plan_instance_id).await?;
        let retry_counts = self
            .core
            .retry_policy
            .ledger()
            .snapshot(plan_instance_id)
            .await
            .into_iter()
            .collect();
        Ok(summarize(&instance, retry_counts))
    }

    /// Wait until the instance has nothing left to process or is terminal.
    pub async fn wait_for_idle(&self, plan_instance_id: Uuid, timeout: Duration) -> DomainResult<PlanInstance> {
        let handle = self.handle(plan_instance_id).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let st = handle.state.lock().await;
                if st.is_idle() {
                    return Ok(st.instance.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DomainError::ExecutionFailed(format!(
                    "plan instance {plan_instance_id} still busy after {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop every driver after saving a final snapshot of each instance.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<InstanceHandle>> = self.core.instances.read().await.values().cloned().collect();
        for handle in handles {
            {
                let st = handle.state.lock().await;
                self.core.persist(&st.instance).await;
            }
            if let Some(driver) = handle.driver.lock().await.take() {
                driver.abort();
            }
        }
        info!("Plan runtime shut down");
    }
}

/// Build an [`ExecutionSummary`] from a snapshot and its retry counters.
pub fn summarize(instance: &PlanInstance, retry_counts: BTreeMap<String, u32>) -> ExecutionSummary {
    ExecutionSummary {
        plan_instance_id: instance.id,
        plan_id: instance.plan_id.clone(),
        status: instance.status,
        main_task_id: instance.main_task_id.clone(),
        task_statuses: instance
            .task_instances
            .iter()
            .map(|(id, task)| (id.clone(), task.status.clone()))
            .collect(),
        executed_listeners: instance.executed_listener_ids.iter().cloned().collect(),
        retry_counts,
        transitions: instance
            .task_instances
            .values()
            .map(|t| t.status_trace.len().saturating_sub(1))
            .sum(),
        error_info: instance.error_info.clone(),
        started_at: instance.started_at,
        completed_at: instance.completed_at,
        duration_ms: match (instance.started_at, instance.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::MockAgentRuntime;
    use crate::adapters::sandbox::ScriptSandbox;
    use crate::domain::models::{Listener, OutputSpec, TaskDefinition};

    fn runtime() -> PlanRuntime {
        PlanRuntime::builder(Arc::new(MockAgentRuntime::new()), Arc::new(ScriptSandbox::default()))
            .with_runtime_config(RuntimeConfig {
                poll_interval_ms: 10,
                ..RuntimeConfig::default()
            })
            .build()
    }

    fn plan() -> Plan {
        Plan::new("p", "P")
            .with_task(TaskDefinition::new("001", "Main"))
            .with_task(TaskDefinition::new("002", "Sub"))
            .with_listener(
                Listener::code("L1", "001", "Running", "result.context = {\"n\": 1}")
                    .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
            )
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_plan() {
        let rt = runtime();
        let bad = Plan::new("p", "P");
        assert!(matches!(
            rt.register_plan(bad).await,
            Err(DomainError::ValidationFailed(_))
        ));
        assert!(matches!(
            rt.create_instance("missing", "x").await,
            Err(DomainError::PlanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_main_task_fallback_from_config() {
        let rt = runtime();
        let plan = Plan::new("p", "P")
            .with_main_task_id("root")
            .with_task(TaskDefinition::new("001", "Main"));
        rt.register_plan(plan).await.unwrap();
        let id = rt.create_instance("p", "go").await.unwrap();
        assert_eq!(rt.get_instance(id).await.unwrap().main_task_id, "001");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let rt = runtime();
        rt.register_plan(plan()).await.unwrap();
        let id = rt.run("p", "go").await.unwrap();
        assert!(rt.start(id).await.is_err());
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn test_summary_after_run() {
        let rt = runtime();
        rt.register_plan(plan()).await.unwrap();
        let id = rt.run("p", "go").await.unwrap();
        rt.wait_for_idle(id, Duration::from_secs(5)).await.unwrap();
        rt.mark_done(id).await.unwrap();

        let summary = rt.execution_summary(id).await.unwrap();
        assert_eq!(summary.status, PlanInstanceStatus::Done);
        assert_eq!(summary.task_statuses["002"], TaskStatus::Done);
        assert_eq!(summary.task_statuses["001"], TaskStatus::Done);
        assert_eq!(summary.executed_listeners, vec!["L1"]);
        assert!(summary.duration_ms.is_some());
        assert!(rt.mark_done(id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_rejects_updates() {
        let rt = runtime();
        rt.register_plan(plan()).await.unwrap();
        let id = rt.create_instance("p", "go").await.unwrap();
        rt.cancel(id).await.unwrap();

        assert!(rt.cancel(id).await.is_err());
        assert!(rt
            .update_task_status(id, "002", TaskStatus::Done, "late")
            .await
            .is_err());
        assert_eq!(
            rt.get_instance(id).await.unwrap().status,
            PlanInstanceStatus::Cancelled
        );
    }
}
