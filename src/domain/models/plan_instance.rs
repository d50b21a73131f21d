//! Plan instance domain model.
//!
//! A plan instance is one live execution of a [`Plan`]. It owns its task
//! instances, the set of listeners that already fired, the queue of status
//! transitions awaiting dispatch, and an append-only run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use uuid::Uuid;

use super::plan::Plan;
use super::run_log::{RunEvent, RunLogEntry};
use super::task_instance::{StatusTransition, TaskContext, TaskInstance, TaskStatus};
use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle status of a plan instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanInstanceStatus {
    NotStarted,
    Running,
    Done,
    Error,
    Cancelled,
}

impl Default for PlanInstanceStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl PlanInstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "not_started" | "notstarted" => Some(Self::NotStarted),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for PlanInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker stored in [`PlanErrorInfo::status`] while retries are exhausted.
pub const WAITING_FOR_RESUME: &str = "waiting_for_resume";
/// Marker stored in [`PlanErrorInfo::status`] for structural failures.
pub const UNRECOVERABLE: &str = "unrecoverable";

/// Structured error attached to a plan instance in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_retries: Option<u32>,
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_id: Option<String>,
}

impl PlanErrorInfo {
    pub fn waiting_for_resume(listener_id: &str, failed_retries: u32) -> Self {
        Self {
            failed_retries: Some(failed_retries),
            status: WAITING_FOR_RESUME.to_string(),
            message: format!(
                "Listener {listener_id} failed after {failed_retries} retries; waiting for resume"
            ),
            listener_id: Some(listener_id.to_string()),
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self {
            failed_retries: None,
            status: UNRECOVERABLE.to_string(),
            message: message.into(),
            listener_id: None,
        }
    }

    pub fn is_waiting_for_resume(&self) -> bool {
        self.status == WAITING_FOR_RESUME
    }
}

/// Instance-level context: `values` (system/user sections) and `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceContext {
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Read-only view of one task handed to verifiers, listeners and agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub context: TaskContext,
}

/// Read-only view of a plan instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanContext {
    pub plan_id: String,
    pub plan_instance_id: Uuid,
    pub main_task_id: String,
    pub status: PlanInstanceStatus,
    pub prompt: String,
    pub tasks: BTreeMap<String, TaskSnapshot>,
}

impl PlanContext {
    pub fn task_status(&self, task_id: &str) -> Option<&TaskStatus> {
        self.tasks.get(task_id).map(|t| &t.status)
    }

    pub fn main_task(&self) -> Option<&TaskSnapshot> {
        self.tasks.get(&self.main_task_id)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One live execution of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInstance {
    pub id: Uuid,
    pub plan_id: String,
    pub main_task_id: String,
    pub prompt: String,
    pub status: PlanInstanceStatus,
    pub context: InstanceContext,
    pub task_instances: BTreeMap<String, TaskInstance>,
    pub executed_listener_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<PlanErrorInfo>,
    #[serde(default)]
    pub run_log: Vec<RunLogEntry>,
    /// Transitions not yet dispatched by the loop, oldest first.
    #[serde(default)]
    pending: VecDeque<StatusTransition>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PlanInstance {
    /// Instantiate a plan. Task instances are seeded from the plan's task metadata.
    pub fn from_plan(plan: &Plan, prompt: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let task_instances = plan
            .tasks
            .iter()
            .map(|def| {
                let mut task = TaskInstance::new(id, &def.task_id, &def.name).with_values(def.context.clone());
                if let Some(status) = &def.initial_status {
                    task = task.with_initial_status(status.clone());
                }
                (def.task_id.clone(), task)
            })
            .collect();

        Self {
            id,
            plan_id: plan.id.clone(),
            main_task_id: plan.main_task_id.clone(),
            prompt: prompt.into(),
            status: PlanInstanceStatus::NotStarted,
            context: InstanceContext::default(),
            task_instances,
            executed_listener_ids: BTreeSet::new(),
            error_info: None,
            run_log: Vec::new(),
            pending: VecDeque::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskInstance> {
        self.task_instances.get(task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> DomainResult<&mut TaskInstance> {
        let plan_instance_id = self.id;
        self.task_instances
            .get_mut(task_id)
            .ok_or_else(|| DomainError::TaskNotFound {
                plan_instance_id,
                task_id: task_id.to_string(),
            })
    }

    pub fn main_task(&self) -> Option<&TaskInstance> {
        self.task_instances.get(&self.main_task_id)
    }

    pub fn is_main_task(&self, task_id: &str) -> bool {
        self.main_task_id == task_id
    }

    /// Accepting state changes: not yet terminal and not cancelled.
    pub fn is_active(&self) -> bool {
        matches!(self.status, PlanInstanceStatus::NotStarted | PlanInstanceStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn record(&mut self, event: RunEvent) {
        self.run_log.push(RunLogEntry::now(event));
        self.updated_at = Utc::now();
    }

    /// Seed context, move to Running and start the main task.
    pub fn start(&mut self, plan: &Plan) -> DomainResult<Option<StatusTransition>> {
        if self.status != PlanInstanceStatus::NotStarted {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: PlanInstanceStatus::Running.to_string(),
                reason: "plan instance already started".to_string(),
            });
        }

        let now = Utc::now();
        self.context = InstanceContext {
            values: json_object(json!({
                "system": {
                    "plan_id": plan.id,
                    "plan_name": plan.name,
                    "plan_description": plan.description,
                },
                "user": {
                    "prompt": self.prompt,
                    "user_input": self.prompt,
                },
            })),
            metadata: json_object(json!({
                "created_at": self.created_at.to_rfc3339(),
                "started_at": now.to_rfc3339(),
            })),
        };
        self.status = PlanInstanceStatus::Running;
        self.started_at = Some(now);
        self.record(RunEvent::PlanStarted);

        let main_task_id = self.main_task_id.clone();
        let is_not_started = self.main_task().is_some_and(|t| t.status == TaskStatus::NotStarted);
        if is_not_started {
            self.update_task_status(&main_task_id, TaskStatus::Running, "plan_instance_started")
        } else {
            Ok(None)
        }
    }

    /// Update a task's status; a real change is logged and queued for dispatch.
    pub fn update_task_status(
        &mut self,
        task_id: &str,
        new_status: TaskStatus,
        reason: &str,
    ) -> DomainResult<Option<StatusTransition>> {
        let Some(transition) = self.task_mut(task_id)?.update_status(new_status, reason) else {
            return Ok(None);
        };

        self.record(RunEvent::TaskStatusChanged {
            task_id: transition.task_id.clone(),
            from: transition.old_status.clone(),
            to: transition.new_status.clone(),
            reason: transition.reason.clone(),
        });
        self.pending.push_back(transition.clone());
        Ok(Some(transition))
    }

    /// Pop the oldest undispatched transition and clear its `is_new` flag.
    pub fn next_transition(&mut self) -> Option<StatusTransition> {
        let transition = self.pending.pop_front()?;
        if let Some(task) = self.task_instances.get_mut(&transition.task_id) {
            task.mark_dispatched(transition.trace_index);
        }
        Some(transition)
    }

    pub fn has_pending_transitions(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Mark the instance verified. Legal only while Running.
    pub fn complete(&mut self) -> bool {
        if self.status != PlanInstanceStatus::Running {
            return false;
        }
        let now = Utc::now();
        self.status = PlanInstanceStatus::Done;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Move a running instance to Error.
    pub fn fail(&mut self, error_info: PlanErrorInfo) -> bool {
        if self.status != PlanInstanceStatus::Running {
            return false;
        }
        let now = Utc::now();
        self.status = PlanInstanceStatus::Error;
        self.error_info = Some(error_info);
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Cancel from NotStarted or Running. Pending transitions are dropped.
    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        let now = Utc::now();
        self.status = PlanInstanceStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.pending.clear();
        self.record(RunEvent::Cancelled);
        true
    }

    /// Flip an Error instance back to Running for a resume.
    pub fn reopen(&mut self) {
        self.status = PlanInstanceStatus::Running;
        self.error_info = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
    }

    /// Current status of every task, for condition evaluation.
    pub fn statuses(&self) -> HashMap<String, TaskStatus> {
        self.task_instances
            .iter()
            .map(|(id, task)| (id.clone(), task.status.clone()))
            .collect()
    }

    pub fn tasks_with_status(&self, status: &TaskStatus) -> Vec<&TaskInstance> {
        self.task_instances.values().filter(|t| &t.status == status).collect()
    }

    pub fn plan_context(&self) -> PlanContext {
        PlanContext {
            plan_id: self.plan_id.clone(),
            plan_instance_id: self.id,
            main_task_id: self.main_task_id.clone(),
            status: self.status,
            prompt: self.prompt.clone(),
            tasks: self
                .task_instances
                .iter()
                .map(|(id, task)| {
                    (
                        id.clone(),
                        TaskSnapshot {
                            status: task.status.clone(),
                            context: task.context.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

fn json_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
