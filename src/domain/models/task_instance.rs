//! Task instance domain model.
//!
//! A task instance is the runtime record of one task inside a plan instance:
//! its current status, a free-form context, and an append-only status trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Status of a task instance.
///
/// Open set: listener code may introduce statuses beyond the well-known
/// ones, which are carried verbatim in [`TaskStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    NotStarted,
    Running,
    Done,
    Error,
    Pending,
    /// A retry of the failed listener is in flight. Never matched by listeners.
    Retrying,
    Other(String),
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Running => "Running",
            Self::Done => "Done",
            Self::Error => "Error",
            Self::Pending => "Pending",
            Self::Retrying => "Retrying",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Parse a status, folding case and snake_case spellings of the
    /// well-known values. Unknown values are preserved as-is.
    pub fn parse(s: &str) -> Self {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_lowercase();
        match folded.as_str() {
            "notstarted" => Self::NotStarted,
            "running" => Self::Running,
            "done" => Self::Done,
            "error" => Self::Error,
            "pending" => Self::Pending,
            "retrying" => Self::Retrying,
            _ => Self::Other(s.trim().to_string()),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a task's status trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTraceEntry {
    pub status: TaskStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the entry is appended, cleared once the loop has dispatched it.
    #[serde(default)]
    pub is_new: bool,
}

/// Structured record of a listener failure, stored on the task it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerErrorInfo {
    pub listener_id: String,
    pub listener_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Attempt bookkeeping exposed to listeners while a retry is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub attempt: u32,
    pub listener_id: String,
    pub max_retries: u32,
}

/// Context accumulated by a task instance.
///
/// Listener payloads merge into `values`; the remaining fields are written
/// by the runtime itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default)]
    pub values: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_listener_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ListenerErrorInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Value>,
}

impl TaskContext {
    /// Shallow-merge a payload into `values`; incoming keys win.
    pub fn merge_values(&mut self, payload: &Map<String, Value>) {
        for (key, value) in payload {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// A status change produced by [`TaskInstance::update_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub plan_instance_id: Uuid,
    pub task_id: String,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub reason: String,
    /// Position of the corresponding entry in the task's status trace.
    pub trace_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// Runtime record of one task within a plan instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: String,
    pub plan_instance_id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub context: TaskContext,
    pub status_trace: Vec<StatusTraceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInstance {
    /// Create a task instance in `NotStarted`, trace seeded with "initialized".
    pub fn new(plan_instance_id: Uuid, task_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            plan_instance_id,
            name: name.into(),
            status: TaskStatus::NotStarted,
            context: TaskContext::default(),
            status_trace: vec![StatusTraceEntry {
                status: TaskStatus::NotStarted,
                reason: "initialized".to_string(),
                timestamp: now,
                is_new: false,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the seeded status. Not a transition: nothing is queued.
    pub fn with_initial_status(mut self, status: TaskStatus) -> Self {
        if let Some(seed) = self.status_trace.first_mut() {
            seed.status = status.clone();
        }
        self.status = status;
        self
    }

    pub fn with_values(mut self, values: Map<String, Value>) -> Self {
        self.context.values = values;
        self
    }

    /// The single mutator of task status.
    ///
    /// Returns `None` when `new_status` equals the current status; nothing is
    /// appended and nothing downstream should fire.
    pub fn update_status(&mut self, new_status: TaskStatus, reason: impl Into<String>) -> Option<StatusTransition> {
        if self.status == new_status {
            return None;
        }

        let now = Utc::now();
        let reason = reason.into();
        let old_status = std::mem::replace(&mut self.status, new_status.clone());

        self.status_trace.push(StatusTraceEntry {
            status: new_status.clone(),
            reason: reason.clone(),
            timestamp: now,
            is_new: true,
        });
        self.updated_at = now;

        Some(StatusTransition {
            plan_instance_id: self.plan_instance_id,
            task_id: self.task_id.clone(),
            old_status,
            new_status,
            reason,
            trace_index: self.status_trace.len() - 1,
            timestamp: now,
        })
    }

    /// Clear the `is_new` flag on a dispatched trace entry.
    pub fn mark_dispatched(&mut self, trace_index: usize) {
        if let Some(entry) = self.status_trace.get_mut(trace_index) {
            entry.is_new = false;
        }
    }

    pub fn last_trace_entry(&self) -> Option<&StatusTraceEntry> {
        self.status_trace.last()
    }

    /// Trace is non-empty and its tail agrees with the current status.
    pub fn trace_is_consistent(&self) -> bool {
        self.status_trace
            .last()
            .is_some_and(|entry| entry.status == self.status)
    }
}
