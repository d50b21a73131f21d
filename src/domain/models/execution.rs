//! Listener execution results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task_instance::{ListenerErrorInfo, TaskStatus};

/// A single task change produced by a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    /// Merged into the target task's context `values` before the status change.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Set on the default failure path; marks the task with the failing listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ListenerErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "listener_update".to_string()
}

impl TaskUpdate {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            context: Map::new(),
            failure: None,
            error: None,
            reason: default_reason(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_failure(mut self, failure: ListenerErrorInfo) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Normalised result of executing one listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerOutcome {
    pub listener_id: String,
    pub success: bool,
    pub task_updates: Vec<TaskUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ListenerOutcome {
    pub fn success(listener_id: impl Into<String>, task_updates: Vec<TaskUpdate>) -> Self {
        Self {
            listener_id: listener_id.into(),
            success: true,
            task_updates,
            error: None,
        }
    }

    pub fn failure(listener_id: impl Into<String>, error: impl Into<String>, task_updates: Vec<TaskUpdate>) -> Self {
        Self {
            listener_id: listener_id.into(),
            success: false,
            task_updates,
            error: Some(error.into()),
        }
    }
}

/// Raw response returned by an agent runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub result: Value,
}

impl AgentResponse {
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn failed(response: impl Into<String>) -> Self {
        Self {
            success: false,
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools_used = tools.iter().map(|t| (*t).to_string()).collect();
        self
    }
}

/// Canonical shape every agent response is reduced to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub success: bool,
    pub tools_used: Vec<String>,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
