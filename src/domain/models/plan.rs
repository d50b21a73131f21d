//! Plan definition model.
//!
//! A plan is the immutable template a plan instance is created from: the
//! task metadata, the designated main task, and the listener network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

use super::listener::{Listener, ListenerAction};
use super::task_instance::TaskStatus;
use super::trigger::{TriggerCondition, TRIGGERING_TASK_ALIAS};
use crate::domain::errors::{DomainError, DomainResult};

/// Conventional id of the main task.
pub const DEFAULT_MAIN_TASK_ID: &str = "001";

fn default_main_task_id() -> String {
    DEFAULT_MAIN_TASK_ID.to_string()
}

/// Task metadata used to seed task instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Status the task instance starts in; `NotStarted` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_status: Option<TaskStatus>,
    /// Initial `values` of the task instance context.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl TaskDefinition {
    pub fn new(task_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            description: String::new(),
            initial_status: None,
            context: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_initial_status(mut self, status: TaskStatus) -> Self {
        self.initial_status = Some(status);
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// Immutable plan template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_main_task_id")]
    pub main_task_id: String,
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            main_task_id: default_main_task_id(),
            tasks: Vec::new(),
            listeners: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_main_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.main_task_id = task_id.into();
        self
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn listener(&self, listener_id: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.id == listener_id)
    }

    /// Parse a plan from YAML. JSON documents are valid YAML too.
    pub fn from_yaml_str(source: &str) -> DomainResult<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> DomainResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a plan file, choosing the format from the extension.
    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            DomainError::ValidationFailed(format!("Cannot read plan file {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&source),
            _ => Self::from_yaml_str(&source),
        }
    }

    /// Check the structural rules a plan must satisfy before instantiation.
    pub fn validate(&self) -> DomainResult<()> {
        if self.id.trim().is_empty() {
            return Err(DomainError::ValidationFailed("Plan id cannot be empty".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "Plan '{}' declares no tasks",
                self.id
            )));
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if task.task_id.trim().is_empty() {
                return Err(DomainError::ValidationFailed("Task id cannot be empty".to_string()));
            }
            if !task_ids.insert(task.task_id.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "Duplicate task id '{}'",
                    task.task_id
                )));
            }
        }

        if !task_ids.contains(self.main_task_id.as_str()) {
            return Err(DomainError::ValidationFailed(format!(
                "Main task '{}' is not declared",
                self.main_task_id
            )));
        }

        let mut listener_ids = HashSet::new();
        for listener in &self.listeners {
            if !listener_ids.insert(listener.id.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "Duplicate listener id '{}'",
                    listener.id
                )));
            }
            self.validate_listener(listener, &task_ids)?;
        }

        Ok(())
    }

    fn validate_listener(&self, listener: &Listener, task_ids: &HashSet<&str>) -> DomainResult<()> {
        let fail = |msg: String| Err(DomainError::ValidationFailed(format!("Listener '{}': {msg}", listener.id)));

        if listener.trigger_task_id.is_empty() {
            return fail("no trigger task ids".to_string());
        }
        for id in listener.trigger_task_id.iter() {
            if !task_ids.contains(id) {
                return fail(format!("trigger task '{id}' is not declared"));
            }
        }

        match TriggerCondition::parse(&listener.trigger_condition) {
            Ok(TriggerCondition::Expr(expr)) => {
                for subject in expr.subjects() {
                    if subject != TRIGGERING_TASK_ALIAS && !task_ids.contains(subject) {
                        return fail(format!("condition names unknown task '{subject}'"));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => return fail(format!("invalid trigger condition: {e}")),
        }

        match &listener.action {
            ListenerAction::Agent {
                agent_id,
                action_prompt,
            } => {
                if agent_id.trim().is_empty() || action_prompt.trim().is_empty() {
                    return fail("agent listeners need agent_id and action_prompt".to_string());
                }
            }
            ListenerAction::Code { code_snippet } => {
                if code_snippet.trim().is_empty() {
                    return fail("code listeners need a code_snippet".to_string());
                }
            }
        }

        for output in [&listener.success_output, &listener.failure_output].into_iter().flatten() {
            if !task_ids.contains(output.task_id.as_str()) {
                return fail(format!("output targets unknown task '{}'", output.task_id));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::listener::OutputSpec;
    use crate::domain::models::task_instance::TaskStatus;

    fn plan() -> Plan {
        Plan::new("onboarding", "Employee onboarding")
            .with_task(TaskDefinition::new("001", "Onboard"))
            .with_task(TaskDefinition::new("002", "Register"))
            .with_listener(
                Listener::code("L1", "001", "001.status == Running", "result = {};")
                    .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
            )
    }

    #[test]
    fn test_valid_plan() {
        assert!(plan().validate().is_ok());
    }

    #[test]
    fn test_missing_main_task() {
        let plan = plan().with_main_task_id("999");
        assert!(matches!(plan.validate(), Err(DomainError::ValidationFailed(_))));
    }

    #[test]
    fn test_duplicate_task() {
        let plan = plan().with_task(TaskDefinition::new("002", "Again"));
        let err = plan.validate().unwrap_err().to_string();
        assert!(err.contains("Duplicate task id"));
    }

    #[test]
    fn test_unknown_output_target() {
        let plan = plan().with_listener(
            Listener::code("L2", "002", "Done", "result = {};")
                .with_failure_output(OutputSpec::new("404", TaskStatus::Error)),
        );
        let err = plan.validate().unwrap_err().to_string();
        assert!(err.contains("unknown task '404'"));
    }

    #[test]
    fn test_bad_condition_rejected() {
        let plan = plan().with_listener(Listener::code("L2", "002", "002.status ~ Done", "result = {};"));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_empty_code_rejected() {
        let plan = plan().with_listener(Listener::code("L2", "002", "Done", "  "));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_yaml_defaults_main_task() {
        let yaml = r#"
id: p1
tasks:
  - task_id: "001"
  - task_id: "002"
    context:
      department: hr
listeners:
  - id: L1
    trigger_task_id: "001"
    trigger_condition: Running
    listener_type: code
    code_snippet: "result = {success: true};"
"#;
        let plan = Plan::from_yaml_str(yaml).unwrap();
        assert_eq!(plan.main_task_id, DEFAULT_MAIN_TASK_ID);
        assert_eq!(plan.task("002").unwrap().context["department"], "hr");
        plan.validate().unwrap();
    }
}
