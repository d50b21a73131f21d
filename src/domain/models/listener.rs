//! Listener domain model.
//!
//! Listeners are declarative rules owned by a plan: when a task reaches a
//! matching status they run an action (inline code or an agent) and emit
//! task status updates.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::task_instance::TaskStatus;

/// The set of task ids a listener watches.
///
/// Accepts a single id, a comma-separated string, or a list. Ids are OR-matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TriggerTaskIds(Vec<String>);

impl TriggerTaskIds {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            ids.into_iter()
                .flat_map(|s| {
                    s.as_ref()
                        .split(',')
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                })
                .collect(),
        )
    }

    pub fn contains(&self, task_id: &str) -> bool {
        let task_id = task_id.trim();
        self.0.iter().any(|id| id == task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for TriggerTaskIds {
    fn from(s: &str) -> Self {
        Self::new([s])
    }
}

impl<'de> Deserialize<'de> for TriggerTaskIds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => Self::new([s]),
            Raw::Many(v) => Self::new(v),
            Raw::Number(n) => Self::new([format!("{n:03}")]),
        })
    }
}

/// What a listener does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "listener_type", rename_all = "lowercase")]
pub enum ListenerAction {
    /// Dispatch a templated prompt to an agent.
    Agent { agent_id: String, action_prompt: String },
    /// Run a snippet in the restricted script sandbox.
    Code { code_snippet: String },
}

impl ListenerAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent { .. } => "agent",
            Self::Code { .. } => "code",
        }
    }
}

/// A task update declared on a listener for success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl OutputSpec {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        if let Value::Object(map) = context {
            self.context = map;
        }
        self
    }
}

/// Declarative listener, immutable once a plan instance starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub trigger_task_id: TriggerTaskIds,
    #[serde(default)]
    pub trigger_condition: String,
    #[serde(flatten)]
    pub action: ListenerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_output: Option<OutputSpec>,
    /// Lower fires first.
    #[serde(default)]
    pub priority: i32,
}

impl Listener {
    pub fn code(
        id: impl Into<String>,
        trigger_task_id: impl Into<TriggerTaskIds>,
        trigger_condition: impl Into<String>,
        code_snippet: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            trigger_task_id: trigger_task_id.into(),
            trigger_condition: trigger_condition.into(),
            action: ListenerAction::Code {
                code_snippet: code_snippet.into(),
            },
            success_output: None,
            failure_output: None,
            priority: 0,
        }
    }

    pub fn agent(
        id: impl Into<String>,
        trigger_task_id: impl Into<TriggerTaskIds>,
        trigger_condition: impl Into<String>,
        agent_id: impl Into<String>,
        action_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            trigger_task_id: trigger_task_id.into(),
            trigger_condition: trigger_condition.into(),
            action: ListenerAction::Agent {
                agent_id: agent_id.into(),
                action_prompt: action_prompt.into(),
            },
            success_output: None,
            failure_output: None,
            priority: 0,
        }
    }

    pub fn with_success_output(mut self, output: OutputSpec) -> Self {
        self.success_output = Some(output);
        self
    }

    pub fn with_failure_output(mut self, output: OutputSpec) -> Self {
        self.failure_output = Some(output);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_ids_from_comma_string() {
        let ids = TriggerTaskIds::from("001, 002 ,003");
        assert!(ids.contains("001"));
        assert!(ids.contains("002"));
        assert!(ids.contains(" 003"));
        assert!(!ids.contains("004"));
    }

    #[test]
    fn test_trigger_ids_deserialize_shapes() {
        let single: TriggerTaskIds = serde_json::from_value(json!("001")).unwrap();
        let list: TriggerTaskIds = serde_json::from_value(json!(["001", "002"])).unwrap();
        let comma: TriggerTaskIds = serde_json::from_value(json!("001,002")).unwrap();

        assert_eq!(single.iter().collect::<Vec<_>>(), vec!["001"]);
        assert_eq!(list, comma);
    }

    #[test]
    fn test_listener_yaml_tagged_by_type() {
        let yaml = r#"
id: L002
trigger_task_id: "001"
trigger_condition: "001.status == Running"
listener_type: agent
agent_id: hr
action_prompt: "Register {001.context.name}"
success_output:
  task_id: "002"
  status: Done
  context:
    registered: true
priority: 5
"#;
        let listener: Listener = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(listener.kind(), "agent");
        assert_eq!(listener.priority, 5);
        let output = listener.success_output.unwrap();
        assert_eq!(output.status, TaskStatus::Done);
        assert_eq!(output.context.get("registered"), Some(&json!(true)));
    }

    #[test]
    fn test_code_listener_roundtrips_type_tag() {
        let listener = Listener::code("L1", "001", "Running", "result = {};");
        let value = serde_json::to_value(&listener).unwrap();
        assert_eq!(value["listener_type"], "code");
        assert_eq!(value["code_snippet"], "result = {};");
    }
}
