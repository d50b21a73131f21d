//! Mock agent runtime for testing and dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentResponse;
use crate::domain::ports::AgentRuntime;

/// Mock response configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MockResponse {
    /// Return this response from the runtime.
    Respond { response: AgentResponse },
    /// Fail the call itself, as a transport error would.
    Error { message: String },
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::success("Mock agent completed successfully.")
    }
}

impl MockResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Respond {
            response: AgentResponse::ok(output),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self::Respond {
            response: AgentResponse::failed(output),
        }
    }

    pub fn response(response: AgentResponse) -> Self {
        Self::Respond { response }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A call the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub agent_id: String,
    pub prompt: String,
    pub context: Value,
}

/// Scripted responses per agent, loadable from YAML or JSON.
///
/// ```yaml
/// default:
///   kind: respond
///   response: { success: true, response: "ok" }
/// agents:
///   hr_agent:
///     - kind: error
///       message: "connection reset"
///     - kind: respond
///       response: { success: true, response: "registered" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockScript {
    #[serde(default)]
    pub default: Option<MockResponse>,
    #[serde(default)]
    pub agents: HashMap<String, Vec<MockResponse>>,
}

impl MockScript {
    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| DomainError::ValidationFailed(format!("cannot read {}: {e}", path.display())))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(&source)?)
        } else {
            Ok(serde_yaml::from_str(&source)?)
        }
    }
}

/// Mock agent runtime.
///
/// Each agent has a queue of scripted responses. Once a queue is drained the
/// last response is repeated; agents with no queue get the default response.
pub struct MockAgentRuntime {
    default_response: MockResponse,
    scripted: Arc<RwLock<HashMap<String, VecDeque<MockResponse>>>>,
    sticky: Arc<RwLock<HashMap<String, MockResponse>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    delay: Option<Duration>,
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        Self::with_default_response(MockResponse::default())
    }

    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            default_response: response,
            scripted: Arc::new(RwLock::new(HashMap::new())),
            sticky: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            delay: None,
        }
    }

    pub fn from_script(script: MockScript) -> Self {
        let runtime = Self::with_default_response(script.default.unwrap_or_default());
        let scripted = script
            .agents
            .into_iter()
            .map(|(agent, responses)| (agent, responses.into_iter().collect()))
            .collect();
        Self {
            scripted: Arc::new(RwLock::new(scripted)),
            ..runtime
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Always answer `agent_id` with `response`.
    pub async fn set_response(&self, agent_id: &str, response: MockResponse) {
        self.scripted.write().await.remove(agent_id);
        self.sticky.write().await.insert(agent_id.to_string(), response);
    }

    /// Queue responses for `agent_id`, consumed in order.
    pub async fn push_responses(&self, agent_id: &str, responses: impl IntoIterator<Item = MockResponse>) {
        let mut scripted = self.scripted.write().await;
        scripted.entry(agent_id.to_string()).or_default().extend(responses);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self, agent_id: &str) -> usize {
        self.calls.read().await.iter().filter(|c| c.agent_id == agent_id).count()
    }

    async fn next_response(&self, agent_id: &str) -> MockResponse {
        let mut scripted = self.scripted.write().await;
        if let Some(queue) = scripted.get_mut(agent_id) {
            if let Some(response) = queue.pop_front() {
                if queue.is_empty() {
                    scripted.remove(agent_id);
                    self.sticky.write().await.insert(agent_id.to_string(), response.clone());
                }
                return response;
            }
        }
        drop(scripted);

        let sticky = self.sticky.read().await;
        sticky
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, agent_id: &str, prompt: &str, context: &Value) -> DomainResult<AgentResponse> {
        self.calls.write().await.push(RecordedCall {
            agent_id: agent_id.to_string(),
            prompt: prompt.to_string(),
            context: context.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_response(agent_id).await {
            MockResponse::Respond { response } => Ok(response),
            MockResponse::Error { message } => Err(DomainError::AgentRuntime(message)),
        }
    }
}
