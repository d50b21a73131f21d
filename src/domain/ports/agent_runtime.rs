//! Port for agent runtimes.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentResponse;

/// Executes a prompt on behalf of an agent.
///
/// Provider and prompt-protocol details live behind this trait; the runtime
/// only depends on the [`AgentResponse`] shape.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Runtime name for logging.
    fn name(&self) -> &'static str;

    /// Execute `prompt` as `agent_id` with the plan context attached.
    async fn execute(&self, agent_id: &str, prompt: &str, context: &Value) -> DomainResult<AgentResponse>;
}
