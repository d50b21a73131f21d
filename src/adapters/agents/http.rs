//! Agent runtime backed by a remote HTTP service.
//!
//! Each call is a `POST {base_url}/agents/{agent_id}/execute` carrying the
//! prompt and plan context. Connection errors and 5xx responses are retried
//! with exponential backoff; anything else is reported to the listener
//! executor as an agent runtime error.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentResponse, AgentRuntimeConfig};
use crate::domain::ports::AgentRuntime;

#[derive(Debug, Error)]
pub enum AgentRuntimeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Transport { url: String, #[source] source: reqwest::Error },

    #[error("Agent runtime returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Invalid agent response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl AgentRuntimeError {
    /// Connection failures, timeouts and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_connect() || source.is_timeout() || source.is_request(),
            Self::Status { status, .. } => status.is_server_error(),
            Self::Client(_) | Self::Decode(_) => false,
        }
    }
}

impl From<AgentRuntimeError> for DomainError {
    fn from(err: AgentRuntimeError) -> Self {
        DomainError::AgentRuntime(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    agent_id: &'a str,
    prompt: &'a str,
    context: &'a Value,
}

pub struct HttpAgentRuntime {
    client: Client,
    base_url: String,
    max_transport_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl HttpAgentRuntime {
    pub fn new(config: &AgentRuntimeConfig) -> Result<Self, AgentRuntimeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(AgentRuntimeError::Client)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_transport_retries: config.max_transport_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, agent_id: &str) -> String {
        format!("{}/agents/{agent_id}/execute", self.base_url)
    }

    async fn send_once(&self, url: &str, body: &ExecuteRequest<'_>) -> Result<AgentResponse, AgentRuntimeError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| AgentRuntimeError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentRuntimeError::Status { status, body });
        }

        response.json::<AgentResponse>().await.map_err(AgentRuntimeError::Decode)
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, agent_id: &str, prompt: &str, context: &Value) -> DomainResult<AgentResponse> {
        let url = self.endpoint(agent_id);
        let body = ExecuteRequest {
            agent_id,
            prompt,
            context,
        };
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();
        let attempts = AtomicU32::new(0);

        debug!(%agent_id, %url, "Calling agent runtime");
        backoff::future::retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            match self.send_once(&url, &body).await {
                Ok(response) => Ok(response),
                Err(err) if err.is_transient() && attempt < self.max_transport_retries => {
                    warn!(%agent_id, attempt = attempt + 1, error = %err, "Transient agent runtime error, retrying");
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .await
        .map_err(DomainError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = AgentRuntimeConfig {
            base_url: "http://agents.local:9000/".to_string(),
            ..Default::default()
        };
        let runtime = HttpAgentRuntime::new(&config).unwrap();
        assert_eq!(runtime.base_url(), "http://agents.local:9000");
        assert_eq!(runtime.endpoint("coder"), "http://agents.local:9000/agents/coder/execute");
    }

    #[test]
    fn test_server_errors_are_transient() {
        let server = AgentRuntimeError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        let client = AgentRuntimeError::Status {
            status: StatusCode::BAD_REQUEST,
            body: "bad prompt".to_string(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(DomainError::from(client).to_string().contains("bad prompt"));
    }

    #[test]
    fn test_request_body_shape() {
        let context = serde_json::json!({"plan_id": "p"});
        let body = ExecuteRequest {
            agent_id: "coder",
            prompt: "do it",
            context: &context,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["agent_id"], "coder");
        assert_eq!(value["context"]["plan_id"], "p");
    }
}
