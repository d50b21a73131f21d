//! Listener execution.
//!
//! Runs one listener against a plan context snapshot and turns whatever
//! happened into a [`ListenerOutcome`]. Errors never escape: sandbox errors,
//! agent runtime errors and timeouts all become failure outcomes carrying
//! task updates, so the applier and the loop only ever see outcomes.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Listener, ListenerAction, ListenerErrorInfo, ListenerOutcome, OutputSpec, PlanContext, TaskStatus, TaskUpdate,
};
use crate::domain::ports::{AgentRuntime, CodeSandbox};
use crate::services::prompt_template;
use crate::services::response_normalizer::ResponseNormalizer;

/// What an action reported, before outputs are resolved.
#[derive(Debug, Default)]
struct ActionResult {
    success: bool,
    /// Merged over the success output's declared context.
    context: Map<String, Value>,
    /// Explicit updates that replace the declared success output.
    task_updates: Option<Vec<TaskUpdate>>,
    error: Option<String>,
}

pub struct ListenerExecutor {
    agent_runtime: Arc<dyn AgentRuntime>,
    sandbox: Arc<dyn CodeSandbox>,
    normalizer: ResponseNormalizer,
    timeout: Duration,
}

impl ListenerExecutor {
    pub fn new(agent_runtime: Arc<dyn AgentRuntime>, sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self {
            agent_runtime,
            sandbox,
            normalizer: ResponseNormalizer::default(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_normalizer(mut self, normalizer: ResponseNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Execute `listener` and resolve its task updates.
    pub async fn execute(&self, listener: &Listener, context: &PlanContext) -> ListenerOutcome {
        let started = std::time::Instant::now();
        let attempt = context
            .main_task()
            .and_then(|t| t.context.retry_info.as_ref())
            .filter(|info| info.listener_id == listener.id)
            .map_or(0, |info| info.attempt);

        info!(
            listener_id = %listener.id,
            listener_type = listener.kind(),
            plan_instance_id = %context.plan_instance_id,
            attempt,
            "Executing listener"
        );

        let result = match tokio::time::timeout(self.timeout, self.run_action(listener, context)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ActionResult {
                error: Some(e.to_string()),
                ..Default::default()
            },
            Err(_) => ActionResult {
                error: Some(format!("listener timed out after {}ms", self.timeout.as_millis())),
                ..Default::default()
            },
        };

        let outcome = if result.success {
            let updates = match result.task_updates {
                Some(updates) => updates,
                None => listener
                    .success_output
                    .as_ref()
                    .map(|output| vec![success_update(listener, output, &result.context)])
                    .unwrap_or_default(),
            };
            ListenerOutcome::success(&listener.id, updates)
        } else {
            let message = result.error.unwrap_or_else(|| "listener reported failure".to_string());
            let update = match &listener.failure_output {
                Some(output) => failure_update(listener, output, &message),
                None => default_failure_update(listener, &context.main_task_id, &message),
            };
            ListenerOutcome::failure(&listener.id, message, vec![update])
        };

        if outcome.success {
            debug!(
                listener_id = %listener.id,
                updates = outcome.task_updates.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Listener succeeded"
            );
        } else {
            warn!(
                listener_id = %listener.id,
                error = outcome.error.as_deref().unwrap_or_default(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Listener failed"
            );
        }
        outcome
    }

    async fn run_action(&self, listener: &Listener, context: &PlanContext) -> DomainResult<ActionResult> {
        match &listener.action {
            ListenerAction::Code { code_snippet } => self.run_code(code_snippet, context),
            ListenerAction::Agent { agent_id, action_prompt } => {
                self.run_agent(agent_id, action_prompt, context).await
            }
        }
    }

    fn run_code(&self, code: &str, context: &PlanContext) -> DomainResult<ActionResult> {
        let output = self.sandbox.execute(code, &context.to_value())?;

        let success = output.result.get("success").and_then(Value::as_bool).unwrap_or(true);
        let error = output.result.get("error").and_then(|e| match e {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });
        let result_context = match output.result.get("context") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let task_updates = match output.task_updates {
            Value::Null => None,
            Value::Array(items) => Some(parse_task_updates(items)?),
            other => {
                return Err(DomainError::ExecutionFailed(format!(
                    "task_updates must be a list, got {other}"
                )))
            }
        };

        Ok(ActionResult {
            success,
            context: result_context,
            task_updates,
            error,
        })
    }

    async fn run_agent(&self, agent_id: &str, action_prompt: &str, context: &PlanContext) -> DomainResult<ActionResult> {
        let prompt = prompt_template::render(action_prompt, context);
        debug!(agent_id, runtime = self.agent_runtime.name(), "Dispatching prompt to agent");

        let raw = self.agent_runtime.execute(agent_id, &prompt, &context.to_value()).await?;
        let normalized = self.normalizer.normalize(&raw);

        let mut result_context = match normalized.payload.get("context") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        if !normalized.tools_used.is_empty() {
            result_context.insert("tools_used".to_string(), Value::from(normalized.tools_used.clone()));
        }

        Ok(ActionResult {
            success: normalized.success,
            context: result_context,
            task_updates: None,
            error: if normalized.success { None } else { normalized.message },
        })
    }
}

fn parse_task_updates(items: Vec<Value>) -> DomainResult<Vec<TaskUpdate>> {
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<TaskUpdate>(item)
                .map_err(|e| DomainError::ExecutionFailed(format!("invalid task update: {e}")))
        })
        .collect()
}

fn success_update(listener: &Listener, output: &OutputSpec, extra: &Map<String, Value>) -> TaskUpdate {
    let mut context = output.context.clone();
    context.extend(extra.clone());
    TaskUpdate::new(&output.task_id, output.status.clone())
        .with_context(context)
        .with_reason(format!("listener {} succeeded", listener.id))
}

fn failure_update(listener: &Listener, output: &OutputSpec, message: &str) -> TaskUpdate {
    let mut context = output.context.clone();
    context.insert("error".to_string(), Value::String(message.to_string()));
    TaskUpdate::new(&output.task_id, output.status.clone())
        .with_context(context)
        .with_error(message)
        .with_reason(format!("listener {} failed", listener.id))
}

/// Main task to Error, tagged with the failing listener so a retry can find it.
pub(crate) fn default_failure_update(listener: &Listener, main_task_id: &str, message: &str) -> TaskUpdate {
    TaskUpdate::new(main_task_id, TaskStatus::Error)
        .with_failure(ListenerErrorInfo {
            listener_id: listener.id.clone(),
            listener_type: listener.kind().to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        })
        .with_error(message)
        .with_reason(format!("listener {} failed", listener.id))
}
