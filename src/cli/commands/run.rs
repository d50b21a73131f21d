//! `conductor run`: register a plan, start an instance and wait for it to settle.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::adapters::agents::{HttpAgentRuntime, MockAgentRuntime, MockScript};
use crate::adapters::sandbox::ScriptSandbox;
use crate::adapters::sqlite::{initialize_database, SqlitePlanInstanceRepository, SqlitePlanRepository};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, Plan, PlanInstance};
use crate::domain::ports::AgentRuntime;
use crate::services::{ExecutionSummary, MainTaskDoneVerifier, PlanRuntime};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan definition (YAML or JSON)
    pub plan_file: PathBuf,

    /// User prompt seeded into the plan instance context
    #[arg(short, long, default_value = "")]
    pub prompt: String,

    /// Give up waiting after this many seconds
    #[arg(short, long, default_value = "300")]
    pub timeout_secs: u64,

    /// Answer agent listeners from a scripted mock file instead of the HTTP runtime
    #[arg(long)]
    pub mock_agents: Option<PathBuf>,

    /// Keep plans and instances in memory only
    #[arg(long)]
    pub in_memory: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub summary: ExecutionSummary,
    #[serde(skip)]
    instance: PlanInstance,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![
            format!("Plan instance {} ({})", s.plan_instance_id, s.plan_id),
            format!("Status: {}", s.status),
            format!("Transitions: {}", s.transitions),
        ];
        if let Some(ms) = s.duration_ms {
            lines.push(format!("Duration: {ms}ms"));
        }
        if !s.executed_listeners.is_empty() {
            lines.push(format!("Listeners run: {}", s.executed_listeners.join(", ")));
        }
        for (listener_id, count) in &s.retry_counts {
            lines.push(format!("Retries for {listener_id}: {count}"));
        }
        if let Some(ref error) = s.error_info {
            lines.push(format!("Error: {} ({})", error.message, error.status));
        }
        lines.push(String::new());
        lines.push(TableFormatter::new().format_task_instances(&self.instance));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn agent_runtime(args: &RunArgs, config: &Config) -> Result<Arc<dyn AgentRuntime>> {
    match args.mock_agents {
        Some(ref path) => {
            let script = MockScript::load(path)
                .with_context(|| format!("Failed to load mock agent script {}", path.display()))?;
            Ok(Arc::new(MockAgentRuntime::from_script(script)))
        }
        None => Ok(Arc::new(
            HttpAgentRuntime::new(&config.agent_runtime).context("Failed to create HTTP agent runtime")?,
        )),
    }
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let plan = Plan::load(&args.plan_file)
        .with_context(|| format!("Failed to load plan from {}", args.plan_file.display()))?;

    let mut builder = PlanRuntime::builder(
        agent_runtime(&args, config)?,
        Arc::new(ScriptSandbox::new(config.sandbox.clone())),
    )
    .with_config(config)
    .with_verifier(Arc::new(MainTaskDoneVerifier));

    if !args.in_memory {
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        builder = builder.with_repositories(
            Arc::new(SqlitePlanRepository::new(pool.clone())),
            Arc::new(SqlitePlanInstanceRepository::new(pool)),
        );
    }
    let runtime = builder.build();

    runtime.register_plan(plan.clone()).await.context("Plan failed validation")?;
    let id = runtime.run(&plan.id, &args.prompt).await?;
    info!(plan_instance_id = %id, plan_id = %plan.id, "Waiting for plan instance to settle");

    let instance = match runtime.wait_for_idle(id, Duration::from_secs(args.timeout_secs)).await {
        Ok(instance) => instance,
        Err(e) => {
            runtime.shutdown().await;
            return Err(e).context("Plan instance did not settle in time");
        }
    };
    let summary = runtime.execution_summary(id).await?;
    runtime.shutdown().await;

    output(&RunOutput { summary, instance }, json_mode);
    Ok(())
}
