//! `conductor inspect`: show a persisted plan instance.

use anyhow::{Context, Result};
use clap::Args;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::adapters::sqlite::{initialize_database, SqlitePlanInstanceRepository};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, PlanInstance};
use crate::domain::ports::PlanInstanceRepository;
use crate::services::plan_runtime::summarize;
use crate::services::ExecutionSummary;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Plan instance id
    pub instance_id: Uuid,

    /// Include the run log
    #[arg(short, long)]
    pub log: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct InspectOutput {
    pub summary: ExecutionSummary,
    pub instance: PlanInstance,
    #[serde(skip)]
    show_log: bool,
}

impl CommandOutput for InspectOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut sections = vec![
            format!(
                "Plan instance {} ({})\nStatus: {}\nPrompt: {}",
                self.instance.id, self.instance.plan_id, self.instance.status, self.instance.prompt
            ),
            formatter.format_task_instances(&self.instance),
        ];
        if let Some(ref error) = self.instance.error_info {
            sections.push(format!("Error: {} ({})", error.message, error.status));
        }
        if self.show_log {
            sections.push(formatter.format_run_log(&self.instance.run_log));
        }
        sections.join("\n\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InspectArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    let repo = SqlitePlanInstanceRepository::new(pool);

    let instance = repo
        .get(args.instance_id)
        .await?
        .with_context(|| format!("Plan instance {} not found", args.instance_id))?;

    // Retry counters live in memory only; persisted instances report none.
    let summary = summarize(&instance, BTreeMap::new());
    output(
        &InspectOutput {
            summary,
            instance,
            show_log: args.log,
        },
        json_mode,
    );
    Ok(())
}
