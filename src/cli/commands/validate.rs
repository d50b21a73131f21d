//! `conductor validate`: load a plan file and check it.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, Plan};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Plan definition (YAML or JSON)
    pub plan_file: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub valid: bool,
    pub plan_id: String,
    pub main_task_id: String,
    pub tasks: usize,
    pub listeners: usize,
    #[serde(skip)]
    plan: Plan,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        [
            format!(
                "Plan '{}' is valid ({} tasks, {} listeners, main task {})",
                self.plan_id, self.tasks, self.listeners, self.main_task_id
            ),
            formatter.format_plan_tasks(&self.plan),
            formatter.format_listeners(&self.plan.listeners),
        ]
        .join("\n\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ValidateArgs, config: &Config, json_mode: bool) -> Result<()> {
    let mut plan = Plan::load(&args.plan_file)
        .with_context(|| format!("Failed to load plan from {}", args.plan_file.display()))?;

    let fallback = &config.runtime.main_task_id;
    if plan.task(&plan.main_task_id).is_none() && plan.task(fallback).is_some() {
        plan.main_task_id.clone_from(fallback);
    }
    plan.validate().context("Plan failed validation")?;

    let out = ValidateOutput {
        valid: true,
        plan_id: plan.id.clone(),
        main_task_id: plan.main_task_id.clone(),
        tasks: plan.tasks.len(),
        listeners: plan.listeners.len(),
        plan,
    };
    output(&out, json_mode);
    Ok(())
}
