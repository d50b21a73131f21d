//! Table output formatting for CLI commands
//!
//! Renders plans, task instances and run logs with comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::domain::models::{Listener, ListenerAction, Plan, PlanInstance, RunEvent, RunLogEntry, TaskStatus};

use super::truncate;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    /// Tasks declared by a plan, main task first.
    pub fn format_plan_tasks(&self, plan: &Plan) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Task", "Name", "Main", "Description", "Context"]));

        let mut tasks: Vec<_> = plan.tasks.iter().collect();
        tasks.sort_by_key(|t| t.task_id != plan.main_task_id);
        for task in tasks {
            table.add_row(vec![
                Cell::new(&task.task_id),
                Cell::new(truncate(&task.name, 40)),
                Cell::new(if task.task_id == plan.main_task_id { "yes" } else { "" }),
                Cell::new(truncate(&task.description, 40)),
                Cell::new(task.context.keys().cloned().collect::<Vec<_>>().join(", ")),
            ]);
        }

        table.to_string()
    }

    /// Listeners in priority order.
    pub fn format_listeners(&self, listeners: &[Listener]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Listener", "Kind", "Watches", "Condition", "Action", "Priority"]));

        let mut sorted: Vec<_> = listeners.iter().collect();
        sorted.sort_by_key(|l| l.priority);
        for listener in sorted {
            let action = match &listener.action {
                ListenerAction::Agent { agent_id, .. } => format!("agent {agent_id}"),
                ListenerAction::Code { code_snippet } => truncate(code_snippet.lines().next().unwrap_or(""), 30),
            };
            let condition = if listener.trigger_condition.trim().is_empty() {
                "Any".to_string()
            } else {
                truncate(&listener.trigger_condition, 40)
            };
            table.add_row(vec![
                Cell::new(&listener.id),
                Cell::new(listener.kind()),
                Cell::new(listener.trigger_task_id.iter().collect::<Vec<_>>().join(", ")),
                Cell::new(condition),
                Cell::new(action),
                Cell::new(listener.priority),
            ]);
        }

        table.to_string()
    }

    /// Current task statuses of an instance.
    pub fn format_task_instances(&self, instance: &PlanInstance) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Task", "Name", "Status", "Changes", "Last Reason"]));

        for (task_id, task) in &instance.task_instances {
            let status = if self.use_colors {
                Cell::new(task.status.to_string()).fg(status_color(&task.status))
            } else {
                Cell::new(format!("{} {}", status_icon(&task.status), task.status))
            };
            let id = if instance.is_main_task(task_id) {
                Cell::new(format!("{task_id} *")).add_attribute(Attribute::Bold)
            } else {
                Cell::new(task_id)
            };
            let reason = task.last_trace_entry().map_or("-", |entry| entry.reason.as_str());
            table.add_row(vec![
                id,
                Cell::new(truncate(&task.name, 30)),
                status,
                Cell::new(task.status_trace.len().saturating_sub(1)),
                Cell::new(truncate(reason, 40)),
            ]);
        }

        table.to_string()
    }

    pub fn format_run_log(&self, log: &[RunLogEntry]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Time", "Event", "Details"]));

        for entry in log {
            let (name, details) = describe_event(&entry.event);
            table.add_row(vec![
                Cell::new(entry.timestamp.format("%H:%M:%S%.3f").to_string()),
                Cell::new(name),
                Cell::new(truncate(&details, 60)),
            ]);
        }

        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|title| Cell::new(title).add_attribute(Attribute::Bold))
        .collect()
}

fn describe_event(event: &RunEvent) -> (&'static str, String) {
    match event {
        RunEvent::PlanStarted => ("plan_started", String::new()),
        RunEvent::TaskStatusChanged { task_id, from, to, reason } => {
            ("task_status_changed", format!("{task_id}: {from} -> {to} ({reason})"))
        }
        RunEvent::ListenerTriggered { listener_id, task_id, status } => {
            ("listener_triggered", format!("{listener_id} on {task_id}={status}"))
        }
        RunEvent::ListenerExecuted { listener_id, success, error } => (
            "listener_executed",
            match error {
                Some(error) => format!("{listener_id} failed: {error}"),
                None => format!("{listener_id} success={success}"),
            },
        ),
        RunEvent::ResultDiscarded { listener_id } => ("result_discarded", listener_id.clone()),
        RunEvent::RetryScheduled { listener_id, attempt } => {
            ("retry_scheduled", format!("{listener_id} attempt {attempt}"))
        }
        RunEvent::RetriesExhausted { listener_id, failed_retries } => {
            ("retries_exhausted", format!("{listener_id} after {failed_retries}"))
        }
        RunEvent::Resumed { listener_id } => ("resumed", listener_id.clone()),
        RunEvent::Verified => ("verified", String::new()),
        RunEvent::VerificationRejected { reason } => ("verification_rejected", reason.clone()),
        RunEvent::Cancelled => ("cancelled", String::new()),
        RunEvent::Unrecoverable { message } => ("unrecoverable", message.clone()),
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn status_color(status: &TaskStatus) -> Color {
    match status {
        TaskStatus::Done => Color::Green,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Error => Color::Red,
        TaskStatus::Retrying => Color::Yellow,
        TaskStatus::Pending => Color::Magenta,
        TaskStatus::NotStarted | TaskStatus::Other(_) => Color::Grey,
    }
}

fn status_icon(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Done => "✓",
        TaskStatus::Running => "▶",
        TaskStatus::Error => "✗",
        TaskStatus::Retrying => "↻",
        TaskStatus::Pending => "…",
        TaskStatus::NotStarted | TaskStatus::Other(_) => "○",
    }
}
