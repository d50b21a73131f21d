//! Placeholder substitution for agent prompts.
//!
//! `{002.context.emp_id}` reads a value from task 002's context,
//! `{002.status}` its status, and `{plan.prompt}` / `{plan.id}` the instance's
//! prompt and plan id. Context lookups check the task's `values` first, then
//! its bookkeeping fields (`failed_listener_id`, `retry_info`, ...). Nested
//! paths walk objects and arrays. Placeholders that do not resolve are kept
//! verbatim.

use serde_json::Value;

use crate::domain::models::PlanContext;

pub fn render(template: &str, context: &PlanContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                match resolve(key.trim(), context) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(key: &str, context: &PlanContext) -> Option<String> {
    let mut segments = key.split('.');
    let head = segments.next()?;

    if head == "plan" {
        return match segments.next()? {
            "prompt" => Some(context.prompt.clone()),
            "id" => Some(context.plan_id.clone()),
            "instance_id" => Some(context.plan_instance_id.to_string()),
            "main_task_id" => Some(context.main_task_id.clone()),
            _ => None,
        };
    }

    let task = context.tasks.get(head)?;
    match segments.next()? {
        "status" => Some(task.status.to_string()),
        "context" => {
            let field = segments.next()?;
            let root = task.context.value(field).cloned().or_else(|| {
                serde_json::to_value(&task.context)
                    .ok()
                    .and_then(|v| v.get(field).cloned())
            })?;
            let found = segments.try_fold(root, |acc, seg| step(&acc, seg))?;
            Some(display(&found))
        }
        _ => None,
    }
}

fn step(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
