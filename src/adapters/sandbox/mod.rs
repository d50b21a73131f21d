//! Restricted script interpreter used by code listeners.
//!
//! Snippets run against a copy of the plan context. The language has no loops,
//! no host calls and no I/O; every statement and expression node costs one
//! step against a fixed budget.

pub mod interpreter;
pub mod lexer;
pub mod parser;

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SandboxConfig;
use crate::domain::ports::{CodeSandbox, SandboxOutput};

pub use interpreter::Interpreter;

/// Errors raised while lexing, parsing or evaluating a snippet.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("Lex error at {position}: {message}")]
    Lex { position: usize, message: String },

    #[error("Parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Expression nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("Undefined variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function}() expects {expected} arguments, got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Step budget of {0} exceeded")]
    BudgetExceeded(usize),

    #[error("Snippet is {len} bytes, limit is {max}")]
    SourceTooLong { len: usize, max: usize },
}

impl From<ScriptError> for DomainError {
    fn from(err: ScriptError) -> Self {
        DomainError::ExecutionFailed(format!("code listener failed: {err}"))
    }
}

/// [`CodeSandbox`] backed by the in-process script interpreter.
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Parse and run `code` with `context` bound, returning the final scope.
    pub fn run(&self, code: &str, context: &Value) -> Result<HashMap<String, Value>, ScriptError> {
        if code.len() > self.config.max_source_len {
            return Err(ScriptError::SourceTooLong {
                len: code.len(),
                max: self.config.max_source_len,
            });
        }

        let program = parser::parse(code)?;

        let mut scope = HashMap::new();
        scope.insert("context".to_string(), context.clone());
        scope.insert("result".to_string(), Value::Object(Map::new()));
        scope.insert("task_updates".to_string(), Value::Null);

        let mut interp = Interpreter::new(scope, self.config.max_steps);
        interp.run(&program)?;
        debug!(steps = interp.steps(), "Script finished");
        Ok(interp.into_scope())
    }
}

impl CodeSandbox for ScriptSandbox {
    fn execute(&self, code: &str, context: &Value) -> DomainResult<SandboxOutput> {
        let mut scope = self.run(code, context)?;
        Ok(SandboxOutput {
            result: scope.remove("result").unwrap_or(Value::Null),
            task_updates: scope.remove("task_updates").unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox() -> ScriptSandbox {
        ScriptSandbox::new(SandboxConfig::default())
    }

    #[test]
    fn test_reads_back_result_and_task_updates() {
        let ctx = json!({"tasks": {"001": {"status": "Running", "context": {"name": "Ada"}}}});
        let out = sandbox()
            .execute(
                r#"
                let name = context.tasks.001.context.name;
                result.success = true;
                result.context = {"greeting": "hi " + name};
                task_updates = [{"task_id": "002", "status": "Done"}];
                "#,
                &ctx,
            )
            .unwrap();

        assert_eq!(out.result, json!({"success": true, "context": {"greeting": "hi Ada"}}));
        assert_eq!(out.task_updates, json!([{"task_id": "002", "status": "Done"}]));
    }

    #[test]
    fn test_untouched_bindings_keep_defaults() {
        let out = sandbox().execute("let x = 1", &json!({})).unwrap();
        assert_eq!(out.result, json!({}));
        assert_eq!(out.task_updates, Value::Null);
    }

    #[test]
    fn test_context_is_a_copy() {
        let ctx = json!({"a": 1});
        let out = sandbox().execute("context.a = 2; result.a = context.a", &ctx).unwrap();
        assert_eq!(out.result, json!({"a": 2}));
        assert_eq!(ctx, json!({"a": 1}));
    }

    #[test]
    fn test_limits() {
        let tight = ScriptSandbox::new(SandboxConfig {
            max_steps: 10,
            max_source_len: 32,
        });
        assert!(matches!(
            tight.run(&"x = 1;".repeat(10), &json!({})),
            Err(ScriptError::SourceTooLong { .. })
        ));
        assert!(matches!(
            tight.run("x = 1 + 2 + 3 + 4 + 5 + 6", &json!({})),
            Err(ScriptError::BudgetExceeded(10))
        ));
    }

    #[test]
    fn test_errors_map_to_execution_failed() {
        let err = sandbox().execute("result = (", &json!({})).unwrap_err();
        assert!(matches!(err, DomainError::ExecutionFailed(msg) if msg.contains("Parse error")));
    }
}
