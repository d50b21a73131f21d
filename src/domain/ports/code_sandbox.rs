//! Port for sandboxed code execution.

use serde_json::Value;

use crate::domain::errors::DomainResult;

/// Bindings read back from a snippet's scope after it ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SandboxOutput {
    /// The `result` binding.
    pub result: Value,
    /// The `task_updates` binding, `Null` when the snippet never set it.
    pub task_updates: Value,
}

/// Runs listener code with no file, network or process access.
///
/// Execution is bounded and synchronous; implementations must not block on I/O.
pub trait CodeSandbox: Send + Sync {
    fn execute(&self, code: &str, context: &Value) -> DomainResult<SandboxOutput>;
}
