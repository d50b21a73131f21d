//! Common test utilities for integration tests
//!
//! Shared fixtures and helpers used across integration test files.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use conductor::adapters::agents::MockAgentRuntime;
use conductor::adapters::sandbox::ScriptSandbox;
use conductor::domain::models::RuntimeConfig;
use conductor::services::{PlanRuntime, PlanRuntimeBuilder};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Runtime config tuned for tests: fast polling, short listener timeout.
pub fn fast_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval_ms: 10,
        listener_timeout_ms: 2_000,
        ..RuntimeConfig::default()
    }
}

/// Builder wired to the given mock and the script sandbox.
pub fn runtime_builder(agents: &Arc<MockAgentRuntime>) -> PlanRuntimeBuilder {
    PlanRuntime::builder(agents.clone(), Arc::new(ScriptSandbox::default()))
        .with_runtime_config(fast_runtime_config())
}

/// Poll an async predicate every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
