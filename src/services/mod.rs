//! Runtime services: matching, execution, result application, retries and
//! the per-instance driver behind [`PlanRuntime`].

pub mod listener_executor;
pub mod listener_matcher;
pub(crate) mod plan_driver;
pub mod plan_runtime;
pub mod prompt_template;
pub mod response_normalizer;
pub mod result_applier;
pub mod retry_policy;
pub mod verifiers;

pub use listener_executor::ListenerExecutor;
pub use listener_matcher::{find_triggered, match_listeners};
pub use plan_runtime::{ExecutionSummary, PlanRuntime, PlanRuntimeBuilder};
pub use response_normalizer::{ResponseExtractor, ResponseNormalizer};
pub use result_applier::ApplyReport;
pub use retry_policy::{RetryDecision, RetryLedger, RetryPolicy};
pub use verifiers::{MainTaskDoneVerifier, NoopVerifier};
