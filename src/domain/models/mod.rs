pub mod config;
pub mod execution;
pub mod listener;
pub mod plan;
pub mod plan_instance;
pub mod run_log;
pub mod task_instance;
pub mod trigger;

pub use config::{
    AgentRuntimeConfig, Config, DatabaseConfig, LoggingConfig, RetryConfig, RuntimeConfig, SandboxConfig,
};
pub use execution::{AgentResponse, ListenerOutcome, NormalizedResponse, TaskUpdate};
pub use listener::{Listener, ListenerAction, OutputSpec, TriggerTaskIds};
pub use plan::{Plan, TaskDefinition, DEFAULT_MAIN_TASK_ID};
pub use plan_instance::{
    InstanceContext, PlanContext, PlanErrorInfo, PlanInstance, PlanInstanceStatus, TaskSnapshot,
    UNRECOVERABLE, WAITING_FOR_RESUME,
};
pub use run_log::{last_failed_listener, RunEvent, RunLogEntry};
pub use task_instance::{
    ListenerErrorInfo, RetryInfo, StatusTraceEntry, StatusTransition, TaskContext, TaskInstance, TaskStatus,
};
pub use trigger::{ConditionError, TriggerCondition};
