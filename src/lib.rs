//! Conductor - self-driving plan runtime
//!
//! A plan is a set of tasks plus declarative listeners. Once a plan instance
//! starts, every task status change is matched against the listeners; matched
//! listeners run inline code or call an agent, and their results become new
//! status changes. Failures of the main task are retried against the listener
//! that caused them, and an exhausted instance can be resumed by hand.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): matcher, executor, applier, retry policy and the runtime
//! - **Adapters** (`adapters`): agent runtimes, the script sandbox, repositories
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conductor::adapters::agents::MockAgentRuntime;
//! use conductor::adapters::sandbox::ScriptSandbox;
//! use conductor::services::PlanRuntime;
//!
//! let runtime = PlanRuntime::builder(Arc::new(MockAgentRuntime::new()), Arc::new(ScriptSandbox::default())).build();
//! runtime.register_plan(plan).await?;
//! let id = runtime.run("blog", "write a post").await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, Listener, ListenerAction, OutputSpec, Plan, PlanContext, PlanInstance, PlanInstanceStatus, TaskDefinition,
    TaskInstance, TaskStatus,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ExecutionSummary, PlanRuntime, PlanRuntimeBuilder};
