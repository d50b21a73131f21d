//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the runtime consumes:
//! - AgentRuntime: executes agent listener prompts
//! - CodeSandbox: runs code listener snippets without host access
//! - PlanVerifier: decides when a plan instance is done
//! - PlanRepository / PlanInstanceRepository: persistence
//! - ApprovalGate: optional human approval hook

pub mod agent_runtime;
pub mod approval;
pub mod code_sandbox;
pub mod plan_repository;
pub mod verifier;

pub use agent_runtime::AgentRuntime;
pub use approval::{ApprovalDecision, ApprovalGate, AutoApprove};
pub use code_sandbox::{CodeSandbox, SandboxOutput};
pub use plan_repository::{PlanInstanceRepository, PlanRepository};
pub use verifier::{PlanVerifier, StatusChange, Verdict};
