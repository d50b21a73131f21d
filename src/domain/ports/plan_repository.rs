//! Repository ports for plans and plan instances.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Plan, PlanInstance};

/// Repository for plan definitions.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Create a new plan.
    async fn create(&self, plan: &Plan) -> DomainResult<()>;

    /// Get a plan by id.
    async fn get(&self, id: &str) -> DomainResult<Option<Plan>>;

    /// Replace an existing plan.
    async fn update(&self, plan: &Plan) -> DomainResult<()>;

    /// Delete a plan.
    async fn delete(&self, id: &str) -> DomainResult<()>;

    /// List all plans.
    async fn list(&self) -> DomainResult<Vec<Plan>>;
}

/// Repository for plan instance snapshots.
#[async_trait]
pub trait PlanInstanceRepository: Send + Sync {
    /// Insert or replace a snapshot.
    async fn save(&self, instance: &PlanInstance) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<PlanInstance>>;

    async fn list_by_plan(&self, plan_id: &str) -> DomainResult<Vec<PlanInstance>>;

    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}
