//! In-memory repositories, used by default and in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Plan, PlanInstance};
use crate::domain::ports::{PlanInstanceRepository, PlanRepository};

#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<RwLock<HashMap<String, Plan>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn create(&self, plan: &Plan) -> DomainResult<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(DomainError::ValidationFailed(format!("plan {} already exists", plan.id)));
        }
        plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Plan>> {
        Ok(self.plans.read().await.get(id).cloned())
    }

    async fn update(&self, plan: &Plan) -> DomainResult<()> {
        let mut plans = self.plans.write().await;
        match plans.get_mut(&plan.id) {
            Some(existing) => {
                *existing = plan.clone();
                Ok(())
            }
            None => Err(DomainError::PlanNotFound(plan.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        self.plans.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.plans.read().await.values().cloned().collect();
        plans.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(plans)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanInstanceRepository {
    instances: Arc<RwLock<HashMap<Uuid, PlanInstance>>>,
}

impl InMemoryPlanInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanInstanceRepository for InMemoryPlanInstanceRepository {
    async fn save(&self, instance: &PlanInstance) -> DomainResult<()> {
        self.instances.write().await.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<PlanInstance>> {
        Ok(self.instances.read().await.get(&id).cloned())
    }

    async fn list_by_plan(&self, plan_id: &str) -> DomainResult<Vec<PlanInstance>> {
        let mut instances: Vec<PlanInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.plan_id == plan_id)
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        self.instances.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskDefinition;

    #[tokio::test]
    async fn test_plan_crud() {
        let repo = InMemoryPlanRepository::new();
        let plan = Plan::new("p1", "One").with_task(TaskDefinition::new("001", "Main"));

        repo.create(&plan).await.unwrap();
        assert!(repo.create(&plan).await.is_err());
        assert_eq!(repo.get("p1").await.unwrap().unwrap().name, "One");

        let renamed = Plan { name: "Uno".into(), ..plan };
        repo.update(&renamed).await.unwrap();
        assert_eq!(repo.list().await.unwrap()[0].name, "Uno");

        repo.delete("p1").await.unwrap();
        assert!(repo.get("p1").await.unwrap().is_none());
        assert!(repo.update(&renamed).await.is_err());
    }

    #[tokio::test]
    async fn test_instance_save_and_list() {
        let repo = InMemoryPlanInstanceRepository::new();
        let plan = Plan::new("p1", "One").with_task(TaskDefinition::new("001", "Main"));
        let instance = PlanInstance::from_plan(&plan, "go");

        repo.save(&instance).await.unwrap();
        repo.save(&instance).await.unwrap();

        assert_eq!(repo.list_by_plan("p1").await.unwrap().len(), 1);
        assert!(repo.list_by_plan("p2").await.unwrap().is_empty());
        assert_eq!(repo.get(instance.id).await.unwrap().unwrap().prompt, "go");
    }
}
