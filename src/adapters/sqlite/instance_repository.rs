//! SQLite implementation of the PlanInstanceRepository.
//!
//! Instances are stored as whole JSON snapshots; `status` and `plan_id` are
//! duplicated into columns for filtering.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::PlanInstance;
use crate::domain::ports::PlanInstanceRepository;

#[derive(Clone)]
pub struct SqlitePlanInstanceRepository {
    pool: SqlitePool,
}

impl SqlitePlanInstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanInstanceRepository for SqlitePlanInstanceRepository {
    async fn save(&self, instance: &PlanInstance) -> DomainResult<()> {
        let snapshot = serde_json::to_string(instance)?;

        sqlx::query(
            r#"INSERT INTO plan_instances (id, plan_id, status, snapshot, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   snapshot = excluded.snapshot,
                   updated_at = excluded.updated_at"#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.plan_id)
        .bind(instance.status.as_str())
        .bind(&snapshot)
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<PlanInstance>> {
        let row: Option<InstanceRow> = sqlx::query_as("SELECT id, snapshot FROM plan_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_plan(&self, plan_id: &str) -> DomainResult<Vec<PlanInstance>> {
        let rows: Vec<InstanceRow> = sqlx::query_as(
            "SELECT id, snapshot FROM plan_instances WHERE plan_id = ? ORDER BY created_at",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM plan_instances WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    snapshot: String,
}

impl TryFrom<InstanceRow> for PlanInstance {
    type Error = DomainError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let instance: PlanInstance = serde_json::from_str(&row.snapshot)
            .map_err(|e| DomainError::SerializationError(format!("plan instance {}: {e}", row.id)))?;
        if super::parse_uuid(&row.id)? != instance.id {
            return Err(DomainError::SerializationError(format!(
                "plan instance {} snapshot carries id {}",
                row.id, instance.id
            )));
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{Plan, PlanInstanceStatus, TaskDefinition, TaskStatus};

    async fn setup() -> SqlitePlanInstanceRepository {
        SqlitePlanInstanceRepository::new(create_migrated_test_pool().await.unwrap())
    }

    fn plan() -> Plan {
        Plan::new("p1", "P")
            .with_task(TaskDefinition::new("001", "Main"))
            .with_task(TaskDefinition::new("002", "Sub"))
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let repo = setup().await;
        let plan = plan();
        let mut instance = PlanInstance::from_plan(&plan, "build it");
        repo.save(&instance).await.unwrap();

        instance.start(&plan).unwrap();
        instance.update_task_status("002", TaskStatus::Done, "finished").unwrap();
        repo.save(&instance).await.unwrap();

        let loaded = repo.get(instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PlanInstanceStatus::Running);
        assert_eq!(loaded.task("002").unwrap().status, TaskStatus::Done);
        assert_eq!(loaded.task("002").unwrap().status_trace.len(), 2);
        assert_eq!(repo.list_by_plan("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let repo = setup().await;
        let instance = PlanInstance::from_plan(&plan(), "go");
        repo.save(&instance).await.unwrap();
        repo.delete(instance.id).await.unwrap();

        assert!(repo.get(instance.id).await.unwrap().is_none());
        assert!(repo.list_by_plan("p1").await.unwrap().is_empty());
    }
}
