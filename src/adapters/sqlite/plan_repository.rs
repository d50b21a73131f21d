//! SQLite implementation of the PlanRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Plan;
use crate::domain::ports::PlanRepository;

#[derive(Clone)]
pub struct SqlitePlanRepository {
    pool: SqlitePool,
}

impl SqlitePlanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanRepository for SqlitePlanRepository {
    async fn create(&self, plan: &Plan) -> DomainResult<()> {
        let definition = serde_json::to_string(plan)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO plans (id, name, main_task_id, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(&plan.main_task_id)
        .bind(&definition)
        .bind(plan.created_at.to_rfc3339())
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DomainError::ValidationFailed(format!("plan {} already exists", plan.id))
            }
            other => other.into(),
        })?;

        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Plan>> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT id, definition FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, plan: &Plan) -> DomainResult<()> {
        let definition = serde_json::to_string(plan)?;

        let result = sqlx::query(
            "UPDATE plans SET name = ?, main_task_id = ?, definition = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&plan.name)
        .bind(&plan.main_task_id)
        .bind(&definition)
        .bind(Utc::now().to_rfc3339())
        .bind(&plan.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PlanNotFound(plan.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM plans WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<Plan>> {
        let rows: Vec<PlanRow> = sqlx::query_as("SELECT id, definition FROM plans ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    definition: String,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        serde_json::from_str(&row.definition)
            .map_err(|e| DomainError::SerializationError(format!("plan {}: {e}", row.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{Listener, TaskDefinition};

    async fn setup() -> SqlitePlanRepository {
        SqlitePlanRepository::new(create_migrated_test_pool().await.unwrap())
    }

    fn sample_plan() -> Plan {
        Plan::new("plan-1", "Sample")
            .with_task(TaskDefinition::new("001", "Main"))
            .with_task(TaskDefinition::new("002", "Build"))
            .with_listener(Listener::code("l1", "002", "Done", "result.context = {}"))
    }

    #[tokio::test]
    async fn test_create_and_get_round_trips_definition() {
        let repo = setup().await;
        let plan = sample_plan();
        repo.create(&plan).await.unwrap();

        let loaded = repo.get("plan-1").await.unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 2);
        assert_eq!(loaded.listeners[0].id, "l1");
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let repo = setup().await;
        repo.create(&sample_plan()).await.unwrap();
        assert!(matches!(
            repo.create(&sample_plan()).await,
            Err(DomainError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_plan_fails() {
        let repo = setup().await;
        assert!(matches!(
            repo.update(&sample_plan()).await,
            Err(DomainError::PlanNotFound(_))
        ));
    }
}
