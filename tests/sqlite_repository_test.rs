//! Persistence tests: plan runtime backed by SQLite repositories.

mod common;

use std::sync::Arc;
use std::time::Duration;

use conductor::adapters::agents::MockAgentRuntime;
use conductor::adapters::sqlite::{
    create_migrated_test_pool, initialize_database, SqlitePlanInstanceRepository, SqlitePlanRepository,
};
use conductor::domain::models::{
    DatabaseConfig, Listener, OutputSpec, Plan, PlanInstanceStatus, TaskDefinition, TaskStatus,
};
use conductor::domain::ports::{PlanInstanceRepository, PlanRepository};
use conductor::services::PlanRuntime;

use common::runtime_builder;

fn plan() -> Plan {
    Plan::new("persisted", "Persisted plan")
        .with_task(TaskDefinition::new("001", "Main"))
        .with_task(TaskDefinition::new("002", "Register"))
        .with_listener(
            Listener::code("L1", "001", "Running", r#"result.context = {"emp_id": "X"};"#)
                .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
        )
}

fn sqlite_runtime(pool: &sqlx::SqlitePool, agents: &Arc<MockAgentRuntime>) -> PlanRuntime {
    runtime_builder(agents)
        .with_repositories(
            Arc::new(SqlitePlanRepository::new(pool.clone())),
            Arc::new(SqlitePlanInstanceRepository::new(pool.clone())),
        )
        .build()
}

#[tokio::test]
async fn test_runtime_persists_snapshots_after_each_transition() {
    let pool = create_migrated_test_pool().await.unwrap();
    let agents = Arc::new(MockAgentRuntime::new());
    let runtime = sqlite_runtime(&pool, &agents);

    runtime.register_plan(plan()).await.unwrap();
    let id = runtime.run("persisted", "Ada").await.unwrap();
    let live = runtime.wait_for_idle(id, Duration::from_secs(5)).await.unwrap();

    let stored = SqlitePlanInstanceRepository::new(pool.clone())
        .get(id)
        .await
        .unwrap()
        .expect("snapshot saved");
    assert_eq!(stored.status, PlanInstanceStatus::Running);
    assert_eq!(stored.task("002").unwrap().status, TaskStatus::Done);
    assert_eq!(stored.task_instances, live.task_instances);
    assert!(stored.executed_listener_ids.contains("L1"));

    let plans = SqlitePlanRepository::new(pool).list().await.unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].listeners.len(), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_snapshots_survive_runtime_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("state/conductor.db").to_string_lossy().into_owned(),
        max_connections: 2,
    };
    let agents = Arc::new(MockAgentRuntime::new());

    let id = {
        let pool = initialize_database(&config).await.unwrap();
        let runtime = sqlite_runtime(&pool, &agents);
        runtime.register_plan(plan()).await.unwrap();
        let id = runtime.run("persisted", "Ada").await.unwrap();
        runtime.wait_for_idle(id, Duration::from_secs(5)).await.unwrap();
        runtime.cancel(id).await.unwrap();
        runtime.shutdown().await;
        pool.close().await;
        id
    };

    let pool = initialize_database(&config).await.unwrap();
    let restarted = sqlite_runtime(&pool, &agents);

    let instance = restarted.get_instance(id).await.unwrap();
    assert_eq!(instance.status, PlanInstanceStatus::Cancelled);
    assert_eq!(instance.task("002").unwrap().status, TaskStatus::Done);

    // The plan is read back from the repository on first use.
    let second = restarted.run("persisted", "Grace").await.unwrap();
    let fresh = restarted.wait_for_idle(second, Duration::from_secs(5)).await.unwrap();
    assert_eq!(fresh.prompt, "Grace");
    assert_eq!(fresh.task("002").unwrap().status, TaskStatus::Done);

    let history = SqlitePlanInstanceRepository::new(pool)
        .list_by_plan("persisted")
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, id);
}
