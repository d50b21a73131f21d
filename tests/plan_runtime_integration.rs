//! End-to-end tests driving plan instances through the runtime.

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use conductor::adapters::agents::{MockAgentRuntime, MockResponse};
use conductor::domain::errors::{DomainError, DomainResult};
use conductor::domain::models::{
    Listener, OutputSpec, Plan, PlanInstance, PlanInstanceStatus, RunEvent, TaskDefinition, TaskStatus,
    WAITING_FOR_RESUME,
};
use conductor::domain::ports::{ApprovalDecision, ApprovalGate};
use conductor::services::{MainTaskDoneVerifier, PlanRuntime};

use common::{runtime_builder, setup_test_logging, wait_until};

const SETTLE: Duration = Duration::from_secs(5);

fn onboarding_plan() -> Plan {
    Plan::new("onboarding", "Employee onboarding")
        .with_task(TaskDefinition::new("001", "Onboard employee"))
        .with_task(TaskDefinition::new("002", "Register in HR system"))
}

async fn settle(runtime: &PlanRuntime, id: Uuid) -> PlanInstance {
    runtime.wait_for_idle(id, SETTLE).await.unwrap()
}

fn count_events(instance: &PlanInstance, pred: impl Fn(&RunEvent) -> bool) -> usize {
    instance.run_log.iter().filter(|entry| pred(&entry.event)).count()
}

#[tokio::test]
async fn test_code_listener_updates_downstream_task() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new());
    let runtime = runtime_builder(&agents).build();

    let plan = onboarding_plan().with_listener(
        Listener::code("L1", "001", "001.status == Running", r#"result.context = {"emp_id": "X"};"#)
            .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
    );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "hire Ada").await.unwrap();
    let instance = settle(&runtime, id).await;

    let hr = instance.task("002").unwrap();
    assert_eq!(hr.status, TaskStatus::Done);
    assert_eq!(hr.context.value("emp_id"), Some(&json!("X")));
    assert_eq!(instance.status, PlanInstanceStatus::Running, "no verifier has fired");
    assert!(instance.executed_listener_ids.contains("L1"));
    for task in instance.task_instances.values() {
        assert!(task.trace_is_consistent());
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failed_agent_listener_is_retried_then_marked_done() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new());
    agents
        .push_responses(
            "hr_agent",
            [MockResponse::failure("HR system timed out"), MockResponse::success("registered")],
        )
        .await;
    let runtime = runtime_builder(&agents).build();

    let plan = onboarding_plan().with_listener(
        Listener::agent("L", "001", "Running", "hr_agent", "Register {plan.prompt}")
            .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
    );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada Lovelace").await.unwrap();
    let instance = settle(&runtime, id).await;

    assert_eq!(agents.call_count("hr_agent").await, 2);
    assert_eq!(agents.calls().await[0].prompt, "Register Ada Lovelace");
    assert_eq!(instance.task("002").unwrap().status, TaskStatus::Done);

    let main = instance.main_task().unwrap();
    assert_eq!(main.status, TaskStatus::Running, "retry success restores the main task");
    assert!(main.context.failed_listener_id.is_none());
    assert!(main.context.retry_info.is_none());
    let statuses: Vec<&TaskStatus> = main.status_trace.iter().map(|e| &e.status).collect();
    assert_eq!(
        statuses,
        vec![
            &TaskStatus::NotStarted,
            &TaskStatus::Running,
            &TaskStatus::Error,
            &TaskStatus::Retrying,
            &TaskStatus::Running,
        ]
    );
    assert_eq!(runtime.retry_ledger().attempts(id, "L").await, 1);
    assert_eq!(instance.status, PlanInstanceStatus::Running);

    runtime.mark_done(id).await.unwrap();
    let done = runtime.get_instance(id).await.unwrap();
    assert_eq!(done.status, PlanInstanceStatus::Done);
    assert_eq!(done.main_task().unwrap().status, TaskStatus::Done);
}

#[tokio::test]
async fn test_exhausted_retries_wait_for_resume() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new());
    agents
        .set_response("hr_agent", MockResponse::error("connection refused"))
        .await;
    let runtime = runtime_builder(&agents).with_max_retry_count(2).build();

    let plan = onboarding_plan().with_listener(
        Listener::agent("L", "001", "Running", "hr_agent", "Register {plan.prompt}")
            .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
    );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let instance = settle(&runtime, id).await;

    assert_eq!(instance.status, PlanInstanceStatus::Error);
    let error = instance.error_info.clone().unwrap();
    assert_eq!(error.status, WAITING_FOR_RESUME);
    assert_eq!(error.failed_retries, Some(2));
    assert_eq!(agents.call_count("hr_agent").await, 3, "first run plus two retries");
    assert_eq!(
        instance.main_task().unwrap().context.failed_listener_id.as_deref(),
        Some("L")
    );
    assert_eq!(
        count_events(&instance, |e| matches!(e, RunEvent::RetryScheduled { .. })),
        2
    );

    // Nothing else happens on its own.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agents.call_count("hr_agent").await, 3);

    agents.set_response("hr_agent", MockResponse::success("registered")).await;
    runtime.resume(id).await.unwrap();
    let resumed = settle(&runtime, id).await;

    assert_eq!(agents.call_count("hr_agent").await, 4, "resume attempts exactly once more");
    assert_eq!(runtime.retry_ledger().attempts(id, "L").await, 1);
    assert_eq!(resumed.status, PlanInstanceStatus::Running);
    assert!(resumed.error_info.is_none());
    assert_eq!(resumed.task("002").unwrap().status, TaskStatus::Done);
    assert_eq!(resumed.main_task().unwrap().status, TaskStatus::Running);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_resume_is_rejected_without_mutation() {
    let agents = Arc::new(MockAgentRuntime::new());
    let runtime = runtime_builder(&agents).build();
    runtime.register_plan(onboarding_plan()).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let before = settle(&runtime, id).await;

    assert!(matches!(
        runtime.resume(id).await,
        Err(DomainError::InvalidStateTransition { .. })
    ));
    let after = runtime.get_instance(id).await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.run_log.len(), before.run_log.len());
    assert!(matches!(
        runtime.resume(Uuid::new_v4()).await,
        Err(DomainError::PlanInstanceNotFound(_))
    ));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_main_task_error_without_failed_listener_is_unrecoverable() {
    let agents = Arc::new(MockAgentRuntime::new());
    let runtime = runtime_builder(&agents).build();
    runtime.register_plan(onboarding_plan()).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    settle(&runtime, id).await;

    runtime
        .update_task_status(id, "001", TaskStatus::Error, "operator flagged")
        .await
        .unwrap();
    let instance = settle(&runtime, id).await;

    assert_eq!(instance.status, PlanInstanceStatus::Error);
    assert!(!instance.error_info.as_ref().unwrap().is_waiting_for_resume());
    assert!(runtime.resume(id).await.is_err(), "nothing to resume");
}

#[tokio::test]
async fn test_error_after_successful_retry_does_not_rerun_listener() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new());
    agents
        .push_responses(
            "hr_agent",
            [MockResponse::failure("HR system timed out"), MockResponse::success("registered")],
        )
        .await;
    let runtime = runtime_builder(&agents).build();

    let plan = onboarding_plan().with_listener(
        Listener::agent("L", "001", "Running", "hr_agent", "Register {plan.prompt}")
            .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
    );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let recovered = settle(&runtime, id).await;
    assert_eq!(recovered.main_task().unwrap().status, TaskStatus::Running);
    assert_eq!(agents.call_count("hr_agent").await, 2);

    runtime
        .update_task_status(id, "001", TaskStatus::Error, "operator")
        .await
        .unwrap();
    let instance = settle(&runtime, id).await;

    assert_eq!(agents.call_count("hr_agent").await, 2, "the recovered listener is not run again");
    assert_eq!(runtime.retry_ledger().attempts(id, "L").await, 1);
    assert_eq!(instance.status, PlanInstanceStatus::Error);
    assert!(!instance.error_info.as_ref().unwrap().is_waiting_for_resume());
    assert_eq!(
        count_events(&instance, |e| matches!(e, RunEvent::Unrecoverable { .. })),
        1
    );
}

#[tokio::test]
async fn test_run_log_identifies_listener_behind_operator_error() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new());
    agents
        .set_response("hr_agent", MockResponse::failure("HR system down"))
        .await;
    let runtime = runtime_builder(&agents).with_max_retry_count(2).build();

    // The failure output never touches the main task, so nothing tags it.
    let plan = onboarding_plan().with_listener(
        Listener::agent("L", "001", "Running", "hr_agent", "Register {plan.prompt}")
            .with_success_output(OutputSpec::new("002", TaskStatus::Done))
            .with_failure_output(OutputSpec::new("002", TaskStatus::Error)),
    );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let first = settle(&runtime, id).await;
    assert_eq!(first.task("002").unwrap().status, TaskStatus::Error);
    assert_eq!(first.main_task().unwrap().status, TaskStatus::Running);

    runtime
        .update_task_status(id, "001", TaskStatus::Error, "operator")
        .await
        .unwrap();
    let instance = settle(&runtime, id).await;

    assert_eq!(agents.call_count("hr_agent").await, 3, "first run plus two retries");
    assert_eq!(instance.status, PlanInstanceStatus::Error);
    let error = instance.error_info.clone().unwrap();
    assert_eq!(error.status, WAITING_FOR_RESUME);
    assert_eq!(error.failed_retries, Some(2));

    let main = instance.main_task().unwrap();
    assert_eq!(main.status, TaskStatus::Error, "a failed retry never leaves the main task Retrying");
    assert_eq!(main.context.failed_listener_id.as_deref(), Some("L"));
    assert_eq!(main.context.error_info.as_ref().unwrap().message, "HR system down");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_fan_out_failures_retry_the_last_recorded_listener() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new());
    for agent in ["hr_agent", "it_agent"] {
        agents
            .push_responses(agent, [MockResponse::failure("down"), MockResponse::success("ok")])
            .await;
    }
    let runtime = runtime_builder(&agents).build();

    let plan = onboarding_plan()
        .with_task(TaskDefinition::new("003", "Provision laptop"))
        .with_listener(
            Listener::agent("hr", "001", "Running", "hr_agent", "register")
                .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
        )
        .with_listener(
            Listener::agent("it", "001", "Running", "it_agent", "provision")
                .with_success_output(OutputSpec::new("003", TaskStatus::Done)),
        );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let instance = settle(&runtime, id).await;

    let failed: Vec<&str> = instance
        .run_log
        .iter()
        .filter_map(|entry| match &entry.event {
            RunEvent::ListenerExecuted {
                listener_id,
                success: false,
                ..
            } => Some(listener_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 2);
    let retried = failed[1];
    let skipped = failed[0];

    assert_eq!(agents.calls().await.len(), 3);
    assert_eq!(runtime.retry_ledger().attempts(id, retried).await, 1);
    assert_eq!(runtime.retry_ledger().attempts(id, skipped).await, 0);
    assert_eq!(instance.status, PlanInstanceStatus::Running);

    let main = instance.main_task().unwrap();
    assert_eq!(main.status, TaskStatus::Running);
    assert!(main.context.failed_listener_id.is_none());
    assert_eq!(
        main.status_trace.iter().filter(|e| e.status == TaskStatus::Error).count(),
        1,
        "the second failure lands on a main task already in Error"
    );

    let output_task = |listener: &str| if listener == "hr" { "002" } else { "003" };
    assert_eq!(instance.task(output_task(retried)).unwrap().status, TaskStatus::Done);
    assert_eq!(instance.task(output_task(skipped)).unwrap().status, TaskStatus::NotStarted);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_instances_retry_the_same_listener_independently() {
    setup_test_logging();
    let agents = Arc::new(MockAgentRuntime::new().with_delay(Duration::from_millis(20)));
    agents
        .set_response("hr_agent", MockResponse::error("connection refused"))
        .await;
    let runtime = runtime_builder(&agents).with_max_retry_count(1).build();

    let plan = onboarding_plan().with_listener(
        Listener::agent("L", "001", "Running", "hr_agent", "Register {plan.prompt}")
            .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
    );
    runtime.register_plan(plan).await.unwrap();
    let first = runtime.run("onboarding", "Ada").await.unwrap();
    let second = runtime.run("onboarding", "Grace").await.unwrap();

    for id in [first, second] {
        let instance = settle(&runtime, id).await;
        assert_eq!(instance.status, PlanInstanceStatus::Error);
        let error = instance.error_info.clone().unwrap();
        assert_eq!(error.status, WAITING_FOR_RESUME);
        assert_eq!(error.failed_retries, Some(1));
        assert_eq!(runtime.retry_ledger().attempts(id, "L").await, 1);
        assert_eq!(
            count_events(&instance, |e| matches!(e, RunEvent::RetryScheduled { .. })),
            1
        );
    }
    assert_eq!(agents.call_count("hr_agent").await, 4, "one run and one retry per instance");

    runtime.resume(first).await.unwrap();
    settle(&runtime, first).await;
    assert_eq!(runtime.retry_ledger().attempts(first, "L").await, 1);
    assert_eq!(runtime.retry_ledger().attempts(second, "L").await, 1);
    assert_eq!(agents.call_count("hr_agent").await, 5);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_listeners_fire_once_and_unmatched_transitions_are_harmless() {
    let agents = Arc::new(MockAgentRuntime::new());
    let runtime = runtime_builder(&agents).build();
    let plan = onboarding_plan()
        .with_task(TaskDefinition::new("003", "Send welcome pack"))
        .with_listener(
            Listener::code("notify", "002", "Done", "result.context = {\"sent\": true}")
                .with_success_output(OutputSpec::new("003", TaskStatus::Done)),
        );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    settle(&runtime, id).await;

    // No listener watches 003; nothing changes.
    runtime
        .update_task_status(id, "003", TaskStatus::Pending, "waiting on courier")
        .await
        .unwrap();
    let quiet = settle(&runtime, id).await;
    assert_eq!(quiet.task("002").unwrap().status, TaskStatus::NotStarted);

    for _ in 0..2 {
        runtime
            .update_task_status(id, "002", TaskStatus::Running, "in progress")
            .await
            .unwrap();
        runtime
            .update_task_status(id, "002", TaskStatus::Done, "registered")
            .await
            .unwrap();
        settle(&runtime, id).await;
    }

    let instance = runtime.get_instance(id).await.unwrap();
    assert_eq!(
        count_events(&instance, |e| matches!(e, RunEvent::ListenerExecuted { listener_id, .. } if listener_id == "notify")),
        1
    );
    assert_eq!(instance.task("003").unwrap().status, TaskStatus::Done);

    // Same-status update is a no-op.
    let trace_len = instance.task("003").unwrap().status_trace.len();
    let transition = runtime
        .update_task_status(id, "003", TaskStatus::Done, "again")
        .await
        .unwrap();
    assert!(transition.is_none());
    assert_eq!(
        runtime.get_instance(id).await.unwrap().task("003").unwrap().status_trace.len(),
        trace_len
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_listeners_apply_every_result() {
    let agents = Arc::new(MockAgentRuntime::new().with_delay(Duration::from_millis(30)));
    let runtime = runtime_builder(&agents).build();

    let mut plan = onboarding_plan();
    for n in 3..=6 {
        let task_id = format!("00{n}");
        plan = plan.with_task(TaskDefinition::new(task_id.clone(), format!("Step {n}"))).with_listener(
            Listener::agent(format!("L{n}"), "001", "Running", format!("agent_{n}"), "go")
                .with_success_output(OutputSpec::new(task_id, TaskStatus::Done)),
        );
    }
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let instance = settle(&runtime, id).await;

    for n in 3..=6 {
        assert_eq!(instance.task(&format!("00{n}")).unwrap().status, TaskStatus::Done);
    }
    assert_eq!(agents.calls().await.len(), 4);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_cancel_discards_in_flight_results() {
    let agents = Arc::new(MockAgentRuntime::new().with_delay(Duration::from_millis(200)));
    let runtime = runtime_builder(&agents).build();
    let plan = onboarding_plan().with_listener(
        Listener::agent("slow", "001", "Running", "hr_agent", "register")
            .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
    );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();

    let agents_seen = Arc::clone(&agents);
    assert!(
        wait_until(
            || {
                let agents = Arc::clone(&agents_seen);
                async move { agents.call_count("hr_agent").await == 1 }
            },
            SETTLE
        )
        .await
    );
    runtime.cancel(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let instance = runtime.get_instance(id).await.unwrap();
    assert_eq!(instance.status, PlanInstanceStatus::Cancelled);
    assert_eq!(instance.task("002").unwrap().status, TaskStatus::NotStarted);
    assert!(runtime
        .update_task_status(id, "002", TaskStatus::Done, "late")
        .await
        .is_err());
}

#[tokio::test]
async fn test_verifier_completes_instance_when_main_task_done() {
    let agents = Arc::new(MockAgentRuntime::new());
    let runtime = runtime_builder(&agents)
        .with_verifier(Arc::new(MainTaskDoneVerifier))
        .build();
    let plan = onboarding_plan()
        .with_listener(
            Listener::code("register", "001", "Running", "result.context = {\"emp_id\": \"E-7\"}")
                .with_success_output(OutputSpec::new("002", TaskStatus::Done)),
        )
        .with_listener(
            Listener::code("finish", "002", "Done", "result.context = {\"summary\": \"onboarded\"}")
                .with_success_output(OutputSpec::new("001", TaskStatus::Done)),
        );
    runtime.register_plan(plan).await.unwrap();
    let id = runtime.run("onboarding", "Ada").await.unwrap();
    let instance = settle(&runtime, id).await;

    assert_eq!(instance.status, PlanInstanceStatus::Done);
    assert_eq!(instance.main_task().unwrap().status, TaskStatus::Done);
    assert!(instance.completed_at.is_some());
    assert_eq!(count_events(&instance, |e| matches!(e, RunEvent::Verified)), 1);

    let context = runtime.get_plan_context(id).await.unwrap();
    assert_eq!(context.tasks["002"].status, TaskStatus::Done);
}

struct RejectAll;

#[async_trait]
impl ApprovalGate for RejectAll {
    async fn request_approval(&self, _id: Uuid, _task_id: &str, summary: &str) -> DomainResult<ApprovalDecision> {
        Ok(ApprovalDecision::Rejected {
            reason: format!("not now: {summary}"),
        })
    }
}

#[tokio::test]
async fn test_approval_gate_decides_task_status() {
    let agents = Arc::new(MockAgentRuntime::new());

    let approving = runtime_builder(&agents).build();
    approving.register_plan(onboarding_plan()).await.unwrap();
    let id = approving.run("onboarding", "Ada").await.unwrap();
    let decision = approving.request_approval(id, "002", "register Ada").await.unwrap();
    assert_eq!(decision, ApprovalDecision::Approved);
    assert_eq!(settle(&approving, id).await.task("002").unwrap().status, TaskStatus::Running);
    assert!(approving.request_approval(id, "999", "nope").await.is_err());
    approving.shutdown().await;

    let rejecting = runtime_builder(&agents).with_approval_gate(Arc::new(RejectAll)).build();
    rejecting.register_plan(onboarding_plan()).await.unwrap();
    let id = rejecting.run("onboarding", "Ada").await.unwrap();
    rejecting.request_approval(id, "002", "register Ada").await.unwrap();
    let instance = settle(&rejecting, id).await;
    let hr = instance.task("002").unwrap();
    assert_eq!(hr.status, TaskStatus::Error);
    assert_eq!(hr.context.value("approval_rejection"), Some(&json!("not now: register Ada")));
    rejecting.shutdown().await;
}
