//! Benchmarks for listener matching and condition parsing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::{BTreeSet, HashMap};

use conductor::domain::models::{Listener, Plan, TaskDefinition, TaskStatus, TriggerCondition};
use conductor::services::match_listeners;

fn plan_with_listeners(count: usize) -> Plan {
    let mut plan = Plan::new("bench", "Bench plan");
    for t in 1..=20 {
        plan = plan.with_task(TaskDefinition::new(format!("{t:03}"), format!("Task {t}")));
    }
    for n in 0..count {
        let trigger = format!("{:03}", n % 20 + 1);
        let condition = match n % 3 {
            0 => "Done".to_string(),
            1 => format!("{trigger}.status == Done && 001.status == Running"),
            _ => "Any".to_string(),
        };
        plan = plan.with_listener(
            Listener::code(format!("L{n}"), trigger.as_str(), condition, "result.context = {};")
                .with_priority((n % 5) as i32),
        );
    }
    plan
}

fn statuses() -> HashMap<String, TaskStatus> {
    (1..=20)
        .map(|t| {
            let status = if t == 1 { TaskStatus::Running } else { TaskStatus::NotStarted };
            (format!("{t:03}"), status)
        })
        .collect()
}

fn bench_match_listeners(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_listeners");
    let statuses = statuses();

    for count in [10, 100, 1000] {
        let plan = plan_with_listeners(count);
        let executed: BTreeSet<String> = (0..count / 2).map(|n| format!("L{n}")).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &plan, |b, plan| {
            b.iter(|| {
                black_box(match_listeners(
                    plan,
                    black_box(&executed),
                    &statuses,
                    black_box("002"),
                    &TaskStatus::Done,
                ))
            });
        });
    }

    group.finish();
}

fn bench_condition_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_parse");
    let inputs = [
        ("status", "Done"),
        ("clause", "002.status == Done"),
        ("compound", "(002.status == Done || 003.status == Error) && !(001.status == Pending)"),
    ];

    for (name, input) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(name), input, |b, input| {
            b.iter(|| black_box(TriggerCondition::parse(black_box(input))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_match_listeners, bench_condition_parse);
criterion_main!(benches);
