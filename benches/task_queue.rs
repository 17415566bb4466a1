use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use tokio::runtime::Runtime;

use taskhive::domain::models::{RetryConfig, Task, TaskPriority, TaskQueueConfig};
use taskhive::services::TaskQueueService;

fn queue_config() -> TaskQueueConfig {
    TaskQueueConfig {
        max_size: 100_000,
        default_task_timeout_ms: 300_000,
    }
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    c.bench_function("task_queue/enqueue_1000", |b| {
        b.iter_batched(
            || TaskQueueService::new(queue_config(), RetryConfig::default()),
            |queue| {
                rt.block_on(async {
                    for i in 0..1_000 {
                        let priority = match i % 5 {
                            0 => TaskPriority::Background,
                            1 => TaskPriority::Low,
                            2 => TaskPriority::Normal,
                            3 => TaskPriority::High,
                            _ => TaskPriority::Critical,
                        };
                        let task = Task::new(format!("bench {i}")).with_priority(priority);
                        black_box(queue.enqueue(task).await.expect("enqueue"));
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_dequeue_mixed_priorities(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let caps = vec!["general".to_string()];

    c.bench_function("task_queue/dequeue_1000_mixed", |b| {
        b.iter_batched(
            || {
                let queue = TaskQueueService::new(queue_config(), RetryConfig::default());
                rt.block_on(async {
                    for i in 0..1_000 {
                        let priority = match i % 5 {
                            0 => TaskPriority::Background,
                            1 => TaskPriority::Low,
                            2 => TaskPriority::Normal,
                            3 => TaskPriority::High,
                            _ => TaskPriority::Critical,
                        };
                        let task = Task::new(format!("bench {i}")).with_priority(priority);
                        queue.enqueue(task).await.expect("enqueue");
                    }
                });
                queue
            },
            |queue| {
                rt.block_on(async {
                    while let Some(task) = queue.dequeue_eligible(&caps).await.expect("dequeue") {
                        black_box(task.id);
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_dependency_chain_completion(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let caps = vec!["general".to_string()];

    c.bench_function("task_queue/chain_200_complete", |b| {
        b.iter_batched(
            || {
                let queue = TaskQueueService::new(queue_config(), RetryConfig::default());
                rt.block_on(async {
                    let mut prev: Option<uuid::Uuid> = None;
                    for i in 0..200 {
                        let mut task = Task::new(format!("link {i}"));
                        if let Some(dep) = prev {
                            task = task.with_dependency(dep);
                        }
                        prev = Some(queue.enqueue(task).await.expect("enqueue"));
                    }
                });
                queue
            },
            |queue| {
                rt.block_on(async {
                    let agent = uuid::Uuid::new_v4();
                    while let Some(task) = queue.dequeue_eligible(&caps).await.expect("dequeue") {
                        queue.mark_running(task.id, agent).await.expect("running");
                        queue
                            .mark_completed(task.id, serde_json::Value::Null)
                            .await
                            .expect("completed");
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_enqueue,
    bench_dequeue_mixed_priorities,
    bench_dependency_chain_completion
);
criterion_main!(benches);
