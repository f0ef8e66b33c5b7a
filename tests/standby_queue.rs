// tests/standby_queue.rs

use chrono::{Duration, Utc};

use dagmaster::engine::StandbyQueue;
use dagmaster::model::{TaskCode, TaskDefinition, TaskInstance};
use dagmaster::types::{Priority, TaskExecutionStatus, TaskType};

fn task(
    instance_id: u64,
    workflow_priority: Priority,
    code: TaskCode,
    priority: Priority,
) -> TaskInstance {
    let mut definition = TaskDefinition::new(code, format!("t{code}"), TaskType::Shell);
    definition.priority = priority;
    TaskInstance::new(instance_id, workflow_priority, definition)
}

fn codes(queue: &StandbyQueue) -> Vec<TaskCode> {
    queue.tasks().into_iter().map(TaskInstance::task_code).collect()
}

#[test]
fn test_task_priority_orders_dispatch() {
    let mut queue = StandbyQueue::new();
    queue.push(task(1, Priority::Medium, 1, Priority::Low));
    queue.push(task(1, Priority::Medium, 2, Priority::Highest));
    queue.push(task(1, Priority::Medium, 3, Priority::Medium));

    assert_eq!(codes(&queue), vec![2, 3, 1]);
}

#[test]
fn test_workflow_priority_beats_task_priority() {
    let mut queue = StandbyQueue::new();
    queue.push(task(1, Priority::Low, 1, Priority::Highest));
    queue.push(task(2, Priority::High, 2, Priority::Lowest));

    assert_eq!(codes(&queue), vec![2, 1]);
}

#[test]
fn test_ties_keep_insertion_order_and_rows_with_ids_first() {
    let mut queue = StandbyQueue::new();
    queue.push(task(1, Priority::Medium, 1, Priority::Medium));
    queue.push(task(1, Priority::Medium, 2, Priority::Medium));
    let mut retried = task(1, Priority::Medium, 3, Priority::Medium);
    retried.id = Some(7);
    queue.push(retried);

    assert_eq!(codes(&queue), vec![3, 1, 2]);
}

#[test]
fn test_remove_and_contains() {
    let mut queue = StandbyQueue::new();
    let seq = queue.push(task(1, Priority::Medium, 5, Priority::Medium));
    assert!(queue.contains_code(5));
    assert_eq!(queue.len(), 1);

    let removed = queue.remove(seq).map(|t| t.task_code());
    assert_eq!(removed, Some(5));
    assert!(queue.is_empty());
    assert!(queue.remove(seq).is_none());
}

#[test]
fn test_failed_task_marks_queue_as_holding_a_retry() {
    let mut queue = StandbyQueue::new();
    queue.push(task(1, Priority::Medium, 1, Priority::Medium));
    assert!(!queue.has_retry_task());

    let mut failed = task(1, Priority::Medium, 2, Priority::Medium);
    failed.state = TaskExecutionStatus::Failure;
    queue.push(failed);
    assert!(queue.has_retry_task());
}

#[test]
fn test_retry_interval_gates_at_its_boundary() {
    let mut failed = task(1, Priority::Medium, 1, Priority::Medium);
    failed.definition.max_retry_times = 3;
    failed.definition.retry_interval = 60;
    let end = Utc::now();
    failed.finish(TaskExecutionStatus::Failure, end);

    assert!(!failed.retry_interval_elapsed(end + Duration::seconds(59)));
    assert!(failed.retry_interval_elapsed(end + Duration::seconds(61)));
    assert_eq!(failed.retry_ready_at(), Some(end + Duration::seconds(60)));
}

#[test]
fn test_huge_retry_interval_keeps_the_retry_gated() {
    for interval in [10_000_000_000_000_000, u64::MAX] {
        let mut failed = task(1, Priority::Medium, 1, Priority::Medium);
        failed.definition.max_retry_times = 3;
        failed.definition.retry_interval = interval;
        let end = Utc::now();
        failed.finish(TaskExecutionStatus::Failure, end);

        assert!(!failed.retry_interval_elapsed(end + Duration::days(365 * 100)));
        assert_eq!(failed.retry_ready_at(), None);
    }
}

#[test]
fn test_retry_without_interval_is_immediate() {
    let mut failed = task(1, Priority::Medium, 1, Priority::Medium);
    failed.definition.max_retry_times = 1;
    let end = Utc::now();
    failed.finish(TaskExecutionStatus::Failure, end);

    assert!(failed.retry_interval_elapsed(end));
    assert!(failed.can_retry());

    failed.retry_times = 1;
    assert!(!failed.can_retry(), "retry budget exhausted");
}
