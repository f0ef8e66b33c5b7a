// tests/timeouts.rs

mod common;

use std::error::Error;

use dagmaster::collab::Alert;
use dagmaster::engine::StateEvent;
use dagmaster::types::{TaskExecutionStatus, TimeoutStrategy, WorkflowState};

use crate::common::{DefinitionBuilder, Outcome, TaskBuilder, TestEngine, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn test_task_timeout_with_failed_strategy_fails_task() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Hang]);
        let definition = DefinitionBuilder::new(1)
            .with_task(
                TaskBuilder::shell(1)
                    .timeout(TimeoutStrategy::Failed, 1)
                    .build(),
            )
            .after(1, &[])
            .shell(2, &[1])
            .build();

        let (id, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Failure);
        assert_eq!(engine.task_states(id).get(&1), Some(&TaskExecutionStatus::Failure));
        assert!(!engine.task_states(id).contains_key(&2));
        assert!(engine.alerts.alerts().iter().any(|a| matches!(
            a,
            Alert::TaskTimeout { task_code: 1, strategy: TimeoutStrategy::Failed, .. }
        )));
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_task_timeout_with_warn_strategy_only_alerts() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Hang]);
        let definition = DefinitionBuilder::new(1)
            .with_task(
                TaskBuilder::shell(1)
                    .timeout(TimeoutStrategy::Warn, 1)
                    .build(),
            )
            .after(1, &[])
            .build();
        let id = engine.start(definition).await?;

        let mut alerted = false;
        for _ in 0..400 {
            alerted = engine
                .alerts
                .alerts()
                .iter()
                .any(|a| matches!(a, Alert::TaskTimeout { task_code: 1, .. }));
            if alerted {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(alerted, "warn timeout must raise an alert");
        assert_eq!(
            engine.task_states(id).get(&1),
            Some(&TaskExecutionStatus::RunningExecution),
            "a warning leaves the task running"
        );

        let task = engine.task(id, 1).ok_or("task row missing")?;
        let task_instance_id = task.id.ok_or("task row without id")?;
        engine
            .repository
            .set_task_state(task_instance_id, TaskExecutionStatus::Success)?;
        engine.send(id, StateEvent::TaskStateChange { task_instance_id });

        assert_eq!(engine.wait(id).await?, WorkflowState::Success);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_process_timeout_kills_running_tasks() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Hang]);
        let definition = DefinitionBuilder::new(1)
            .shell(1, &[])
            .shell(2, &[1])
            .timeout(TimeoutStrategy::Failed, 1)
            .build();

        let (id, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Failure);
        assert_eq!(engine.task_states(id).get(&1), Some(&TaskExecutionStatus::Kill));
        assert_eq!(engine.dispatcher.killed(), vec![1]);
        assert!(engine.alerts.alerts().iter().any(|a| matches!(
            a,
            Alert::ProcessTimeout { instance_id, strategy: TimeoutStrategy::Failed } if *instance_id == id
        )));
        TestResult::Ok(())
    })
    .await
}
