// tests/intake_recovery.rs

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dagmaster::engine::{StateEvent, run_command_consumer};
use dagmaster::errors::DagmasterError;
use dagmaster::model::{Command, TaskInstance, WorkflowInstance};
use dagmaster::store::{CommandSource, WorkflowRepository};
use dagmaster::types::{CommandType, FailureStrategy, TaskExecutionStatus, WorkflowState};

use crate::common::{
    DefinitionBuilder, Outcome, TestEngine, fast_config, init_tracing, start_command,
    with_timeout,
};

type TestResult = Result<(), Box<dyn Error>>;

fn chain() -> dagmaster::model::WorkflowDefinition {
    DefinitionBuilder::new(1)
        .shell(1, &[])
        .shell(2, &[1])
        .shell(3, &[2])
        .build()
}

#[tokio::test]
async fn test_recover_failure_reruns_from_failed_task() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(2, [Outcome::Fail]);

        let (id, state) = engine.run(chain()).await?;
        assert_eq!(state, WorkflowState::Failure);

        engine
            .submit(Command::resume(CommandType::RecoverFailure, id))
            .await?;
        assert_eq!(engine.wait(id).await?, WorkflowState::Success);

        assert_eq!(engine.dispatcher.dispatch_count(1), 1, "succeeded task is kept");
        assert_eq!(engine.dispatcher.dispatch_count(2), 2);
        assert_eq!(engine.dispatcher.dispatch_count(3), 1);
        let rows = engine.repository.task_instances(id);
        assert_eq!(rows.iter().filter(|t| !t.valid).count(), 1, "failed attempt invalidated");
        assert!(engine.task_states(id).values().all(|s| *s == TaskExecutionStatus::Success));
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_recover_suspended_resumes_paused_tasks() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Hang]);
        let id = engine.start(chain()).await?;

        assert!(engine.wait_for_task(id, 1, TaskExecutionStatus::RunningExecution).await);
        engine.send(
            id,
            StateEvent::ProcessStateChange {
                new_state: WorkflowState::ReadyPause,
            },
        );
        for _ in 0..100 {
            if engine.pool.current_state(id) == Some(WorkflowState::ReadyPause) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let running = engine.task(id, 1).and_then(|t| t.id).ok_or("task 1 row missing")?;
        engine
            .repository
            .set_task_state(running, TaskExecutionStatus::Success)?;
        engine.send(id, StateEvent::TaskStateChange { task_instance_id: running });
        assert_eq!(engine.wait(id).await?, WorkflowState::Pause);

        engine
            .submit(Command::resume(CommandType::RecoverSuspended, id))
            .await?;
        assert_eq!(engine.wait(id).await?, WorkflowState::Success);
        assert_eq!(engine.dispatcher.dispatch_order(), vec![1, 2, 3]);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_repeat_run_reruns_everything() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        let (id, state) = engine.run(chain()).await?;
        assert_eq!(state, WorkflowState::Success);

        engine
            .submit(Command::resume(CommandType::RepeatRun, id))
            .await?;
        assert_eq!(engine.wait(id).await?, WorkflowState::Success);

        assert_eq!(engine.dispatcher.dispatch_order(), vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(engine.repository.task_instances(id).len(), 6);
        assert_eq!(engine.task_states(id).len(), 3);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_resuming_a_live_instance_is_rejected() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Hang]);
        let id = engine.start(chain()).await?;
        assert!(engine.wait_for_task(id, 1, TaskExecutionStatus::RunningExecution).await);

        let result = engine
            .submit(Command::resume(CommandType::RecoverFailure, id))
            .await;
        assert!(matches!(result, Err(DagmasterError::InvalidCommand(_))));
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_tolerance_fault_recovery_reruns_orphaned_task() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        let definition = chain();
        engine.define(definition.clone());

        // A master died while task 2 was on a worker.
        let mut instance = WorkflowInstance::from_definition(&definition, CommandType::Start);
        instance.state = WorkflowState::Running;
        let instance = engine
            .repository
            .create_workflow_instance(instance)
            .await?;
        let task_def = |code| definition.task(code).cloned().ok_or("missing task");
        let mut done = TaskInstance::new(instance.id, instance.priority, task_def(1)?);
        done.state = TaskExecutionStatus::Success;
        engine.repository.save_task_instance(done).await?;
        let mut orphan = TaskInstance::new(instance.id, instance.priority, task_def(2)?);
        orphan.state = TaskExecutionStatus::NeedFaultTolerance;
        let orphan = engine.repository.save_task_instance(orphan).await?;

        engine
            .submit(Command::resume(CommandType::RecoverToleranceFault, instance.id))
            .await?;
        assert_eq!(engine.wait(instance.id).await?, WorkflowState::Success);

        assert_eq!(engine.dispatcher.dispatch_order(), vec![2, 3]);
        let orphan_row = engine
            .repository
            .task_instances(instance.id)
            .into_iter()
            .find(|t| t.id == orphan.id)
            .ok_or("orphan row missing")?;
        assert!(!orphan_row.valid);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_execute_subset_without_start_nodes_is_rejected() -> TestResult {
    let engine = TestEngine::new();
    let definition = chain();
    engine.define(definition.clone());
    let mut command = start_command(&definition, FailureStrategy::End);
    command.command_type = CommandType::ExecuteSubset;

    let result = engine.submit(command).await;

    assert!(matches!(result, Err(DagmasterError::InvalidCommand(_))));
    assert!(engine.repository.workflow_instances().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_definition_is_rejected() -> TestResult {
    let engine = TestEngine::new();
    let result = engine
        .submit(Command::new(CommandType::Start, 99, 1))
        .await;
    assert!(matches!(result, Err(DagmasterError::DefinitionNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_submitting_a_live_instance_twice_fails() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Hang]);
        let id = engine.start(chain()).await?;
        let instance = engine
            .repository
            .workflow_instance(id)
            .ok_or("instance row missing")?;

        let result = engine.pool.submit(&instance);

        assert!(matches!(result, Err(DagmasterError::AlreadyScheduled(other)) if other == id));
        assert_eq!(engine.pool.live_instances(), 1);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_command_consumer_holds_commands_while_saturated() -> TestResult {
    init_tracing();
    with_timeout(async {
        let mut config = fast_config();
        config.max_live_instances = Some(1);
        let engine = TestEngine::with_config(config);
        let definition = chain();
        engine.define(definition.clone());
        engine
            .repository
            .push_command(start_command(&definition, FailureStrategy::End));
        engine
            .repository
            .push_command(start_command(&definition, FailureStrategy::End));

        let shutdown = CancellationToken::new();
        let source: Arc<dyn CommandSource> = engine.repository.clone();
        let consumer = tokio::spawn(run_command_consumer(
            engine.pool.clone(),
            source,
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        let mut finished = Vec::new();
        for _ in 0..400 {
            finished = engine
                .repository
                .workflow_instances()
                .into_iter()
                .filter(|i| i.state == WorkflowState::Success)
                .collect();
            if finished.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        consumer.await?;

        assert_eq!(finished.len(), 2, "both commands eventually run");
        assert_eq!(engine.dispatcher.dispatch_count(1), 2);
        assert_eq!(engine.dispatcher.overlaps(), 0);
        TestResult::Ok(())
    })
    .await
}
