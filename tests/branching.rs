// tests/branching.rs

mod common;

use std::error::Error;

use dagmaster::model::Property;
use dagmaster::types::{TaskExecutionStatus, WorkflowState};

use crate::common::{DefinitionBuilder, Outcome, TaskBuilder, TestEngine, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn test_switch_runs_only_the_matching_branch() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine
            .dispatcher
            .script(1, [Outcome::SucceedWith(vec![Property::output("x", "2")])]);
        // 1 -> switch(2) -> {3 -> 5, 4}
        let definition = DefinitionBuilder::new(1)
            .shell(1, &[])
            .with_task(
                TaskBuilder::switch(2, &[("${x} == 1", 3), ("${x} == 2", 4)], None).build(),
            )
            .after(2, &[1])
            .shell(3, &[2])
            .shell(4, &[2])
            .shell(5, &[3])
            .build();

        let (id, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Success);
        assert_eq!(engine.dispatcher.dispatch_order(), vec![1, 4]);
        let switch = engine.task(id, 2).ok_or("switch row missing")?;
        assert_eq!(switch.switch_next, Some(4));
        let states = engine.task_states(id);
        assert!(!states.contains_key(&3));
        assert!(!states.contains_key(&5));
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_switch_falls_back_to_default_branch() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        let definition = DefinitionBuilder::new(1)
            .global_param("env", "prod")
            .with_task(
                TaskBuilder::switch(1, &[("'${env}' == 'dev'", 2)], Some(3)).build(),
            )
            .after(1, &[])
            .shell(2, &[1])
            .shell(3, &[1])
            .build();

        let (_, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Success);
        assert_eq!(engine.dispatcher.dispatch_order(), vec![3]);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_switch_without_match_or_default_fails() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        let definition = DefinitionBuilder::new(1)
            .with_task(TaskBuilder::switch(1, &[("1 == 2", 2)], None).build())
            .after(1, &[])
            .shell(2, &[1])
            .build();

        let (id, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Failure);
        assert_eq!(engine.task_states(id).get(&1), Some(&TaskExecutionStatus::Failure));
        assert!(engine.dispatcher.dispatch_order().is_empty());
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_conditions_route_a_failure_to_the_failed_branch() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        engine.dispatcher.script(1, [Outcome::Fail]);
        // 1 -> conditions(2) -> {3 on success, 4 on failure}
        let definition = DefinitionBuilder::new(1)
            .shell(1, &[])
            .with_task(TaskBuilder::conditions(2, 1, &[3], &[4]).build())
            .after(2, &[1])
            .shell(3, &[2])
            .shell(4, &[2])
            .build();

        let (id, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Success, "a handled failure is a branch outcome");
        assert_eq!(engine.dispatcher.dispatch_order(), vec![1, 4]);
        let states = engine.task_states(id);
        assert_eq!(states.get(&1), Some(&TaskExecutionStatus::Failure));
        assert_eq!(states.get(&2), Some(&TaskExecutionStatus::Failure));
        assert!(!states.contains_key(&3));
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_conditions_route_a_success_to_the_success_branch() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = TestEngine::new();
        let definition = DefinitionBuilder::new(1)
            .shell(1, &[])
            .with_task(TaskBuilder::conditions(2, 1, &[3], &[4]).build())
            .after(2, &[1])
            .shell(3, &[2])
            .shell(4, &[2])
            .build();

        let (id, state) = engine.run(definition).await?;

        assert_eq!(state, WorkflowState::Success);
        assert_eq!(engine.dispatcher.dispatch_order(), vec![1, 3]);
        assert_eq!(engine.task_states(id).get(&2), Some(&TaskExecutionStatus::Success));
        TestResult::Ok(())
    })
    .await
}
