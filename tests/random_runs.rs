// tests/random_runs.rs

mod common;

use std::collections::HashMap;

use proptest::prelude::*;

use dagmaster::model::{TaskCode, TaskRelation, WorkflowDefinition};
use dagmaster::types::WorkflowState;

use crate::common::{DefinitionBuilder, TaskBuilder, TestEngine, init_tracing, with_timeout};

/// Predecessor indices per task; a task only depends on earlier ones.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(0..n, 0..3), n).prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    let mut deps: Vec<usize> = deps.into_iter().filter(|d| *d < i).collect();
                    deps.sort();
                    deps.dedup();
                    deps
                })
                .collect()
        })
    })
}

fn definition_from(deps: &[Vec<usize>]) -> WorkflowDefinition {
    let mut builder = DefinitionBuilder::new(1);
    for (i, pre) in deps.iter().enumerate() {
        let code = i as TaskCode + 1;
        let after: Vec<TaskCode> = pre.iter().map(|p| *p as TaskCode + 1).collect();
        builder = builder.with_task(TaskBuilder::shell(code).build()).after(code, &after);
    }
    builder.build()
}

fn run(definition: WorkflowDefinition) -> Result<(WorkflowState, Vec<TaskCode>, usize), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;
    runtime.block_on(async {
        let engine = TestEngine::new();
        let outcome = with_timeout(async {
            let (_, state) = engine.run(definition).await?;
            Ok::<_, dagmaster::errors::DagmasterError>(state)
        })
        .await
        .map_err(|e| e.to_string())?;
        Ok((outcome, engine.dispatcher.dispatch_order(), engine.dispatcher.overlaps()))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_random_dag_runs_to_success_in_dependency_order(deps in dag_strategy(8)) {
        init_tracing();
        let definition = definition_from(&deps);
        let relations: Vec<TaskRelation> = definition.relations.clone();

        let (state, order, overlaps) = run(definition).map_err(TestCaseError::fail)?;

        prop_assert_eq!(state, WorkflowState::Success);
        prop_assert_eq!(overlaps, 0);
        prop_assert_eq!(order.len(), deps.len(), "every task dispatched exactly once");

        let position: HashMap<TaskCode, usize> =
            order.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        for relation in relations {
            if let Some(pre) = relation.pre {
                prop_assert!(position[&pre] < position[&relation.post]);
            }
        }
    }
}
