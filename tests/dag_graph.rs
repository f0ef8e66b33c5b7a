// tests/dag_graph.rs

mod common;

use std::collections::{HashMap, HashSet};
use std::error::Error;

use proptest::prelude::*;

use dagmaster::dag::{DependResult, StartNodes, WorkflowDag, post_nodes, resolve};
use dagmaster::errors::DagmasterError;
use dagmaster::model::{TaskCode, TaskDefinition, TaskInstance, TaskRelation};
use dagmaster::types::{Priority, TaskDependType, TaskExecutionStatus, TaskType};

use crate::common::{DefinitionBuilder, TaskBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn build(definition: &dagmaster::model::WorkflowDefinition) -> Result<WorkflowDag, DagmasterError> {
    WorkflowDag::build(&definition.tasks, &definition.relations, None)
}

fn done(dag: &WorkflowDag, code: TaskCode, state: TaskExecutionStatus) -> TaskInstance {
    let definition = dag
        .definition(code)
        .cloned()
        .unwrap_or_else(|| TaskDefinition::new(code, format!("t{code}"), TaskType::Shell));
    let mut task = TaskInstance::new(1, Priority::Medium, definition);
    task.state = state;
    task
}

fn completed(
    dag: &WorkflowDag,
    entries: &[(TaskCode, TaskExecutionStatus)],
) -> HashMap<TaskCode, TaskInstance> {
    entries
        .iter()
        .map(|&(code, state)| (code, done(dag, code, state)))
        .collect()
}

/// 1 -> 2 -> 3, 1 -> 4
fn small_dag() -> Result<WorkflowDag, DagmasterError> {
    build(
        &DefinitionBuilder::new(1)
            .shell(1, &[])
            .shell(2, &[1])
            .shell(3, &[2])
            .shell(4, &[1])
            .build(),
    )
}

#[test]
fn test_edge_to_unknown_task_fails_loudly() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .after(2, &[1])
        .build();

    let err = build(&definition).err().ok_or("expected an error")?;
    assert!(
        matches!(err, DagmasterError::UnknownTask { missing: 2, .. }),
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn test_cycle_is_rejected() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[3])
        .shell(2, &[1])
        .shell(3, &[2])
        .build();

    let err = build(&definition).err().ok_or("expected a cycle error")?;
    assert!(matches!(err, DagmasterError::DagCycle(_)), "unexpected error: {err}");
    Ok(())
}

#[test]
fn test_duplicate_task_code_is_rejected() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .with_task(TaskBuilder::shell(1).build())
        .build();

    assert!(matches!(build(&definition), Err(DagmasterError::ConfigError(_))));
    Ok(())
}

#[test]
fn test_begin_nodes_and_topological_order() -> TestResult {
    let dag = small_dag()?;

    assert_eq!(dag.begin_nodes(), &[1]);
    let order = dag.topological_order();
    let pos = |c: TaskCode| order.iter().position(|x| *x == c);
    assert!(pos(1) < pos(2));
    assert!(pos(2) < pos(3));
    assert!(pos(1) < pos(4));
    Ok(())
}

#[test]
fn test_rebuild_is_idempotent() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .shell(2, &[1])
        .build();
    let a = build(&definition)?;
    let b = build(&definition)?;

    assert_eq!(a.topological_order(), b.topological_order());
    assert_eq!(a.begin_nodes(), b.begin_nodes());
    Ok(())
}

#[test]
fn test_start_node_selection_by_depend_type() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .shell(2, &[1])
        .shell(3, &[2])
        .shell(4, &[1])
        .build();
    let select = |depend_type| {
        let start = StartNodes {
            nodes: vec![2],
            depend_type,
        };
        WorkflowDag::build(&definition.tasks, &definition.relations, Some(&start)).map(|dag| {
            let mut codes: Vec<TaskCode> = dag.topological_order().to_vec();
            codes.sort();
            codes
        })
    };

    assert_eq!(select(TaskDependType::TaskPost)?, vec![2, 3]);
    assert_eq!(select(TaskDependType::TaskPre)?, vec![1, 2]);
    assert_eq!(select(TaskDependType::TaskOnly)?, vec![2]);

    let post = WorkflowDag::build(
        &definition.tasks,
        &definition.relations,
        Some(&StartNodes {
            nodes: vec![2],
            depend_type: TaskDependType::TaskPost,
        }),
    )?;
    assert!(post.is_begin(2), "start node becomes a begin node of the sub-graph");
    Ok(())
}

#[test]
fn test_unknown_start_node_is_rejected() {
    let definition = DefinitionBuilder::new(1).shell(1, &[]).build();
    let start = StartNodes {
        nodes: vec![42],
        depend_type: TaskDependType::TaskPost,
    };

    let result = WorkflowDag::build(&definition.tasks, &definition.relations, Some(&start));
    assert!(matches!(result, Err(DagmasterError::InvalidCommand(_))));
}

#[test]
fn test_resolve_begin_node_is_ready() -> TestResult {
    let dag = small_dag()?;
    assert_eq!(
        resolve(&dag, 1, &HashMap::new(), &HashSet::new()),
        DependResult::Ready
    );
    Ok(())
}

#[test]
fn test_resolve_waits_for_unfinished_predecessor() -> TestResult {
    let dag = small_dag()?;
    let done = completed(&dag, &[(1, TaskExecutionStatus::Success)]);

    assert_eq!(resolve(&dag, 3, &done, &HashSet::new()), DependResult::Waiting);
    assert_eq!(resolve(&dag, 2, &done, &HashSet::new()), DependResult::Ready);
    Ok(())
}

#[test]
fn test_resolve_failed_predecessor_is_failed() -> TestResult {
    let dag = small_dag()?;
    let done = completed(&dag, &[(1, TaskExecutionStatus::Failure)]);

    assert_eq!(resolve(&dag, 2, &done, &HashSet::new()), DependResult::Failed);
    Ok(())
}

#[test]
fn test_resolve_paused_or_killed_predecessor_is_non_exec() -> TestResult {
    let dag = small_dag()?;
    for state in [
        TaskExecutionStatus::Pause,
        TaskExecutionStatus::Kill,
        TaskExecutionStatus::Stop,
    ] {
        let done = completed(&dag, &[(1, state)]);
        assert_eq!(
            resolve(&dag, 2, &done, &HashSet::new()),
            DependResult::NonExec,
            "predecessor state {state:?}"
        );
    }
    Ok(())
}

#[test]
fn test_resolve_ignores_skipped_predecessor() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .shell(2, &[])
        .shell(3, &[1, 2])
        .build();
    let dag = build(&definition)?;
    let done = completed(&dag, &[(1, TaskExecutionStatus::Success)]);
    let skip: HashSet<TaskCode> = [2].into_iter().collect();

    assert_eq!(resolve(&dag, 3, &done, &skip), DependResult::Ready);
    Ok(())
}

#[test]
fn test_conditions_node_ignores_predecessor_failure() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .with_task(TaskBuilder::conditions(2, 1, &[3], &[]).build())
        .after(2, &[1])
        .shell(3, &[2])
        .build();
    let dag = build(&definition)?;
    let done = completed(&dag, &[(1, TaskExecutionStatus::Failure)]);

    assert_eq!(resolve(&dag, 2, &done, &HashSet::new()), DependResult::Ready);
    Ok(())
}

#[test]
fn test_unchosen_switch_branch_is_pruned() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .with_task(TaskBuilder::switch(1, &[("1 == 1", 2)], Some(3)).build())
        .after(1, &[])
        .shell(2, &[1])
        .shell(3, &[1])
        .shell(4, &[3])
        .build();
    let dag = build(&definition)?;

    let mut switch = done(&dag, 1, TaskExecutionStatus::Success);
    switch.switch_next = Some(2);
    let done: HashMap<TaskCode, TaskInstance> = [(1, switch)].into_iter().collect();

    assert_eq!(resolve(&dag, 2, &done, &HashSet::new()), DependResult::Ready);
    assert_eq!(resolve(&dag, 3, &done, &HashSet::new()), DependResult::Failed);

    let mut skip = HashSet::new();
    let next = post_nodes(&dag, Some(1), &done, &mut skip);
    assert_eq!(next, vec![2]);
    assert!(skip.contains(&3));
    assert!(skip.contains(&4), "skipping spreads to nodes whose predecessors are all skipped");
    Ok(())
}

#[test]
fn test_forbidden_node_is_walked_through() -> TestResult {
    let definition = DefinitionBuilder::new(1)
        .shell(1, &[])
        .with_task(TaskBuilder::shell(2).forbidden().build())
        .after(2, &[1])
        .shell(3, &[2])
        .build();
    let dag = build(&definition)?;
    assert_eq!(dag.forbidden_nodes().collect::<Vec<_>>(), vec![2]);
    assert_eq!(dag.effective_predecessors(3), vec![1]);

    assert_eq!(
        resolve(&dag, 3, &HashMap::new(), &HashSet::new()),
        DependResult::Waiting
    );
    let done = completed(&dag, &[(1, TaskExecutionStatus::Success)]);
    assert_eq!(resolve(&dag, 3, &done, &HashSet::new()), DependResult::Ready);

    let mut skip = HashSet::new();
    assert_eq!(post_nodes(&dag, Some(1), &done, &mut skip), vec![3]);
    Ok(())
}

/// Random acyclic graphs: task `i` may only depend on tasks `0..i`.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let mut deps: Vec<usize> =
                            deps.into_iter().filter(|_| i > 0).map(|d| d % i.max(1)).collect();
                        deps.sort();
                        deps.dedup();
                        deps
                    })
                    .collect()
            },
        )
    })
}

fn definition_from(deps: &[Vec<usize>]) -> dagmaster::model::WorkflowDefinition {
    let mut tasks = Vec::new();
    let mut relations = Vec::new();
    for (i, pre) in deps.iter().enumerate() {
        let code = i as TaskCode + 1;
        tasks.push(TaskBuilder::shell(code).build());
        if pre.is_empty() {
            relations.push(TaskRelation::root(code));
        }
        for p in pre {
            relations.push(TaskRelation::edge(*p as TaskCode + 1, code));
        }
    }
    let mut definition = DefinitionBuilder::new(1).build();
    definition.tasks = tasks;
    definition.relations = relations;
    definition
}

proptest! {
    #[test]
    fn prop_random_dag_orders_predecessors_first(deps in dag_strategy(12)) {
        let definition = definition_from(&deps);
        let dag = WorkflowDag::build(&definition.tasks, &definition.relations, None)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(dag.len(), deps.len());
        let order = dag.topological_order();
        let position: HashMap<TaskCode, usize> =
            order.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        for (i, pre) in deps.iter().enumerate() {
            let code = i as TaskCode + 1;
            prop_assert_eq!(dag.is_begin(code), pre.is_empty());
            for p in pre {
                prop_assert!(position[&(*p as TaskCode + 1)] < position[&code]);
            }
        }
    }

    #[test]
    fn prop_walking_completions_in_order_reaches_every_task(deps in dag_strategy(10)) {
        let definition = definition_from(&deps);
        let dag = WorkflowDag::build(&definition.tasks, &definition.relations, None)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut done: HashMap<TaskCode, TaskInstance> = HashMap::new();
        let skip = HashSet::new();
        for code in dag.topological_order().to_vec() {
            prop_assert_eq!(resolve(&dag, code, &done, &skip), DependResult::Ready);
            done.insert(code, {
                let mut t = TaskInstance::new(1, Priority::Medium, TaskBuilder::shell(code).build());
                t.state = TaskExecutionStatus::Success;
                t
            });
        }
        prop_assert_eq!(done.len(), dag.len());
    }
}
