// src/dag/resolver.rs

//! Dependency resolution and successor selection over a [`WorkflowDag`].
//!
//! Both functions are pure: they read the DAG and the completed map of the
//! current pass and never touch the repository or the dispatch client.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::dag::WorkflowDag;
use crate::model::{ConditionsParameters, TaskCode, TaskInstance, parse_params};
use crate::types::{TaskExecutionStatus, TaskType};

/// Outcome of resolving a task's dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependResult {
    /// All predecessors finished in a way that allows this task to run.
    Ready,
    /// At least one predecessor has not finished yet.
    Waiting,
    /// A predecessor failed or routed elsewhere; counts as a failure.
    Failed,
    /// A predecessor was paused or killed; the task is dropped silently.
    NonExec,
}

/// Resolve whether `code` may run given the tasks completed so far.
pub fn resolve(
    dag: &WorkflowDag,
    code: TaskCode,
    completed: &HashMap<TaskCode, TaskInstance>,
    skip: &HashSet<TaskCode>,
) -> DependResult {
    if dag.is_begin(code) {
        return DependResult::Ready;
    }

    let is_conditions = dag
        .definition(code)
        .is_some_and(|d| d.task_type.is_conditions());

    for pre in dag.effective_predecessors(code) {
        if !dag.contains(pre) || skip.contains(&pre) {
            continue;
        }
        let Some(done) = completed.get(&pre) else {
            return DependResult::Waiting;
        };
        let state = done.state;
        if state.is_pause() || state.is_kill() || state == TaskExecutionStatus::WaitingThread {
            return DependResult::NonExec;
        }
        if is_conditions {
            continue;
        }
        if let Some(chosen) = chosen_branch(done) {
            if !chosen.contains(&code) {
                debug!(task_code = code, pre, "task not on the chosen branch");
                return DependResult::Failed;
            }
            continue;
        }
        if state.is_failure() {
            return DependResult::Failed;
        }
    }

    DependResult::Ready
}

/// Successors selected by a finished CONDITIONS or SWITCH task; `None` for
/// other task types.
pub fn chosen_branch(task: &TaskInstance) -> Option<Vec<TaskCode>> {
    match task.task_type() {
        TaskType::Conditions => {
            let chosen = match parse_params::<ConditionsParameters>(&task.definition) {
                Ok(params) if task.state.is_success() => params.success_node,
                Ok(params) => params.failed_node,
                Err(_) => Vec::new(),
            };
            Some(chosen)
        }
        TaskType::Switch => Some(task.switch_next.into_iter().collect()),
        _ => None,
    }
}

/// Candidate successors to submit after `parent` finished (or the begin
/// nodes when `parent` is `None`).
///
/// Branch tasks mark their unchosen successors as skipped, skipping spreads
/// to nodes whose predecessors are all skipped, and forbidden or already
/// completed candidates are walked through.
pub fn post_nodes(
    dag: &WorkflowDag,
    parent: Option<TaskCode>,
    completed: &HashMap<TaskCode, TaskInstance>,
    skip: &mut HashSet<TaskCode>,
) -> Vec<TaskCode> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    collect_post_nodes(dag, parent, completed, skip, &mut visited, &mut out);
    out
}

fn collect_post_nodes(
    dag: &WorkflowDag,
    parent: Option<TaskCode>,
    completed: &HashMap<TaskCode, TaskInstance>,
    skip: &mut HashSet<TaskCode>,
    visited: &mut HashSet<TaskCode>,
    out: &mut Vec<TaskCode>,
) {
    let candidates: Vec<TaskCode> = match parent {
        None => dag.begin_nodes().to_vec(),
        Some(parent) => {
            let successors = dag.successors(parent).to_vec();
            match completed.get(&parent).and_then(chosen_branch) {
                Some(chosen) => {
                    for s in successors.iter().filter(|s| !chosen.contains(s)) {
                        mark_skipped(dag, *s, skip);
                    }
                    successors
                        .into_iter()
                        .filter(|s| chosen.contains(s))
                        .collect()
                }
                None => successors,
            }
        }
    };

    for code in candidates {
        if skip.contains(&code) {
            continue;
        }
        let preds = dag.predecessors(code);
        if !preds.is_empty() && preds.iter().all(|p| skip.contains(p)) {
            mark_skipped(dag, code, skip);
            continue;
        }
        if !visited.insert(code) {
            continue;
        }
        if dag.is_forbidden(code) || completed.contains_key(&code) {
            collect_post_nodes(dag, Some(code), completed, skip, visited, out);
            continue;
        }
        out.push(code);
    }
}

/// Mark `code` skipped, then every successor whose predecessors are all
/// skipped.
pub fn mark_skipped(dag: &WorkflowDag, code: TaskCode, skip: &mut HashSet<TaskCode>) {
    if !skip.insert(code) {
        return;
    }
    debug!(task_code = code, "task marked skipped");
    for &next in dag.successors(code) {
        if dag.predecessors(next).iter().all(|p| skip.contains(p)) {
            mark_skipped(dag, next, skip);
        }
    }
}
