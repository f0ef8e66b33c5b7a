// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{EngineConfig, RawWorkflowFile, WorkflowFile};
use crate::errors::{DagmasterError, Result};

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = DagmasterError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_workflow(&raw)?;
        Ok(WorkflowFile::new_unchecked(raw))
    }
}

/// Check the invariants a workflow file must hold before it is turned into a
/// definition.
pub fn validate_workflow(cfg: &RawWorkflowFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_task_codes(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    validate_durations(cfg)?;
    Ok(())
}

/// Sanity checks on `[engine]`.
pub fn validate_engine(cfg: &EngineConfig) -> Result<()> {
    if cfg.exec_threads == 0 {
        return Err(DagmasterError::ConfigError(
            "[engine].exec_threads must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.max_live_instances == Some(0) {
        return Err(DagmasterError::ConfigError(
            "[engine].max_live_instances must be >= 1 when set".to_string(),
        ));
    }
    if cfg.state_check_interval_ms == 0 || cfg.event_retry_interval_ms == 0 {
        return Err(DagmasterError::ConfigError(
            "[engine] intervals must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(DagmasterError::ConfigError(
            "workflow must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_codes(cfg: &RawWorkflowFile) -> Result<()> {
    let mut seen: HashMap<i64, &str> = HashMap::new();
    for (name, task) in cfg.task.iter() {
        if let Some(other) = seen.insert(task.code, name.as_str()) {
            return Err(DagmasterError::ConfigError(format!(
                "tasks '{}' and '{}' share code {}",
                other, name, task.code
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawWorkflowFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(DagmasterError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(DagmasterError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawWorkflowFile) -> Result<()> {
    // Edge direction: dep -> task, so `after = ["A"]` on B adds A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(DagmasterError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}

/// Upper bound for any duration in a workflow file: ten years, in seconds.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn validate_durations(cfg: &RawWorkflowFile) -> Result<()> {
    let check = |what: String, secs: u64| {
        if secs > MAX_DURATION_SECS {
            Err(DagmasterError::ConfigError(format!(
                "{what} is {secs}s; the maximum is {MAX_DURATION_SECS}s"
            )))
        } else {
            Ok(())
        }
    };
    if let Some(timeout) = &cfg.workflow.timeout {
        check("[workflow].timeout".to_string(), timeout.seconds)?;
    }
    for (name, task) in cfg.task.iter() {
        check(format!("task '{name}' retry_interval"), task.retry_interval)?;
        check(format!("task '{name}' delay"), task.delay)?;
        if let Some(timeout) = &task.timeout {
            check(format!("task '{name}' timeout"), timeout.seconds)?;
        }
    }
    Ok(())
}
