// src/exec/logic.rs

//! Master-side branch tasks: CONDITIONS and SWITCH.
//!
//! Both finish synchronously inside `submit`; the branch they choose is read
//! back by the resolver when selecting successors.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::collab::BoxFuture;
use crate::errors::{DagmasterError, Result};
use crate::model::{
    ConditionsParameters, SwitchParameters, TaskCode, TaskInstance, parse_params,
};
use crate::types::TaskExecutionStatus;

use super::processor::{ProcessOutcome, ProcessorEnv, TaskProcessor};

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").ok());

/// Evaluates dependence items against the states of completed tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionsTaskProcessor;

impl TaskProcessor for ConditionsTaskProcessor {
    fn submit<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            let params: ConditionsParameters = parse_params(&task.definition)?;
            let passed = evaluate_conditions(&params, &env.view.completed);
            let state = if passed {
                TaskExecutionStatus::Success
            } else {
                TaskExecutionStatus::Failure
            };
            info!(
                task_code = task.task_code(),
                passed,
                "conditions evaluated"
            );
            task.start_time = Some(Utc::now());
            task.finish(state, Utc::now());
            Ok(ProcessOutcome::Finished)
        })
    }

    fn on_state_change<'a>(
        &'a self,
        _task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async { Ok(ProcessOutcome::Finished) })
    }

    fn stop<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            task.finish(TaskExecutionStatus::Kill, Utc::now());
            Ok(ProcessOutcome::Finished)
        })
    }
}

/// An item whose task has not completed counts as false.
pub fn evaluate_conditions(
    params: &ConditionsParameters,
    completed: &HashMap<TaskCode, TaskExecutionStatus>,
) -> bool {
    params.relation.combine(params.items.iter().map(|item| {
        completed
            .get(&item.task_code)
            .is_some_and(|state| item.matches(*state))
    }))
}

/// Picks the next node from ordered case expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwitchTaskProcessor;

impl TaskProcessor for SwitchTaskProcessor {
    fn submit<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            let params: SwitchParameters = parse_params(&task.definition)?;
            let vars = switch_variables(task, env);
            task.start_time = Some(Utc::now());

            match choose_switch_branch(&params, &vars) {
                Ok(next) => {
                    info!(task_code = task.task_code(), next, "switch branch chosen");
                    task.switch_next = Some(next);
                    task.finish(TaskExecutionStatus::Success, Utc::now());
                }
                Err(err) => {
                    warn!(task_code = task.task_code(), error = %err, "switch evaluation failed");
                    task.finish(TaskExecutionStatus::Failure, Utc::now());
                }
            }
            Ok(ProcessOutcome::Finished)
        })
    }

    fn on_state_change<'a>(
        &'a self,
        _task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async { Ok(ProcessOutcome::Finished) })
    }

    fn stop<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            task.finish(TaskExecutionStatus::Kill, Utc::now());
            Ok(ProcessOutcome::Finished)
        })
    }
}

/// Global params, then the instance var pool, then the task's input pool;
/// later sources win.
fn switch_variables(task: &TaskInstance, env: &ProcessorEnv) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = env.view.global_params.clone().into_iter().collect();
    for prop in env.view.var_pool.iter().chain(task.var_pool.iter()) {
        vars.insert(prop.name.clone(), prop.value.clone());
    }
    vars
}

/// First case whose condition holds, else the default node.
pub fn choose_switch_branch(
    params: &SwitchParameters,
    vars: &HashMap<String, String>,
) -> Result<TaskCode> {
    for case in &params.cases {
        let expr = substitute(&case.condition, vars);
        match evaluate_expression(&expr) {
            Ok(true) => return Ok(case.next_node),
            Ok(false) => {}
            Err(msg) => {
                debug!(condition = %case.condition, error = %msg, "switch case not evaluable");
            }
        }
    }
    params.default_node.ok_or_else(|| {
        DagmasterError::InvalidCommand("no switch case matched and no default node".to_string())
    })
}

/// Replace `${name}` placeholders; unknown names are left as they are.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        vars.get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Evaluate `a || b && c` style boolean expressions over comparisons
/// (`== != > >= < <=`). Operands compare numerically when both parse as
/// numbers, else as strings with surrounding quotes removed.
pub fn evaluate_expression(expr: &str) -> std::result::Result<bool, String> {
    for disjunct in expr.split("||") {
        let mut all = true;
        for atom in disjunct.split("&&") {
            if !evaluate_comparison(atom)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

const OPERATORS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];

fn evaluate_comparison(atom: &str) -> std::result::Result<bool, String> {
    let atom = atom.trim();
    for op in OPERATORS {
        let Some(pos) = atom.find(op) else { continue };
        let left = unquote(&atom[..pos]);
        let right = unquote(&atom[pos + op.len()..]);
        let ordering = match (left.parse::<f64>(), right.parse::<f64>()) {
            (Ok(l), Ok(r)) => l.partial_cmp(&r).ok_or_else(|| format!("cannot compare {atom}"))?,
            _ => left.cmp(right),
        };
        return Ok(match op {
            "==" => ordering == Ordering::Equal,
            "!=" => ordering != Ordering::Equal,
            ">" => ordering == Ordering::Greater,
            ">=" => ordering != Ordering::Less,
            "<" => ordering == Ordering::Less,
            _ => ordering != Ordering::Greater,
        });
    }
    match atom.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("not a comparison: {atom}")),
    }
}

fn unquote(raw: &str) -> &str {
    let s = raw.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
