// src/exec/task_runner.rs

//! Individual task process runner of the local shell worker.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::engine::{EventNotifier, StateEvent};
use crate::errors::Result;
use crate::model::{Property, ShellParameters, TaskInstance, parse_params};
use crate::store::WorkflowRepository;
use crate::types::TaskExecutionStatus;

use super::logic::substitute;

/// `${setValue(name=value)}` lines on stdout publish output variables.
static SET_VALUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{setValue\((\w+)=(.*)\)\}").ok());

const HOST: &str = "localhost";

/// Output variable set by one stdout line, if any.
pub fn parse_set_value(line: &str) -> Option<Property> {
    let caps = SET_VALUE.as_ref()?.captures(line)?;
    Some(Property::output(&caps[1], caps[2].trim()))
}

/// Run one task attempt and report every state it reaches.
///
/// - If the cancel channel fires (kill request), the child process is killed
///   and KILL is recorded only if the row still belongs to this running
///   attempt. A row the engine already finished (e.g. after a timeout) is
///   left as it is.
pub async fn run_task(
    task: TaskInstance,
    repository: Arc<dyn WorkflowRepository>,
    notifier: EventNotifier,
    cancel_rx: oneshot::Receiver<()>,
) {
    let code = task.task_code();
    let mut failed = task.clone();
    if let Err(err) = run_task_inner(task, &repository, &notifier, cancel_rx).await {
        error!(task_code = code, error = %err, "task execution error");
        failed.finish(TaskExecutionStatus::Failure, Utc::now());
        report(failed, &repository, &notifier).await;
    }
}

async fn run_task_inner(
    mut task: TaskInstance,
    repository: &Arc<dyn WorkflowRepository>,
    notifier: &EventNotifier,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    if task.definition.delay_time > 0 {
        task.state = TaskExecutionStatus::DelayExecution;
        task = repository.save_task_instance(task).await?;
        let delay = Duration::from_secs(task.definition.delay_time);
        debug!(task_code = task.task_code(), ?delay, "delaying task start");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut cancel_rx => {
                record_kill(task, repository, notifier).await;
                return Ok(());
            }
        }
    }

    let params: ShellParameters = parse_params(&task.definition)?;
    let vars: HashMap<String, String> = task
        .var_pool
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
    let script = substitute(&params.command, &vars);

    task.state = TaskExecutionStatus::RunningExecution;
    task.start_time = Some(Utc::now());
    task.host = Some(HOST.to_string());
    task = repository.save_task_instance(task).await?;
    notify(&task, notifier);

    info!(
        task_code = task.task_code(),
        task_instance_id = ?task.id,
        cmd = %script,
        "starting task process"
    );

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task {}", task.task_code()))?;

    let stdout_reader = child.stdout.take().map(|stdout| {
        tokio::spawn(async move {
            let mut outputs = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_set_value(&line) {
                    Some(prop) => outputs.push(prop),
                    None => debug!("stdout: {}", line),
                }
            }
            outputs
        })
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let code = task.task_code();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task_code = code, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of task {}", task.task_code()))?;
            let exit_code = status.code().unwrap_or(-1);
            info!(
                task_code = task.task_code(),
                task_instance_id = ?task.id,
                exit_code,
                success = status.success(),
                "task process exited"
            );

            let outputs = match stdout_reader {
                Some(reader) => reader.await.unwrap_or_default(),
                None => Vec::new(),
            };
            task.var_pool.retain(|p| !outputs.iter().any(|o| o.name == p.name));
            task.var_pool.extend(outputs);

            let state = if status.success() {
                TaskExecutionStatus::Success
            } else {
                TaskExecutionStatus::Failure
            };
            task.finish(state, Utc::now());
            report(task, repository, notifier).await;
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(
                        task_code = task.task_code(),
                        task_instance_id = ?task.id,
                        "cancellation requested; killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(
                            task_code = task.task_code(),
                            error = %e,
                            "failed to kill child process on cancellation"
                        );
                    }
                    record_kill(task, repository, notifier).await;
                }
                Err(e) => {
                    debug!(
                        task_code = task.task_code(),
                        error = %e,
                        "cancel channel closed without explicit cancellation"
                    );
                    // Child will be killed on drop due to kill_on_drop(true).
                }
            }
        }
    }

    Ok(())
}

async fn record_kill(
    mut task: TaskInstance,
    repository: &Arc<dyn WorkflowRepository>,
    notifier: &EventNotifier,
) {
    let Some(id) = task.id else {
        return;
    };
    match repository.find_task_instance(id).await {
        Ok(current) if current.state.is_running() && current.retry_times == task.retry_times => {
            task.finish(TaskExecutionStatus::Kill, Utc::now());
            report(task, repository, notifier).await;
        }
        Ok(current) => {
            debug!(task_instance_id = id, state = ?current.state, "row already moved on; kill not recorded");
        }
        Err(err) => warn!(task_instance_id = id, error = %err, "reloading killed task failed"),
    }
}

/// Persist a finished attempt and tell the owning instance.
async fn report(
    task: TaskInstance,
    repository: &Arc<dyn WorkflowRepository>,
    notifier: &EventNotifier,
) {
    match repository.save_task_instance(task).await {
        Ok(saved) => notify(&saved, notifier),
        Err(err) => warn!(error = %err, "persisting task result failed"),
    }
}

fn notify(task: &TaskInstance, notifier: &EventNotifier) {
    if let Some(task_instance_id) = task.id {
        notifier.notify(
            task.workflow_instance_id,
            StateEvent::TaskStateChange { task_instance_id },
        );
    }
}
