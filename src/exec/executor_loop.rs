// src/exec/executor_loop.rs

//! Main executor loop of the local shell worker.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::EventNotifier;
use crate::model::{TaskInstance, TaskInstanceId};
use crate::store::WorkflowRepository;

use super::backend::WorkerRequest;
use super::task_runner::run_task;

/// Internal handle for a currently-running task process.
///
/// - `cancel` is used to request that the process be stopped (kill requests
///   from the engine).
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`LocalShellDispatcher`](super::backend::LocalShellDispatcher)
/// forwards requests to. Each task attempt runs in its own Tokio task, and
/// **per task instance id there is never more than one process running at
/// the same time**: a second `Run` for an id whose process is still alive is
/// ignored, unless that process is being killed, in which case the new
/// attempt starts once it exited.
pub fn spawn_executor(
    repository: Arc<dyn WorkflowRepository>,
    notifier: EventNotifier,
) -> mpsc::Sender<WorkerRequest> {
    let (tx, mut rx) = mpsc::channel::<WorkerRequest>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<TaskInstanceId, ActiveTask> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, task| !task.handle.is_finished());
            match request {
                WorkerRequest::Run(task) => {
                    handle_run(task, &mut active, &repository, &notifier).await;
                }
                WorkerRequest::Kill(id) => cancel_task(id, &mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

async fn handle_run(
    task: TaskInstance,
    active: &mut HashMap<TaskInstanceId, ActiveTask>,
    repository: &Arc<dyn WorkflowRepository>,
    notifier: &EventNotifier,
) {
    let Some(id) = task.id else {
        debug!(task_code = task.task_code(), "task without id; run request ignored");
        return;
    };
    if let Some(existing) = active.get_mut(&id) {
        if existing.cancel.is_some() {
            debug!(
                task_instance_id = id,
                "task already running; ignoring new run request"
            );
            return;
        }
        // A killed attempt must be gone before the retry starts.
        debug!(task_instance_id = id, "waiting for killed attempt to exit");
        let _ = (&mut existing.handle).await;
        active.remove(&id);
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let repository = Arc::clone(repository);
    let notifier = notifier.clone();

    let handle = tokio::spawn(async move {
        run_task(task, repository, notifier, cancel_rx).await;
        debug!(task_instance_id = id, "task runner future finished");
    });

    active.insert(
        id,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

/// Cancel a running task process.
fn cancel_task(id: TaskInstanceId, active: &mut HashMap<TaskInstanceId, ActiveTask>) {
    let Some(existing) = active.get_mut(&id) else {
        debug!(task_instance_id = id, "kill requested for a task that is not running");
        return;
    };
    info!(task_instance_id = id, "kill requested; cancelling task process");

    if let Some(cancel) = existing.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(
                task_instance_id = id,
                "process already finished while cancelling"
            );
        }
    } else {
        debug!(
            task_instance_id = id,
            "no cancel sender present; process may already have been cancelled"
        );
    }
}
