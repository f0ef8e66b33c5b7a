// src/engine/timeout_wheel.rs

//! Tokio timers feeding TASK_TIMEOUT / PROCESS_TIMEOUT into an instance's
//! own queue.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::TaskInstanceId;

use super::StateEvent;

/// Timers of one execution context.
///
/// Every timer is tied to the current pass; [`TimeoutWheel::reset_pass`]
/// cancels all of them. Task timers are also cancelled individually when the
/// task finishes, so a retry never inherits the previous attempt's timer.
#[derive(Debug)]
pub struct TimeoutWheel {
    events: mpsc::UnboundedSender<StateEvent>,
    parent: CancellationToken,
    pass: CancellationToken,
    tasks: HashMap<TaskInstanceId, CancellationToken>,
}

impl TimeoutWheel {
    pub fn new(events: mpsc::UnboundedSender<StateEvent>, parent: CancellationToken) -> Self {
        let pass = parent.child_token();
        Self {
            events,
            parent,
            pass,
            tasks: HashMap::new(),
        }
    }

    pub fn arm_process(&self, after: Duration) {
        debug!(?after, "arming workflow timeout");
        self.spawn_timer(self.pass.child_token(), after, StateEvent::ProcessTimeout);
    }

    pub fn arm_task(&mut self, task_instance_id: TaskInstanceId, after: Duration) {
        self.disarm_task(task_instance_id);
        debug!(task_instance_id, ?after, "arming task timeout");
        let token = self.pass.child_token();
        self.tasks.insert(task_instance_id, token.clone());
        self.spawn_timer(token, after, StateEvent::TaskTimeout { task_instance_id });
    }

    pub fn disarm_task(&mut self, task_instance_id: TaskInstanceId) {
        if let Some(token) = self.tasks.remove(&task_instance_id) {
            token.cancel();
        }
    }

    /// Cancel every timer of the current pass.
    pub fn reset_pass(&mut self) {
        self.pass.cancel();
        self.tasks.clear();
        self.pass = self.parent.child_token();
    }

    fn spawn_timer(&self, token: CancellationToken, after: Duration, event: StateEvent) {
        let tx = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    let _ = tx.send(event);
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

impl Drop for TimeoutWheel {
    fn drop(&mut self) {
        self.pass.cancel();
    }
}
