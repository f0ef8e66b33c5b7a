use std::sync::Mutex;

use dagmaster::collab::{Alert, AlertSink};

/// Alert sink that keeps every alert for later assertions.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    /// States of every `InstanceFinished` alert, in order.
    pub fn finished_states(&self) -> Vec<dagmaster::types::WorkflowState> {
        self.alerts()
            .into_iter()
            .filter_map(|a| match a {
                Alert::InstanceFinished { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl AlertSink for RecordingAlertSink {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}
