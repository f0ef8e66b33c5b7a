// src/collab.rs

//! External collaborators injected into the engine, plus the small
//! synchronous ones the crate ships.
//!
//! The repository and the dispatch client live in [`crate::store`] and
//! [`crate::exec::backend`]; this module bundles them with cron expansion,
//! resource probing and alerting into [`Collaborators`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::exec::backend::DispatchClient;
use crate::model::{InstanceId, TaskCode, TaskInstanceId};
use crate::store::WorkflowRepository;
use crate::types::{TimeoutStrategy, WorkflowState};

/// Boxed future returned by async collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Expands a backfill range into ordered fire dates.
pub trait CronExpander: Send + Sync {
    fn expand(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        schedules: &[String],
    ) -> Vec<DateTime<Utc>>;
}

/// One fire date per day at midnight, both ends inclusive. Schedules are
/// ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct DailyCronExpander;

impl CronExpander for DailyCronExpander {
    fn expand(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _schedules: &[String],
    ) -> Vec<DateTime<Utc>> {
        let mut dates = Vec::new();
        let Some(mut day) = start.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc()) else {
            return dates;
        };
        if day < start {
            day += Duration::days(1);
        }
        while day <= end {
            dates.push(day);
            day += Duration::days(1);
        }
        dates
    }
}

/// Admission gate for new dispatches.
pub trait ResourceProbe: Send + Sync {
    fn is_under_pressure(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPressure;

impl ResourceProbe for NoPressure {
    fn is_under_pressure(&self) -> bool {
        false
    }
}

/// Probe whose reading is toggled by the caller.
#[derive(Debug, Default)]
pub struct PressureFlag(AtomicBool);

impl PressureFlag {
    pub fn new(under_pressure: bool) -> Self {
        Self(AtomicBool::new(under_pressure))
    }

    pub fn set(&self, under_pressure: bool) {
        self.0.store(under_pressure, Ordering::SeqCst);
    }
}

impl ResourceProbe for PressureFlag {
    fn is_under_pressure(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Alert raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    TaskTimeout {
        instance_id: InstanceId,
        task_instance_id: TaskInstanceId,
        task_code: TaskCode,
        strategy: TimeoutStrategy,
    },
    ProcessTimeout {
        instance_id: InstanceId,
        strategy: TimeoutStrategy,
    },
    InstanceFinished {
        instance_id: InstanceId,
        name: String,
        state: WorkflowState,
        schedule_time: Option<DateTime<Utc>>,
    },
}

pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: Alert) {
        match alert {
            Alert::TaskTimeout {
                instance_id,
                task_instance_id,
                task_code,
                strategy,
            } => warn!(
                instance_id,
                task_instance_id,
                task_code,
                ?strategy,
                "task timed out"
            ),
            Alert::ProcessTimeout {
                instance_id,
                strategy,
            } => warn!(instance_id, ?strategy, "workflow instance timed out"),
            Alert::InstanceFinished {
                instance_id,
                name,
                state,
                schedule_time,
            } => info!(
                instance_id,
                workflow = %name,
                %state,
                ?schedule_time,
                "workflow instance finished"
            ),
        }
    }
}

/// Everything an execution context talks to outside itself.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn WorkflowRepository>,
    pub dispatcher: Arc<dyn DispatchClient>,
    pub cron: Arc<dyn CronExpander>,
    pub probe: Arc<dyn ResourceProbe>,
    pub alerts: Arc<dyn AlertSink>,
}

impl Collaborators {
    /// Bundle with the default cron expander, probe and alert sink.
    pub fn new(repository: Arc<dyn WorkflowRepository>, dispatcher: Arc<dyn DispatchClient>) -> Self {
        Self {
            repository,
            dispatcher,
            cron: Arc::new(DailyCronExpander),
            probe: Arc::new(NoPressure),
            alerts: Arc::new(TracingAlertSink),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_cron(mut self, cron: Arc<dyn CronExpander>) -> Self {
        self.cron = cron;
        self
    }
}
