// src/engine/context.rs

//! Execution context of one workflow instance.
//!
//! The context owns the per-pass DAG and every map the engine keeps about
//! task instances. It is only ever touched by the actor that drives it (see
//! [`super::runner`]), so none of its state is shared.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::dag::{DependResult, StartNodes, WorkflowDag, post_nodes, resolve, varpool};
use crate::errors::{DagmasterError, Result};
use crate::exec::processor::{ProcessOutcome, ProcessorEnv, ProcessorRegistry};
use crate::model::{
    Direct, InstanceId, Property, TaskCode, TaskInstance, TaskInstanceId, TimeoutPolicy,
    WorkflowDefinition, WorkflowInstance,
};
use crate::types::{CommandType, FailureStrategy, Priority, TaskExecutionStatus, WorkflowState};

use super::aggregator::{AggregateInput, aggregate};
use super::events::EventQueue;
use super::pool::InstancePool;
use super::standby::StandbyQueue;
use super::timeout_wheel::TimeoutWheel;
use super::StateEvent;

/// Read-only snapshot of a context handed to task processors.
#[derive(Debug, Clone, Default)]
pub struct ExecutionView {
    pub instance_id: InstanceId,
    pub schedule_time: Option<DateTime<Utc>>,
    pub failure_strategy: FailureStrategy,
    pub priority: Priority,
    pub global_params: BTreeMap<String, String>,
    /// Workflow instance var pool.
    pub var_pool: Vec<Property>,
    /// Last recorded state per completed task code.
    pub completed: HashMap<TaskCode, TaskExecutionStatus>,
}

/// Everything a context needs from the pool that spawned it.
pub(crate) struct ContextDeps {
    pub collab: Collaborators,
    pub pool: InstancePool,
    pub processors: Arc<ProcessorRegistry>,
    pub config: EngineConfig,
    pub events_tx: mpsc::UnboundedSender<StateEvent>,
    pub state_tx: watch::Sender<WorkflowState>,
    pub shutdown: CancellationToken,
}

pub struct ExecutionContext {
    pub(crate) instance: WorkflowInstance,
    pub(crate) definition: WorkflowDefinition,
    pub(crate) dag: WorkflowDag,
    pub(crate) completed: HashMap<TaskCode, TaskInstance>,
    pub(crate) active: HashMap<TaskInstanceId, TaskInstance>,
    pub(crate) standby: StandbyQueue,
    pub(crate) errors: HashMap<TaskCode, TaskInstance>,
    pub(crate) depend_failed: HashMap<TaskCode, TaskInstance>,
    pub(crate) skip_nodes: HashSet<TaskCode>,
    pub(crate) events: EventQueue,
    /// Tasks that finished outside an event, waiting for the finish protocol.
    pub(crate) pending_finished: VecDeque<TaskInstance>,
    pub(crate) task_failed_submit: bool,
    pub(crate) timed_out: bool,
    pub(crate) exited: bool,
    pub(crate) collab: Collaborators,
    pub(crate) pool: InstancePool,
    pub(crate) processors: Arc<ProcessorRegistry>,
    pub(crate) config: EngineConfig,
    pub(crate) timeouts: TimeoutWheel,
    pub(crate) shutdown: CancellationToken,
    state_tx: watch::Sender<WorkflowState>,
}

impl ExecutionContext {
    /// Load the instance row and its definition.
    pub(crate) async fn load(instance_id: InstanceId, deps: ContextDeps) -> Result<Self> {
        let instance = deps
            .collab
            .repository
            .find_workflow_instance(instance_id)
            .await?;
        let definition = deps
            .collab
            .repository
            .find_workflow_definition(instance.definition_code, Some(instance.definition_version))
            .await?;

        Ok(Self {
            instance,
            definition,
            dag: WorkflowDag::default(),
            completed: HashMap::new(),
            active: HashMap::new(),
            standby: StandbyQueue::new(),
            errors: HashMap::new(),
            depend_failed: HashMap::new(),
            skip_nodes: HashSet::new(),
            events: EventQueue::new(),
            pending_finished: VecDeque::new(),
            task_failed_submit: false,
            timed_out: false,
            exited: false,
            timeouts: TimeoutWheel::new(deps.events_tx, deps.shutdown.clone()),
            collab: deps.collab,
            pool: deps.pool,
            processors: deps.processors,
            config: deps.config,
            shutdown: deps.shutdown,
            state_tx: deps.state_tx,
        })
    }

    pub fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    pub fn state(&self) -> WorkflowState {
        self.instance.state
    }

    /// Reset the per-pass maps, rebuild the DAG and submit the begin nodes.
    pub(crate) async fn prepare_pass(&mut self) -> Result<()> {
        self.completed.clear();
        self.active.clear();
        self.standby.clear();
        self.errors.clear();
        self.depend_failed.clear();
        self.skip_nodes.clear();
        self.pending_finished.clear();
        self.task_failed_submit = false;
        self.timed_out = false;
        self.timeouts.reset_pass();

        if let Some(date) = self.instance.backfill.as_ref().and_then(|p| p.current()) {
            self.instance.schedule_time = Some(date);
        }

        let start = self.start_nodes().await?;
        self.dag = WorkflowDag::build(
            &self.definition.tasks,
            &self.definition.relations,
            start.as_ref(),
        )?;
        self.load_recovered_tasks().await?;

        let now = Utc::now();
        self.instance.state = WorkflowState::Running;
        self.instance.start_time.get_or_insert(now);
        self.instance.end_time = None;
        self.persist_instance().await;
        self.publish(WorkflowState::Running);

        info!(
            instance_id = self.instance.id,
            workflow = %self.instance.name,
            tasks = self.dag.len(),
            schedule_time = ?self.instance.schedule_time,
            command = ?self.instance.command_type,
            "starting workflow pass"
        );

        if let Some(after) = self.instance.timeout.as_ref().and_then(TimeoutPolicy::duration) {
            self.timeouts.arm_process(after);
        }

        self.submit_post_nodes(None);
        self.submit_standby().await;
        self.update_state().await;
        Ok(())
    }

    /// A pass that could not be prepared ends in FAILURE through the normal
    /// end-of-pass path.
    pub(crate) fn fail_pass(&mut self, err: &DagmasterError) {
        error!(instance_id = self.instance.id, error = %err, "preparing workflow pass failed");
        self.instance.state = WorkflowState::Failure;
        self.events.push(StateEvent::ProcessStateChange {
            new_state: WorkflowState::Failure,
        });
    }

    /// Start-node selection from the instance's command parameters.
    async fn start_nodes(&self) -> Result<Option<StartNodes>> {
        let params = &self.instance.command_params;
        let depend_type = params.task_depend_type()?;

        let recovery_ids = params.recovery_start_node_ids()?;
        if !recovery_ids.is_empty() {
            let mut nodes = Vec::new();
            for id in recovery_ids {
                let task = self.collab.repository.find_task_instance(id).await?;
                if !nodes.contains(&task.task_code()) {
                    nodes.push(task.task_code());
                }
            }
            return Ok(Some(StartNodes { nodes, depend_type }));
        }

        let start_ids = params.start_node_ids()?;
        if !start_ids.is_empty() {
            return Ok(Some(StartNodes {
                nodes: start_ids,
                depend_type,
            }));
        }
        Ok(None)
    }

    /// Load the valid task rows of a resumed instance into the pass.
    async fn load_recovered_tasks(&mut self) -> Result<()> {
        if !self.instance.command_type.resumes_existing() {
            return Ok(());
        }
        let tolerance = self.instance.command_type == CommandType::RecoverToleranceFault;
        let rows = self
            .collab
            .repository
            .find_task_instances(self.instance.id)
            .await?;

        for mut task in rows.into_iter().filter(|t| t.valid) {
            let code = task.task_code();
            if !self.dag.contains(code) {
                continue;
            }
            if tolerance && task.state == TaskExecutionStatus::NeedFaultTolerance {
                let mut clone = TaskInstance::new(
                    self.instance.id,
                    self.instance.priority,
                    task.definition.clone(),
                );
                clone.var_pool = task.var_pool.clone();
                clone.first_run = false;
                task.valid = false;
                self.persist_task(&task).await;
                debug!(task_code = code, "fault-tolerant task cloned into standby");
                self.standby.push(clone);
            } else if task.state.is_finished() {
                if task.state.is_failure() {
                    self.errors.insert(code, task.clone());
                }
                self.completed.insert(code, task);
            } else if let Some(id) = task.id {
                debug!(task_code = code, task_instance_id = id, "re-attaching running task");
                self.active.insert(id, task);
            }
        }
        Ok(())
    }

    /// Queue the successors of `parent` (or the begin nodes) into standby.
    pub(crate) fn submit_post_nodes(&mut self, parent: Option<TaskCode>) {
        let codes = post_nodes(&self.dag, parent, &self.completed, &mut self.skip_nodes);
        for code in codes {
            if self.standby.contains_code(code)
                || self.is_code_active(code)
                || self.completed.contains_key(&code)
                || self.depend_failed.contains_key(&code)
            {
                continue;
            }
            let Some(definition) = self.dag.definition(code) else {
                continue;
            };
            let task = TaskInstance::new(
                self.instance.id,
                self.instance.priority,
                definition.clone(),
            );
            debug!(instance_id = self.instance.id, task_code = code, "task added to standby");
            self.standby.push(task);
        }
    }

    pub(crate) fn is_code_active(&self, code: TaskCode) -> bool {
        self.active.values().any(|t| t.task_code() == code)
    }

    fn has_failed_task(&self) -> bool {
        self.task_failed_submit
            || self.timed_out
            || !self.errors.is_empty()
            || !self.depend_failed.is_empty()
    }

    /// Under END a recorded failure stops any new dispatch.
    fn dispatch_blocked(&self) -> bool {
        self.instance.failure_strategy == FailureStrategy::End && self.has_failed_task()
    }

    /// Input var pool of a task on its first run.
    fn input_pool(&self, code: TaskCode) -> Vec<Property> {
        if self.dag.is_begin(code) {
            return self
                .instance
                .var_pool
                .iter()
                .map(|p| Property {
                    direct: Direct::In,
                    ..p.clone()
                })
                .collect();
        }
        let preds = self.dag.effective_predecessors(code);
        varpool::merge_predecessor_pools(preds.iter().filter_map(|p| self.completed.get(p)))
    }

    /// One pass over standby: dispatch what is ready, drop what never can be.
    pub(crate) async fn submit_standby(&mut self) {
        let now = Utc::now();
        for seq in self.standby.ordered() {
            if self.dispatch_blocked() {
                debug!(instance_id = self.instance.id, "dispatch blocked by recorded failure");
                break;
            }
            let Some(task) = self.standby.get(seq) else {
                continue;
            };
            let code = task.task_code();
            if task.state == TaskExecutionStatus::Failure && !task.retry_interval_elapsed(now) {
                continue;
            }
            if task.first_run {
                let pool = self.input_pool(code);
                if let Some(task) = self.standby.get_mut(seq) {
                    task.var_pool = pool;
                }
            }

            match resolve(&self.dag, code, &self.completed, &self.skip_nodes) {
                DependResult::Ready => {
                    if self.is_code_active(code) {
                        continue;
                    }
                    let hold = if self.instance.state.is_ready_pause() {
                        Some(TaskExecutionStatus::Pause)
                    } else if self.instance.state.is_ready_stop() {
                        Some(TaskExecutionStatus::Kill)
                    } else {
                        None
                    };
                    if let Some(state) = hold {
                        if let Some(task) = self.standby.remove(seq) {
                            self.record_without_running(task, state).await;
                        }
                        continue;
                    }
                    if self.collab.probe.is_under_pressure() {
                        debug!(
                            instance_id = self.instance.id,
                            task_code = code,
                            "admission refused; task stays in standby"
                        );
                        break;
                    }
                    if let Some(task) = self.standby.remove(seq) {
                        self.submit_task(task).await;
                    }
                }
                DependResult::Failed => {
                    if let Some(task) = self.standby.remove(seq) {
                        warn!(
                            instance_id = self.instance.id,
                            task_code = code,
                            "dependency failed; task will not run"
                        );
                        self.depend_failed.insert(code, task);
                        if self.instance.failure_strategy == FailureStrategy::End {
                            self.kill_all().await;
                        }
                    }
                }
                DependResult::NonExec => {
                    self.standby.remove(seq);
                    info!(
                        instance_id = self.instance.id,
                        task_code = code,
                        "predecessor paused or stopped; task dropped"
                    );
                }
                DependResult::Waiting => {}
            }
        }
    }

    /// Record a ready task as paused or killed without dispatching it.
    async fn record_without_running(&mut self, mut task: TaskInstance, state: TaskExecutionStatus) {
        info!(
            instance_id = self.instance.id,
            task_code = task.task_code(),
            ?state,
            "task held back by pending pause/stop"
        );
        task.finish(state, Utc::now());
        match self.collab.repository.save_task_instance(task.clone()).await {
            Ok(saved) => task = saved,
            Err(err) => warn!(
                instance_id = self.instance.id,
                task_code = task.task_code(),
                error = %err,
                "persisting held task failed"
            ),
        }
        self.pending_finished.push_back(task);
    }

    /// Persist and dispatch one task through its processor.
    pub(crate) async fn submit_task(&mut self, mut task: TaskInstance) {
        let now = Utc::now();
        let code = task.task_code();
        if task.state == TaskExecutionStatus::Failure {
            task.retry_times += 1;
        }
        task.state = TaskExecutionStatus::SubmittedSuccess;
        task.submit_time = Some(now);
        task.start_time = None;
        task.end_time = None;
        task.host = None;

        let mut attempts = 0;
        let mut task = loop {
            match self.collab.repository.save_task_instance(task.clone()).await {
                Ok(saved) => break saved,
                Err(err) => {
                    attempts += 1;
                    if attempts > self.config.submit_retry_times {
                        let exhausted = DagmasterError::SubmitExhausted {
                            task_code: code,
                            attempts,
                        };
                        error!(
                            instance_id = self.instance.id,
                            task_code = code,
                            error = %exhausted,
                            last_error = %err,
                            "task submission failed"
                        );
                        self.task_failed_submit = true;
                        task.finish(TaskExecutionStatus::Failure, Utc::now());
                        self.errors.insert(code, task.clone());
                        self.completed.insert(code, task);
                        if self.instance.failure_strategy == FailureStrategy::End {
                            self.kill_all().await;
                        }
                        return;
                    }
                    warn!(
                        instance_id = self.instance.id,
                        task_code = code,
                        attempt = attempts,
                        error = %err,
                        "persisting task failed; retrying"
                    );
                    tokio::time::sleep(self.config.submit_retry_interval()).await;
                }
            }
        };

        let processor = self.processors.get(task.task_type());
        let env = self.processor_env();
        match processor.submit(&mut task, &env).await {
            Ok(ProcessOutcome::Running) => {
                let Some(id) = task.id else {
                    return;
                };
                info!(
                    instance_id = self.instance.id,
                    task_code = code,
                    task_instance_id = id,
                    retry_times = task.retry_times,
                    "task submitted"
                );
                if let Some(after) = task.definition.timeout.as_ref().and_then(TimeoutPolicy::duration) {
                    self.timeouts.arm_task(id, after);
                }
                self.active.insert(id, task);
            }
            Ok(ProcessOutcome::Finished) => {
                self.persist_task(&task).await;
                self.pending_finished.push_back(task);
            }
            Err(err) => {
                warn!(
                    instance_id = self.instance.id,
                    task_code = code,
                    error = %err,
                    "task submission rejected"
                );
                task.finish(TaskExecutionStatus::Failure, Utc::now());
                self.persist_task(&task).await;
                self.pending_finished.push_back(task);
            }
        }
    }

    /// Run the finish protocol for everything finished outside an event.
    pub(crate) async fn settle(&mut self) {
        while let Some(task) = self.pending_finished.pop_front() {
            self.task_finished(task).await;
        }
    }

    /// Finish protocol for a task that reached a finished state.
    pub(crate) async fn task_finished(&mut self, task: TaskInstance) {
        let code = task.task_code();
        if let Some(id) = task.id {
            self.active.remove(&id);
            self.timeouts.disarm_task(id);
        }

        info!(
            instance_id = self.instance.id,
            task_code = code,
            task_instance_id = ?task.id,
            state = ?task.state,
            "task finished"
        );

        if task.state.is_failure() && task.can_retry() && !self.instance.state.is_ready_stop() {
            let mut retry = task;
            retry.first_run = false;
            info!(
                instance_id = self.instance.id,
                task_code = code,
                retry_times = retry.retry_times,
                max_retry_times = retry.definition.max_retry_times,
                "task will be retried"
            );
            self.standby.push(retry);
            self.update_state().await;
            return;
        }

        self.completed.insert(code, task.clone());

        if task.state.is_success() {
            varpool::merge_into(&mut self.instance.var_pool, task.output_vars());
            self.persist_instance().await;
            self.submit_post_nodes(Some(code));
        } else if task.state.is_failure() {
            if task.task_type().is_conditions() || self.dag.has_conditions_after(code) {
                self.submit_post_nodes(Some(code));
            } else {
                self.errors.insert(code, task);
                if self.instance.failure_strategy == FailureStrategy::End {
                    self.kill_all().await;
                }
            }
        } else {
            self.submit_post_nodes(Some(code));
        }

        self.submit_standby().await;
        self.update_state().await;
    }

    /// A task in the error map was forced to success from outside.
    pub(crate) async fn force_success(&mut self, task: TaskInstance) {
        let code = task.task_code();
        info!(instance_id = self.instance.id, task_code = code, "task forced to success");
        self.errors.remove(&code);
        self.completed.insert(code, task);
        self.submit_post_nodes(Some(code));
        self.submit_standby().await;
        self.update_state().await;
    }

    /// Ask every active task to stop.
    pub(crate) async fn kill_all(&mut self) {
        let ids: Vec<TaskInstanceId> = self.active.keys().copied().collect();
        if !ids.is_empty() {
            info!(instance_id = self.instance.id, count = ids.len(), "stopping active tasks");
        }
        for id in ids {
            let Some(mut task) = self.active.get(&id).cloned() else {
                continue;
            };
            if task.state.is_finished() {
                continue;
            }
            let processor = self.processors.get(task.task_type());
            let env = self.processor_env();
            match processor.stop(&mut task, &env).await {
                Ok(ProcessOutcome::Running) => {
                    self.active.insert(id, task);
                }
                Ok(ProcessOutcome::Finished) => {
                    self.persist_task(&task).await;
                    self.active.insert(id, task.clone());
                    self.pending_finished.push_back(task);
                }
                Err(err) => {
                    warn!(instance_id = self.instance.id, task_instance_id = id, error = %err, "stopping task failed");
                }
            }
        }
    }

    /// Forward a pause to every active task.
    pub(crate) async fn pause_all(&mut self) {
        let ids: Vec<TaskInstanceId> = self.active.keys().copied().collect();
        for id in ids {
            let Some(mut task) = self.active.get(&id).cloned() else {
                continue;
            };
            let processor = self.processors.get(task.task_type());
            let env = self.processor_env();
            match processor.pause(&mut task, &env).await {
                Ok(ProcessOutcome::Running) => {
                    self.active.insert(id, task);
                }
                Ok(ProcessOutcome::Finished) => {
                    self.persist_task(&task).await;
                    self.pending_finished.push_back(task);
                }
                Err(err) => {
                    warn!(instance_id = self.instance.id, task_instance_id = id, error = %err, "pausing task failed");
                }
            }
        }
    }

    /// Re-check polling processors (dependent, sub-workflow).
    pub(crate) async fn poll_active(&mut self) {
        let ids: Vec<TaskInstanceId> = self.active.keys().copied().collect();
        for id in ids {
            let Some(mut task) = self.active.get(&id).cloned() else {
                continue;
            };
            let processor = self.processors.get(task.task_type());
            if !processor.polls() || task.state.is_finished() {
                continue;
            }
            let env = self.processor_env();
            match processor.on_state_change(&mut task, &env).await {
                Ok(ProcessOutcome::Running) => {
                    self.active.insert(id, task);
                }
                Ok(ProcessOutcome::Finished) => {
                    self.persist_task(&task).await;
                    self.active.insert(id, task.clone());
                    self.pending_finished.push_back(task);
                }
                Err(err) => {
                    debug!(instance_id = self.instance.id, task_instance_id = id, error = %err, "poll failed");
                }
            }
        }
    }

    pub(crate) fn aggregate_input(&self) -> AggregateInput {
        let states = || self.completed.values().map(|t| t.state);
        AggregateInput {
            current: self.instance.state,
            failure_strategy: self.instance.failure_strategy,
            active: self.active.len(),
            standby: self.standby.len(),
            standby_has_retry: self.standby.has_retry_task(),
            has_failed_task: self.has_failed_task(),
            any_waiting_thread: states().any(|s| s == TaskExecutionStatus::WaitingThread),
            any_pause: states().any(TaskExecutionStatus::is_pause),
            any_kill: states().any(TaskExecutionStatus::is_kill),
            backfill_complete: self.instance.is_backfill_complete(),
        }
    }

    /// Recompute the aggregate state. A terminal result is queued as a
    /// PROCESS_STATE_CHANGE so end-of-pass runs in FIFO order.
    pub(crate) async fn update_state(&mut self) {
        // Settling the pending finishes recomputes the state afterwards.
        if !self.pending_finished.is_empty() {
            return;
        }
        let next = aggregate(&self.aggregate_input());
        if next == self.instance.state {
            return;
        }
        info!(
            instance_id = self.instance.id,
            from = %self.instance.state,
            to = %next,
            "workflow state changed"
        );
        self.instance.state = next;
        if next.is_finished() {
            self.events.push(StateEvent::ProcessStateChange { new_state: next });
        } else {
            self.persist_instance().await;
            self.publish(next);
        }
    }

    /// Set a requested (non-terminal) state and persist it.
    pub(crate) async fn set_state(&mut self, state: WorkflowState) {
        self.instance.state = state;
        self.persist_instance().await;
        self.publish(state);
    }

    pub(crate) fn processor_env(&self) -> ProcessorEnv {
        ProcessorEnv {
            collab: self.collab.clone(),
            pool: self.pool.clone(),
            view: ExecutionView {
                instance_id: self.instance.id,
                schedule_time: self.instance.schedule_time,
                failure_strategy: self.instance.failure_strategy,
                priority: self.instance.priority,
                global_params: self.instance.global_params.clone(),
                var_pool: self.instance.var_pool.clone(),
                completed: self
                    .completed
                    .iter()
                    .map(|(code, t)| (*code, t.state))
                    .collect(),
            },
        }
    }

    pub(crate) fn publish(&self, state: WorkflowState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) async fn persist_instance(&mut self) {
        match self
            .collab
            .repository
            .save_workflow_instance(self.instance.clone())
            .await
        {
            Ok(()) => {}
            Err(err @ DagmasterError::InstanceNotFound(_)) => self.abandon(&err),
            Err(err) => {
                warn!(instance_id = self.instance.id, error = %err, "persisting workflow instance failed");
            }
        }
    }

    /// The instance row is gone: stop driving this context.
    pub(crate) fn abandon(&mut self, err: &DagmasterError) {
        error!(
            instance_id = self.instance.id,
            error = %err,
            "workflow instance record disappeared; context terminated"
        );
        self.exited = true;
    }

    pub(crate) async fn persist_task(&self, task: &TaskInstance) {
        if let Err(err) = self
            .collab
            .repository
            .save_task_instance(task.clone())
            .await
        {
            warn!(
                instance_id = self.instance.id,
                task_code = task.task_code(),
                error = %err,
                "persisting task instance failed"
            );
        }
    }
}
