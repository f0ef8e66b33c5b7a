#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use dagmaster::collab::BoxFuture;
use dagmaster::engine::{EventNotifier, StateEvent};
use dagmaster::errors::{DagmasterError, Result};
use dagmaster::exec::DispatchClient;
use dagmaster::model::{InstanceId, Property, TaskCode, TaskInstance, TaskInstanceId};
use dagmaster::store::WorkflowRepository;
use dagmaster::types::TaskExecutionStatus;

/// What the fake worker does with the next attempt of a task code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail,
    /// Keep running until killed.
    Hang,
    SucceedWith(Vec<Property>),
    /// The dispatch call itself fails.
    RejectSubmit,
}

#[derive(Debug, Default)]
struct DispatchLog {
    dispatched: Vec<(TaskCode, TaskInstanceId)>,
    killed: Vec<TaskCode>,
    running: HashMap<(InstanceId, TaskCode), usize>,
    overlaps: usize,
    tokens: HashMap<TaskInstanceId, CancellationToken>,
}

/// Dispatch client that plays a scripted worker.
///
/// Each attempt takes the next [`Outcome`] queued for its task code (or
/// `Succeed` once the queue is empty), sleeps `latency`, persists the
/// finished row and notifies the owning instance, like a real worker would.
pub struct ScriptedDispatcher {
    repository: Arc<dyn WorkflowRepository>,
    notifier: EventNotifier,
    latency: Duration,
    script: Mutex<HashMap<TaskCode, VecDeque<Outcome>>>,
    log: Arc<Mutex<DispatchLog>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedDispatcher {
    pub fn new(repository: Arc<dyn WorkflowRepository>, notifier: EventNotifier) -> Self {
        Self {
            repository,
            notifier,
            latency: Duration::from_millis(10),
            script: Mutex::new(HashMap::new()),
            log: Arc::new(Mutex::new(DispatchLog::default())),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue outcomes for consecutive attempts of `code`.
    pub fn script(&self, code: TaskCode, outcomes: impl IntoIterator<Item = Outcome>) {
        lock(&self.script).entry(code).or_default().extend(outcomes);
    }

    /// Task codes in the order they were dispatched.
    pub fn dispatch_order(&self) -> Vec<TaskCode> {
        lock(&self.log).dispatched.iter().map(|(code, _)| *code).collect()
    }

    pub fn dispatch_count(&self, code: TaskCode) -> usize {
        lock(&self.log)
            .dispatched
            .iter()
            .filter(|(c, _)| *c == code)
            .count()
    }

    pub fn killed(&self) -> Vec<TaskCode> {
        lock(&self.log).killed.clone()
    }

    /// Times a code was dispatched while an attempt of it was still running
    /// in the same instance.
    pub fn overlaps(&self) -> usize {
        lock(&self.log).overlaps
    }

    fn next_outcome(&self, code: TaskCode) -> Outcome {
        lock(&self.script)
            .get_mut(&code)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Succeed)
    }
}

impl DispatchClient for ScriptedDispatcher {
    fn submit(&self, task: TaskInstance) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let code = task.task_code();
            let outcome = self.next_outcome(code);
            if outcome == Outcome::RejectSubmit {
                return Err(DagmasterError::Dispatch(format!("task {code} rejected")));
            }
            let Some(id) = task.id else {
                return Err(DagmasterError::Dispatch(format!("task {code} has no id")));
            };

            let token = CancellationToken::new();
            {
                let mut guard = lock(&self.log);
                let log = &mut *guard;
                log.dispatched.push((code, id));
                let running = log.running.entry((task.workflow_instance_id, code)).or_default();
                if *running > 0 {
                    log.overlaps += 1;
                }
                *running += 1;
                log.tokens.insert(id, token.clone());
            }
            let worker = FakeWorker {
                repository: Arc::clone(&self.repository),
                notifier: self.notifier.clone(),
                log: Arc::clone(&self.log),
            };
            let latency = self.latency;
            tokio::spawn(async move {
                worker.run(task, outcome, latency, token).await;
            });
            Ok(())
        })
    }

    fn send_kill(&self, task: TaskInstance) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut log = lock(&self.log);
            log.killed.push(task.task_code());
            if let Some(token) = task.id.and_then(|id| log.tokens.get(&id)) {
                token.cancel();
            }
            Ok(())
        })
    }
}

struct FakeWorker {
    repository: Arc<dyn WorkflowRepository>,
    notifier: EventNotifier,
    log: Arc<Mutex<DispatchLog>>,
}

impl FakeWorker {
    async fn run(
        self,
        mut task: TaskInstance,
        outcome: Outcome,
        latency: Duration,
        token: CancellationToken,
    ) {
        task.state = TaskExecutionStatus::RunningExecution;
        task.start_time = Some(Utc::now());
        task.host = Some("fake-worker".to_string());
        if let Some(saved) = self.save(task.clone()).await {
            task = saved;
        }

        let hang = outcome == Outcome::Hang;
        let finished = tokio::select! {
            _ = tokio::time::sleep(latency), if !hang => match outcome {
                Outcome::Fail => TaskExecutionStatus::Failure,
                Outcome::SucceedWith(outputs) => {
                    task.var_pool.retain(|p| !outputs.iter().any(|o| o.name == p.name));
                    task.var_pool.extend(outputs);
                    TaskExecutionStatus::Success
                }
                _ => TaskExecutionStatus::Success,
            },
            _ = token.cancelled() => TaskExecutionStatus::Kill,
        };

        {
            let mut log = lock(&self.log);
            if let Some(running) = log.running.get_mut(&(task.workflow_instance_id, task.task_code())) {
                *running = running.saturating_sub(1);
            }
        }

        // A row the engine already moved on (timeout, retry) is left alone.
        if let Some(id) = task.id {
            match self.reload(id).await {
                Some(current) if current.state.is_running() && current.retry_times == task.retry_times => {}
                _ => return,
            }
        }

        task.finish(finished, Utc::now());
        if let Some(saved) = self.save(task).await
            && let Some(task_instance_id) = saved.id
        {
            self.notifier.notify(
                saved.workflow_instance_id,
                StateEvent::TaskStateChange { task_instance_id },
            );
        }
    }

    async fn reload(&self, id: TaskInstanceId) -> Option<TaskInstance> {
        for _ in 0..50 {
            match self.repository.find_task_instance(id).await {
                Ok(task) => return Some(task),
                Err(_) => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
        None
    }

    /// Save, riding out injected repository faults.
    async fn save(&self, task: TaskInstance) -> Option<TaskInstance> {
        for _ in 0..50 {
            match self.repository.save_task_instance(task.clone()).await {
                Ok(saved) => return Some(saved),
                Err(_) => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
        None
    }
}
