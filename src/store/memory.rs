// src/store/memory.rs

//! In-process repository and command queue.
//!
//! Used by the CLI and by tests. Writes and reads of task rows can be made
//! to fail a given number of times to exercise the engine's retry paths.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::collab::BoxFuture;
use crate::errors::{DagmasterError, Result};
use crate::model::{
    Command, InstanceId, TaskCode, TaskInstance, TaskInstanceId, WorkflowCode, WorkflowDefinition,
    WorkflowInstance,
};
use crate::store::{CommandSource, WorkflowRepository};
use crate::types::{TaskExecutionStatus, WorkflowState};

#[derive(Debug, Default)]
struct Tables {
    definitions: BTreeMap<(WorkflowCode, u32), WorkflowDefinition>,
    instances: BTreeMap<InstanceId, WorkflowInstance>,
    tasks: BTreeMap<TaskInstanceId, TaskInstance>,
    commands: VecDeque<Command>,
    next_instance_id: InstanceId,
    next_task_id: TaskInstanceId,
}

#[derive(Debug, Default)]
struct Faults {
    task_writes: u32,
    task_reads: u32,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_definition(&self, definition: WorkflowDefinition) {
        lock(&self.tables)
            .definitions
            .insert((definition.code, definition.version), definition);
    }

    pub fn push_command(&self, command: Command) {
        lock(&self.tables).commands.push_back(command);
    }

    /// Make the next `n` task-row writes fail.
    pub fn fail_next_task_writes(&self, n: u32) {
        lock(&self.faults).task_writes = n;
    }

    /// Make the next `n` task-row reads fail.
    pub fn fail_next_task_reads(&self, n: u32) {
        lock(&self.faults).task_reads = n;
    }

    pub fn workflow_instance(&self, id: InstanceId) -> Option<WorkflowInstance> {
        lock(&self.tables).instances.get(&id).cloned()
    }

    pub fn workflow_instances(&self) -> Vec<WorkflowInstance> {
        lock(&self.tables).instances.values().cloned().collect()
    }

    pub fn task_instances(&self, workflow_instance_id: InstanceId) -> Vec<TaskInstance> {
        lock(&self.tables)
            .tasks
            .values()
            .filter(|t| t.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect()
    }

    /// Overwrite the state of a task row, as an operator or a worker would.
    pub fn set_task_state(&self, id: TaskInstanceId, state: TaskExecutionStatus) -> Result<()> {
        let mut tables = lock(&self.tables);
        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or(DagmasterError::TaskInstanceNotFound(id))?;
        task.state = state;
        Ok(())
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut u32) -> bool {
        let mut faults = lock(&self.faults);
        let counter = pick(&mut faults);
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn definition(&self, code: WorkflowCode, version: Option<u32>) -> Result<WorkflowDefinition> {
        let tables = lock(&self.tables);
        let found = match version {
            Some(v) => tables.definitions.get(&(code, v)),
            None => tables
                .definitions
                .range((code, 0)..=(code, u32::MAX))
                .next_back()
                .map(|(_, d)| d),
        };
        found.cloned().ok_or(DagmasterError::DefinitionNotFound {
            code,
            version: version.unwrap_or(0),
        })
    }

    fn save_task(&self, mut task: TaskInstance) -> Result<TaskInstance> {
        if self.take_fault(|f| &mut f.task_writes) {
            return Err(DagmasterError::Repository(format!(
                "injected write failure for task {}",
                task.task_code()
            )));
        }
        let mut tables = lock(&self.tables);
        let id = match task.id {
            Some(id) => id,
            None => {
                tables.next_task_id += 1;
                tables.next_task_id
            }
        };
        task.id = Some(id);
        debug!(task_instance_id = id, state = ?task.state, "task row saved");
        tables.tasks.insert(id, task.clone());
        Ok(task)
    }

    fn last_task_state(
        &self,
        workflow_code: WorkflowCode,
        task_code: TaskCode,
    ) -> Option<TaskExecutionStatus> {
        let tables = lock(&self.tables);
        tables
            .tasks
            .values()
            .rev()
            .filter(|t| t.valid && t.task_code() == task_code)
            .find(|t| {
                tables
                    .instances
                    .get(&t.workflow_instance_id)
                    .is_some_and(|i| i.definition_code == workflow_code)
            })
            .map(|t| t.state)
    }
}

impl WorkflowRepository for MemoryRepository {
    fn find_workflow_definition(
        &self,
        code: WorkflowCode,
        version: Option<u32>,
    ) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let res = self.definition(code, version);
        Box::pin(async move { res })
    }

    fn find_workflow_instance(&self, id: InstanceId) -> BoxFuture<'_, Result<WorkflowInstance>> {
        let res = self
            .workflow_instance(id)
            .ok_or(DagmasterError::InstanceNotFound(id));
        Box::pin(async move { res })
    }

    fn create_workflow_instance(
        &self,
        mut instance: WorkflowInstance,
    ) -> BoxFuture<'_, Result<WorkflowInstance>> {
        let mut tables = lock(&self.tables);
        tables.next_instance_id += 1;
        instance.id = tables.next_instance_id;
        tables.instances.insert(instance.id, instance.clone());
        drop(tables);
        Box::pin(async move { Ok(instance) })
    }

    fn save_workflow_instance(&self, instance: WorkflowInstance) -> BoxFuture<'_, Result<()>> {
        lock(&self.tables).instances.insert(instance.id, instance);
        Box::pin(async move { Ok(()) })
    }

    fn find_task_instance(&self, id: TaskInstanceId) -> BoxFuture<'_, Result<TaskInstance>> {
        let res = if self.take_fault(|f| &mut f.task_reads) {
            Err(DagmasterError::Repository(format!(
                "injected read failure for task instance {id}"
            )))
        } else {
            lock(&self.tables)
                .tasks
                .get(&id)
                .cloned()
                .ok_or(DagmasterError::TaskInstanceNotFound(id))
        };
        Box::pin(async move { res })
    }

    fn find_task_instances(
        &self,
        workflow_instance_id: InstanceId,
    ) -> BoxFuture<'_, Result<Vec<TaskInstance>>> {
        let tasks = self.task_instances(workflow_instance_id);
        Box::pin(async move { Ok(tasks) })
    }

    fn save_task_instance(&self, task: TaskInstance) -> BoxFuture<'_, Result<TaskInstance>> {
        let res = self.save_task(task);
        Box::pin(async move { res })
    }

    fn find_last_task_state(
        &self,
        workflow_code: WorkflowCode,
        task_code: TaskCode,
    ) -> BoxFuture<'_, Result<Option<TaskExecutionStatus>>> {
        let state = self.last_task_state(workflow_code, task_code);
        Box::pin(async move { Ok(state) })
    }

    fn find_last_workflow_state(
        &self,
        workflow_code: WorkflowCode,
    ) -> BoxFuture<'_, Result<Option<WorkflowState>>> {
        let state = lock(&self.tables)
            .instances
            .values()
            .rev()
            .find(|i| i.definition_code == workflow_code)
            .map(|i| i.state);
        Box::pin(async move { Ok(state) })
    }
}

impl CommandSource for MemoryRepository {
    fn next_command(&self) -> BoxFuture<'_, Result<Option<Command>>> {
        let next = lock(&self.tables).commands.pop_front();
        Box::pin(async move { Ok(next) })
    }
}
