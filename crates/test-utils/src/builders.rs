#![allow(dead_code)]

use std::collections::BTreeMap;

use dagmaster::model::{
    TaskCode, TaskDefinition, TaskRelation, TimeoutPolicy, WorkflowCode, WorkflowDefinition,
};
use dagmaster::types::{Priority, TaskType, TimeoutStrategy};
use serde_json::json;

/// Builder for `WorkflowDefinition` to simplify test setup.
pub struct DefinitionBuilder {
    definition: WorkflowDefinition,
}

impl DefinitionBuilder {
    pub fn new(code: WorkflowCode) -> Self {
        Self {
            definition: WorkflowDefinition {
                code,
                version: 1,
                name: format!("wf-{code}"),
                tasks: vec![],
                relations: vec![],
                global_params: BTreeMap::new(),
                timeout: None,
                schedules: vec![],
            },
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.definition.version = version;
        self
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.definition.tasks.push(task);
        self
    }

    /// Shell task `code` with `after` as its predecessors.
    pub fn shell(self, code: TaskCode, after: &[TaskCode]) -> Self {
        self.with_task(TaskBuilder::shell(code).build()).after(code, after)
    }

    pub fn after(mut self, code: TaskCode, deps: &[TaskCode]) -> Self {
        if deps.is_empty() {
            self.definition.relations.push(TaskRelation::root(code));
        }
        for dep in deps {
            self.definition.relations.push(TaskRelation::edge(*dep, code));
        }
        self
    }

    pub fn global_param(mut self, name: &str, value: &str) -> Self {
        self.definition
            .global_params
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn timeout(mut self, strategy: TimeoutStrategy, seconds: u64) -> Self {
        self.definition.timeout = Some(TimeoutPolicy {
            enabled: true,
            strategy,
            seconds,
        });
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.definition
    }
}

/// Builder for `TaskDefinition`.
pub struct TaskBuilder {
    task: TaskDefinition,
}

impl TaskBuilder {
    pub fn new(code: TaskCode, task_type: TaskType) -> Self {
        Self {
            task: TaskDefinition::new(code, format!("t{code}"), task_type),
        }
    }

    pub fn shell(code: TaskCode) -> Self {
        Self::new(code, TaskType::Shell).params(json!({ "command": format!("echo {code}") }))
    }

    pub fn conditions(
        code: TaskCode,
        depends_on: TaskCode,
        success_node: &[TaskCode],
        failed_node: &[TaskCode],
    ) -> Self {
        Self::new(code, TaskType::Conditions).params(json!({
            "relation": "AND",
            "items": [{ "task_code": depends_on, "status": "SUCCESS" }],
            "success_node": success_node,
            "failed_node": failed_node,
        }))
    }

    /// SWITCH over `(condition, next_node)` cases.
    pub fn switch(code: TaskCode, cases: &[(&str, TaskCode)], default_node: Option<TaskCode>) -> Self {
        let cases: Vec<_> = cases
            .iter()
            .map(|(condition, next)| json!({ "condition": condition, "next_node": next }))
            .collect();
        Self::new(code, TaskType::Switch).params(json!({
            "cases": cases,
            "default_node": default_node,
        }))
    }

    pub fn sub_workflow(code: TaskCode, workflow_code: WorkflowCode) -> Self {
        Self::new(code, TaskType::SubWorkflow).params(json!({ "workflow_code": workflow_code }))
    }

    /// DEPENDENT on the last run of whole workflows, all of which must succeed.
    pub fn dependent(code: TaskCode, workflow_codes: &[WorkflowCode]) -> Self {
        let items: Vec<_> = workflow_codes
            .iter()
            .map(|workflow_code| json!({ "workflow_code": workflow_code }))
            .collect();
        Self::new(code, TaskType::Dependent).params(json!({ "relation": "AND", "items": items }))
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.task.task_params = params;
        self
    }

    pub fn retries(mut self, max: u32, interval_secs: u64) -> Self {
        self.task.max_retry_times = max;
        self.task.retry_interval = interval_secs;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn timeout(mut self, strategy: TimeoutStrategy, seconds: u64) -> Self {
        self.task.timeout = Some(TimeoutPolicy {
            enabled: true,
            strategy,
            seconds,
        });
        self
    }

    pub fn forbidden(mut self) -> Self {
        self.task.forbidden = true;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.task
    }
}
