// tests/local_shell_worker.rs

mod common;

use std::error::Error;
use std::sync::Arc;

use serde_json::json;

use dagmaster::collab::Collaborators;
use dagmaster::engine::{InstancePool, StateEvent, event_channel};
use dagmaster::exec::{LocalShellDispatcher, ProcessorRegistry};
use dagmaster::model::{InstanceId, WorkflowDefinition};
use dagmaster::store::MemoryRepository;
use dagmaster::types::{FailureStrategy, TaskExecutionStatus, WorkflowState};

use crate::common::{
    DefinitionBuilder, TaskBuilder, fast_config, init_tracing, start_command, with_timeout,
};

type TestResult = Result<(), Box<dyn Error>>;

struct ShellEngine {
    repository: Arc<MemoryRepository>,
    pool: InstancePool,
}

impl ShellEngine {
    fn new() -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let (notifier, inbox) = event_channel();
        let dispatcher = Arc::new(LocalShellDispatcher::new(repository.clone(), notifier));
        let collab = Collaborators::new(repository.clone(), dispatcher);
        let pool = InstancePool::new(
            fast_config(),
            collab,
            Arc::new(ProcessorRegistry::with_defaults()),
        );
        let _router = pool.route_events(inbox);
        Self { repository, pool }
    }

    async fn start(&self, definition: WorkflowDefinition) -> Result<InstanceId, Box<dyn Error>> {
        let command = start_command(&definition, FailureStrategy::End);
        self.repository.insert_definition(definition);
        Ok(self.pool.handle_command(command).await?)
    }

    fn state_of(&self, id: InstanceId, code: i64) -> Option<TaskExecutionStatus> {
        self.repository
            .task_instances(id)
            .into_iter()
            .find(|t| t.valid && t.task_code() == code)
            .map(|t| t.state)
    }
}

impl Drop for ShellEngine {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

fn shell(code: i64, command: &str) -> dagmaster::model::TaskDefinition {
    TaskBuilder::shell(code)
        .params(json!({ "command": command }))
        .build()
}

#[tokio::test]
async fn test_shell_outputs_feed_next_command() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = ShellEngine::new();
        let definition = DefinitionBuilder::new(1)
            .with_task(shell(1, "echo '${setValue(greeting=hi)}'"))
            .after(1, &[])
            .with_task(shell(2, "test \"${greeting}\" = hi"))
            .after(2, &[1])
            .build();

        let id = engine.start(definition).await?;
        let state = engine.pool.wait_for_completion(id).await?;

        assert_eq!(state, WorkflowState::Success);
        let first = engine
            .repository
            .task_instances(id)
            .into_iter()
            .find(|t| t.task_code() == 1)
            .ok_or("task 1 row missing")?;
        assert!(first.var_pool.iter().any(|p| p.name == "greeting" && p.value == "hi"));
        assert_eq!(first.host.as_deref(), Some("localhost"));
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_non_zero_exit_fails_the_task() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = ShellEngine::new();
        let definition = DefinitionBuilder::new(1)
            .with_task(shell(1, "exit 3"))
            .after(1, &[])
            .with_task(shell(2, "true"))
            .after(2, &[1])
            .build();

        let id = engine.start(definition).await?;

        assert_eq!(engine.pool.wait_for_completion(id).await?, WorkflowState::Failure);
        assert_eq!(engine.state_of(id, 1), Some(TaskExecutionStatus::Failure));
        assert_eq!(engine.state_of(id, 2), None);
        TestResult::Ok(())
    })
    .await
}

#[tokio::test]
async fn test_stop_kills_the_process() -> TestResult {
    init_tracing();
    with_timeout(async {
        let engine = ShellEngine::new();
        let definition = DefinitionBuilder::new(1)
            .with_task(shell(1, "sleep 30"))
            .after(1, &[])
            .build();
        let id = engine.start(definition).await?;

        for _ in 0..200 {
            if engine.state_of(id, 1) == Some(TaskExecutionStatus::RunningExecution) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(engine.state_of(id, 1), Some(TaskExecutionStatus::RunningExecution));

        engine.pool.enqueue_event(
            id,
            StateEvent::ProcessStateChange {
                new_state: WorkflowState::ReadyStop,
            },
        );

        assert_eq!(engine.pool.wait_for_completion(id).await?, WorkflowState::Stop);
        assert_eq!(engine.state_of(id, 1), Some(TaskExecutionStatus::Kill));
        TestResult::Ok(())
    })
    .await
}
