#![allow(dead_code)]

pub use dagmaster_test_utils::{
    DefinitionBuilder, Outcome, RecordingAlertSink, ScriptedDispatcher, TaskBuilder, TestEngine,
    fast_config, init_tracing, with_timeout,
};

use dagmaster::model::{Command, WorkflowDefinition};
use dagmaster::types::{CommandType, FailureStrategy};

/// START command for `definition` with the given failure strategy.
pub fn start_command(definition: &WorkflowDefinition, strategy: FailureStrategy) -> Command {
    let mut command = Command::new(CommandType::Start, definition.code, definition.version);
    command.failure_strategy = strategy;
    command
}
