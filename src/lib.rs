// src/lib.rs

pub mod cli;
pub mod collab;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::collab::Collaborators;
use crate::config::loader::{load_and_validate, load_engine_config};
use crate::config::WorkflowFile;
use crate::dag::WorkflowDag;
use crate::engine::{InstancePool, StateEvent, event_channel};
use crate::exec::{LocalShellDispatcher, ProcessorRegistry};
use crate::model::command::{BACKFILL_END_DATE, BACKFILL_START_DATE, START_NODE_IDS};
use crate::model::{Command, WorkflowDefinition};
use crate::store::MemoryRepository;
use crate::types::{CommandType, WorkflowState};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow and engine config loading
/// - the in-memory repository and the local shell worker
/// - the instance pool driving the workflow
/// - Ctrl-C handling (requests a stop of the running instance)
///
/// Returns the final state of the workflow instance.
pub async fn run(args: CliArgs) -> Result<WorkflowState> {
    let workflow_path = PathBuf::from(&args.workflow);
    let file = load_and_validate(&workflow_path)
        .with_context(|| format!("loading workflow file {}", workflow_path.display()))?;
    let definition = file.to_definition()?;

    if args.dry_run {
        print_dry_run(&file, &definition)?;
        return Ok(WorkflowState::Success);
    }

    let engine_config = load_engine_config(args.engine_config.as_deref().map(Path::new))
        .context("loading engine config")?;
    let command = build_command(&args, &file, &definition)?;

    let repository = Arc::new(MemoryRepository::new());
    repository.insert_definition(definition);

    // Workers report task state changes through the pool's event router.
    let (notifier, inbox) = event_channel();
    let dispatcher = Arc::new(LocalShellDispatcher::new(repository.clone(), notifier));
    let collab = Collaborators::new(repository.clone(), dispatcher);
    let pool = InstancePool::new(
        engine_config,
        collab,
        Arc::new(ProcessorRegistry::with_defaults()),
    );
    let _router = pool.route_events(inbox);

    let instance_id = pool.handle_command(command).await?;
    info!(instance_id, "workflow instance started");

    // Ctrl-C → stop request.
    {
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!(instance_id, "Ctrl+C received; stopping workflow");
            pool.enqueue_event(
                instance_id,
                StateEvent::ProcessStateChange {
                    new_state: WorkflowState::ReadyStop,
                },
            );
        });
    }

    let state = pool.wait_for_completion(instance_id).await?;
    pool.shutdown();

    print_summary(&repository);
    Ok(state)
}

/// Map the CLI flags onto the command that starts the run.
fn build_command(
    args: &CliArgs,
    file: &WorkflowFile,
    definition: &WorkflowDefinition,
) -> Result<Command> {
    let command_type = if args.backfill_start.is_some() {
        CommandType::Backfill
    } else if !args.tasks.is_empty() {
        CommandType::ExecuteSubset
    } else {
        CommandType::Start
    };

    let mut command = Command::new(command_type, definition.code, definition.version);
    command.failure_strategy = args
        .failure_strategy
        .unwrap_or(file.workflow.failure_strategy);
    command.priority = file.workflow.priority;

    if let (Some(start), Some(end)) = (&args.backfill_start, &args.backfill_end) {
        command.params.set(BACKFILL_START_DATE, start);
        command.params.set(BACKFILL_END_DATE, end);
    }

    if !args.tasks.is_empty() {
        let codes = args
            .tasks
            .iter()
            .map(|name| {
                file.code_of(name)
                    .map(|code| code.to_string())
                    .with_context(|| format!("unknown task '{name}' in --task"))
            })
            .collect::<Result<Vec<_>>>()?;
        command.params.set(START_NODE_IDS, codes.join(","));
    }

    debug!(?command, "built start command");
    Ok(command)
}

/// Simple dry-run output: tasks in dispatch order with their dependencies.
fn print_dry_run(file: &WorkflowFile, definition: &WorkflowDefinition) -> Result<()> {
    let dag = WorkflowDag::build(&definition.tasks, &definition.relations, None)?;

    println!("dagmaster dry-run");
    println!("  workflow = {} (code {}, v{})", definition.name, definition.code, definition.version);
    println!("  failure_strategy = {:?}", file.workflow.failure_strategy);
    if !definition.global_params.is_empty() {
        println!("  global_params = {:?}", definition.global_params);
    }
    println!();

    println!("tasks ({}):", dag.len());
    for code in dag.topological_order() {
        let Some(task) = dag.definition(*code) else {
            continue;
        };
        println!("  - {} [{}] code={}", task.name, task.task_type, task.code);
        let preds = dag.predecessors(*code);
        if !preds.is_empty() {
            println!("      after: {:?}", preds);
        }
        if task.max_retry_times > 0 {
            println!(
                "      retries: {} every {}s",
                task.max_retry_times, task.retry_interval
            );
        }
        if task.forbidden {
            println!("      forbidden: true");
        }
        if !task.task_params.is_null() {
            println!("      params: {}", task.task_params);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

/// Print the final state of every task of every instance the run created.
fn print_summary(repository: &MemoryRepository) {
    for instance in repository.workflow_instances() {
        match instance.schedule_time {
            Some(date) => println!("{} [{}] {}", instance.name, date.date_naive(), instance.state),
            None => println!("{} {}", instance.name, instance.state),
        }
        for task in repository
            .task_instances(instance.id)
            .iter()
            .filter(|t| t.valid)
        {
            println!(
                "  {:<24} {:?} (retries: {})",
                task.definition.name, task.state, task.retry_times
            );
        }
    }
}
