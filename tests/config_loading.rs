// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use dagmaster::config::{load_and_validate, load_engine_config, validate_engine, EngineConfig};
use dagmaster::errors::DagmasterError;
use dagmaster::model::TaskRelation;
use dagmaster::types::{FailureStrategy, Priority, TaskType, TimeoutStrategy};

type TestResult = Result<(), Box<dyn Error>>;

fn write(dir: &TempDir, name: &str, contents: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.path().join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

const NIGHTLY: &str = r#"
[workflow]
code = 7
name = "nightly"
failure_strategy = "continue"
priority = "high"
timeout = { strategy = "failed", seconds = 3600 }

[global_params]
region = "eu"

[task.extract]
code = 10
command = "echo extracting ${region}"

[task.transform]
code = 20
command = "echo transforming"
after = ["extract"]
max_retries = 2
retry_interval = 30
timeout = { strategy = "warn", seconds = 60 }

[task.route]
code = 30
type = "switch"
after = ["transform"]
params = { cases = [{ condition = "${region} == eu", next_node = 40 }], default_node = 40 }

[task.load]
code = 40
command = "echo loading"
after = ["route"]
forbidden = true
"#;

#[test]
fn test_workflow_file_becomes_definition() -> TestResult {
    let dir = TempDir::new()?;
    let path = write(&dir, "Workflow.toml", NIGHTLY)?;

    let file = load_and_validate(&path)?;
    assert_eq!(file.workflow.failure_strategy, FailureStrategy::Continue);
    assert_eq!(file.workflow.priority, Priority::High);
    assert_eq!(file.code_of("transform"), Some(20));
    assert_eq!(file.code_of("missing"), None);

    let definition = file.to_definition()?;
    assert_eq!(definition.code, 7);
    assert_eq!(definition.version, 1);
    assert_eq!(definition.name, "nightly");
    assert_eq!(definition.global_params.get("region").map(String::as_str), Some("eu"));
    assert_eq!(definition.timeout.as_ref().map(|t| t.seconds), Some(3600));
    assert_eq!(definition.tasks.len(), 4);

    assert!(definition.relations.contains(&TaskRelation::root(10)));
    assert!(definition.relations.contains(&TaskRelation::edge(10, 20)));
    assert!(definition.relations.contains(&TaskRelation::edge(20, 30)));
    assert!(definition.relations.contains(&TaskRelation::edge(30, 40)));
    assert_eq!(definition.relations.len(), 4);

    let extract = definition.task(10).ok_or("extract missing")?;
    assert_eq!(extract.task_type, TaskType::Shell);
    assert_eq!(extract.task_params["command"], "echo extracting ${region}");

    let transform = definition.task(20).ok_or("transform missing")?;
    assert_eq!(transform.max_retry_times, 2);
    assert_eq!(transform.retry_interval, 30);
    let timeout = transform.timeout.as_ref().ok_or("transform timeout missing")?;
    assert_eq!(timeout.strategy, TimeoutStrategy::Warn);
    assert!(timeout.enabled);

    let route = definition.task(30).ok_or("route missing")?;
    assert_eq!(route.task_type, TaskType::Switch);
    assert_eq!(route.task_params["default_node"], 40);

    assert!(definition.task(40).ok_or("load missing")?.forbidden);
    Ok(())
}

#[test]
fn test_unknown_dependency_is_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "Workflow.toml",
        r#"
[workflow]
code = 1

[task.a]
code = 1
command = "true"
after = ["ghost"]
"#,
    )?;

    let err = load_and_validate(&path).err().ok_or("expected an error")?;
    assert!(matches!(err, DagmasterError::ConfigError(ref msg) if msg.contains("ghost")));
    Ok(())
}

#[test]
fn test_cycle_is_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "Workflow.toml",
        r#"
[workflow]
code = 1

[task.a]
code = 1
command = "true"
after = ["b"]

[task.b]
code = 2
command = "true"
after = ["a"]
"#,
    )?;

    let err = load_and_validate(&path).err().ok_or("expected an error")?;
    assert!(matches!(err, DagmasterError::DagCycle(_)));
    Ok(())
}

#[test]
fn test_duplicate_codes_and_empty_files_are_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let duplicate = write(
        &dir,
        "dup.toml",
        r#"
[workflow]
code = 1

[task.a]
code = 5
command = "true"

[task.b]
code = 5
command = "true"
"#,
    )?;
    let empty = write(&dir, "empty.toml", "[workflow]\ncode = 1\n")?;

    assert!(matches!(load_and_validate(&duplicate), Err(DagmasterError::ConfigError(_))));
    assert!(matches!(load_and_validate(&empty), Err(DagmasterError::ConfigError(_))));
    Ok(())
}

#[test]
fn test_out_of_range_durations_are_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "Workflow.toml",
        r#"
[workflow]
code = 1

[task.a]
code = 1
command = "true"
max_retries = 3
retry_interval = 10000000000000000
"#,
    )?;

    let err = load_and_validate(&path).err().ok_or("expected an error")?;
    assert!(matches!(err, DagmasterError::ConfigError(ref msg) if msg.contains("retry_interval")));
    Ok(())
}

#[test]
fn test_malformed_toml_is_a_toml_error() -> TestResult {
    let dir = TempDir::new()?;
    let path = write(&dir, "bad.toml", "[workflow\ncode = ")?;
    assert!(matches!(load_and_validate(&path), Err(DagmasterError::TomlError(_))));
    assert!(matches!(
        load_and_validate(dir.path().join("absent.toml")),
        Err(DagmasterError::IoError(_))
    ));
    Ok(())
}

#[test]
fn test_engine_config_overrides_defaults() -> TestResult {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "engine.toml",
        r#"
[engine]
exec_threads = 2
max_live_instances = 8
submit_retry_interval_ms = 250

[unrelated]
ignored = true
"#,
    )?;

    let config = load_engine_config(Some(path.as_path()))?;
    let defaults = EngineConfig::default();
    assert_eq!(config.exec_threads, 2);
    assert_eq!(config.max_live_instances, Some(8));
    assert_eq!(config.submit_retry_interval().as_millis(), 250);
    assert_eq!(config.submit_retry_times, defaults.submit_retry_times);
    assert_eq!(config.state_check_interval_ms, defaults.state_check_interval_ms);

    assert_eq!(load_engine_config(None)?, defaults);
    Ok(())
}

#[test]
fn test_engine_config_sanity_checks() {
    let zero_threads = EngineConfig {
        exec_threads: 0,
        ..EngineConfig::default()
    };
    let zero_live = EngineConfig {
        max_live_instances: Some(0),
        ..EngineConfig::default()
    };
    let zero_interval = EngineConfig {
        state_check_interval_ms: 0,
        ..EngineConfig::default()
    };

    assert!(validate_engine(&zero_threads).is_err());
    assert!(validate_engine(&zero_live).is_err());
    assert!(validate_engine(&zero_interval).is_err());
    assert!(validate_engine(&EngineConfig::default()).is_ok());
}
