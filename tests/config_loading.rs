// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use buildexec::config::{load_and_validate, ConfigFile};
use buildexec::errors::BuildExecError;
use buildexec::types::{JobMode, JobOutcome};
use buildexec_test_utils::builders::{ConfigFileBuilder, JobConfigBuilder};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_full_config_is_loaded_with_defaults() {
    let file = write_config(
        r#"
[node]
name = "linux-agent"
executors = 3

[stuck]
estimate_factor = 4

[job.compile]
duration_ms = 1500
estimated_ms = 1000

[job.deploy]
duration_ms = 60000
mode = "async"
outcome = "failure"
abort_after_ms = 2000
abort_by = "alice"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.node.name, "linux-agent");
    assert_eq!(cfg.node.executors, 3);
    assert_eq!(cfg.stuck.estimate_factor, 4);
    assert_eq!(cfg.stuck.no_estimate_limit_hours, 24);

    let compile = &cfg.job["compile"];
    assert_eq!(compile.duration(), Duration::from_millis(1500));
    assert_eq!(compile.estimate(), Some(Duration::from_secs(1)));
    assert_eq!(compile.outcome, JobOutcome::Success);
    assert_eq!(compile.mode, JobMode::Sync);
    assert!(compile.abort_after().is_none());

    let deploy = &cfg.job["deploy"];
    assert_eq!(deploy.mode, JobMode::Async);
    assert_eq!(deploy.outcome, JobOutcome::Failure);
    assert_eq!(deploy.abort_after(), Some(Duration::from_secs(2)));
    assert_eq!(deploy.abort_by.as_deref(), Some("alice"));

    let policy = cfg.stuck.policy();
    assert_eq!(policy.estimate_factor, 4);
    assert_eq!(policy.no_estimate_limit, Duration::from_secs(24 * 60 * 60));
}

#[test]
fn test_node_section_defaults() {
    let file = write_config(
        r#"
[job.only]
duration_ms = 5
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.node.name, "built-in");
    assert_eq!(cfg.node.executors, 2);
    assert_eq!(cfg.stuck.estimate_factor, 10);
}

#[test]
fn test_config_without_jobs_is_rejected() {
    let file = write_config(
        r#"
[node]
executors = 1
"#,
    );

    match load_and_validate(file.path()) {
        Err(BuildExecError::ConfigError(msg)) => assert!(msg.contains("at least one")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_zero_executors_is_rejected() {
    let file = write_config(
        r#"
[node]
executors = 0

[job.a]
duration_ms = 5
"#,
    );

    match load_and_validate(file.path()) {
        Err(BuildExecError::ConfigError(msg)) => assert!(msg.contains("executors")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_abort_by_requires_abort_after() {
    let file = write_config(
        r#"
[job.a]
duration_ms = 5
abort_by = "bob"
"#,
    );

    match load_and_validate(file.path()) {
        Err(BuildExecError::ConfigError(msg)) => {
            assert!(msg.contains("'a'"));
            assert!(msg.contains("abort_after_ms"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_unknown_outcome_is_a_toml_error() {
    let file = write_config(
        r#"
[job.a]
duration_ms = 5
outcome = "maybe"
"#,
    );

    let result = load_and_validate(file.path());
    assert!(matches!(result, Err(BuildExecError::TomlError(_))));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_and_validate(dir.path().join("Buildexec.toml"));
    assert!(matches!(result, Err(BuildExecError::IoError(_))));
}

#[test]
fn test_builder_validation() {
    let cfg = ConfigFileBuilder::new()
        .with_executors(4)
        .with_node_name("arm-agent")
        .with_job("a", JobConfigBuilder::new(10).estimated_ms(20).build())
        .build();
    assert_eq!(cfg.node.executors, 4);
    assert_eq!(cfg.node.name, "arm-agent");
    assert_eq!(cfg.job["a"].estimated_ms, Some(20));

    let raw = ConfigFileBuilder::new()
        .with_estimate_factor(0)
        .with_job("a", JobConfigBuilder::new(10).build())
        .raw();
    assert!(matches!(
        ConfigFile::try_from(raw),
        Err(BuildExecError::ConfigError(_))
    ));
}

#[test]
fn test_log_filter_sources() {
    use buildexec::cli::LogLevel;
    use buildexec::logging::build_filter;

    let from_flag = build_filter(Some(LogLevel::Debug), Some("error")).unwrap();
    let from_flag = from_flag.to_string();
    assert!(from_flag.contains("debug") && !from_flag.contains("error"));

    let from_env = build_filter(None, Some("buildexec::exec=trace")).unwrap();
    assert!(from_env.to_string().contains("buildexec::exec"));

    let fallback = build_filter(None, Some("  ")).unwrap();
    assert!(fallback.to_string().contains("info"));

    assert!(build_filter(None, Some("buildexec=loud")).is_err());
}
