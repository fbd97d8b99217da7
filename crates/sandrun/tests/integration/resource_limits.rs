use std::collections::HashMap;

use sandrun::config::{CompileConfig, DEFAULT_SANDBOX_PATH, Language, RunConfig};
use sandrun::{ExecutionRequest, ExecutionStatus, ResourceLimits};

use super::{c_request, executor, test_config};

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_wall_timeout_kills_sleeping_program() {
    let config = test_config();
    let request = c_request("sleep_forever.c")
        .with_run_limits(ResourceLimits::new().with_wall_time(1));

    let started = std::time::Instant::now();
    let result = executor(&config)
        .execute(&request)
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::RunTimeout);
    assert_eq!(result.exit_code, -1);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_cpu_limit_kills_busy_loop() {
    let config = test_config();
    // CPU limit trips well before the wall clock
    let request = c_request("busy_loop.c")
        .with_run_limits(ResourceLimits::new().with_cpu_time(1).with_wall_time(20));
    let result = executor(&config)
        .execute(&request)
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    // SIGXCPU or SIGKILL
    assert!(result.exit_code > 128);
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_memory_limit() {
    let config = test_config();
    let request = c_request("memory_hog.c")
        .with_run_limits(ResourceLimits::new().with_memory(64 * ResourceLimits::MB));
    let result = executor(&config)
        .execute(&request)
        .await
        .expect("Execution failed");

    assert!(!result.is_success());
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
}

#[tokio::test]
#[ignore = "requires bwrap"]
async fn test_compile_timeout() {
    let mut config = test_config();
    config.languages.insert(
        "slow".to_string(),
        Language {
            name: "Never finishes compiling".to_string(),
            source_name: "main.txt".to_string(),
            toolchain: false,
            compile: Some(CompileConfig {
                command: vec!["sleep".to_string(), "30".to_string()],
                output_name: "main".to_string(),
                env: HashMap::new(),
                path: DEFAULT_SANDBOX_PATH.to_string(),
                limits: Some(ResourceLimits::new().with_wall_time(1)),
            }),
            run: RunConfig {
                command: vec!["./{binary}".to_string()],
                env: HashMap::new(),
                mounts: Vec::new(),
                path: DEFAULT_SANDBOX_PATH.to_string(),
                limits: None,
            },
        },
    );

    let request = ExecutionRequest::new("slow", "any", b"x".to_vec());
    let result = executor(&config)
        .execute(&request)
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::CompileTimeout);
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.stderr.text, "compilation timed out after 1 s");
    assert!(result.compilation_time_ms >= 1000.0);
    assert_eq!(result.execution_time_ms, None);
}
