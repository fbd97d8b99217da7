use sandrun::{ExecutionStatus, ResourceLimits};

use super::{c_request, executor, go_request, test_config};

#[tokio::test]
#[ignore = "requires bwrap and a Go toolchain"]
async fn test_go_hello() {
    let config = test_config();
    let result = executor(&config)
        .execute(&go_request("hello.go"))
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Ok);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.text, "hi\n");
    assert!(result.stderr.is_empty());
    assert!(result.compilation_time_ms > 0.0);
    assert!(result.execution_time_ms.is_some());
}

#[tokio::test]
#[ignore = "requires bwrap and a Go toolchain"]
async fn test_go_compile_error() {
    let config = test_config();
    let result = executor(&config)
        .execute(&go_request("compile_error.go"))
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_ne!(result.exit_code, 0);
    assert!(result.stderr.text.contains("undefined"));
    assert_eq!(result.execution_time_ms, None);
}

#[tokio::test]
#[ignore = "requires bwrap and a Go toolchain"]
async fn test_go_infinite_loop_times_out() {
    let config = test_config();
    let request = go_request("infinite_loop.go")
        .with_run_limits(ResourceLimits::new().with_wall_time(1).with_cpu_time(30));
    let result = executor(&config)
        .execute(&request)
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::RunTimeout);
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.stderr.text, "execution timed out after 1 s");
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_c_hello() {
    let config = test_config();
    let result = executor(&config)
        .execute(&c_request("hello.c"))
        .await
        .expect("Execution failed");

    assert!(result.is_success());
    assert_eq!(result.stdout.text, "hi\n");
    assert_eq!(result.stdout.data, b"hi\n");
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_c_compile_error() {
    let config = test_config();
    let result = executor(&config)
        .execute(&c_request("compile_error.c"))
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert!(result.stderr.text.contains("undefined_variable"));
    assert!(result.stdout.is_empty());
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_c_exit_code_and_stderr() {
    let config = test_config();
    let result = executor(&config)
        .execute(&c_request("exit_code.c"))
        .await
        .expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.exit_code, 42);
    assert_eq!(result.stderr.text, "something went wrong\n");
    assert!(result.stdout.is_empty());
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_workspaces_are_removed() {
    let scratch = tempfile::tempdir().expect("Failed to create scratch dir");
    let mut config = test_config();
    config.scratch_dir = Some(scratch.path().to_path_buf());
    let executor = executor(&config);

    for fixture in ["hello.c", "compile_error.c", "exit_code.c"] {
        executor
            .execute(&c_request(fixture))
            .await
            .expect("Execution failed");
    }

    let left = std::fs::read_dir(scratch.path())
        .expect("Failed to read scratch dir")
        .count();
    assert_eq!(left, 0);
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_program_cannot_write_host() {
    let config = test_config();
    let result = executor(&config)
        .execute(&c_request("escape.c"))
        .await
        .expect("Execution failed");

    assert!(result.is_success());
    assert_eq!(result.stdout.text, "contained\n");
}
