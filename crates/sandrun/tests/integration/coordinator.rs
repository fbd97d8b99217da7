use std::sync::Arc;

use sandrun::ExecutionStatus;

use super::{c_request, executor, test_config};

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_second_request_is_cached() {
    let config = test_config();
    let executor = executor(&config);

    let first = executor
        .execute(&c_request("hello.c"))
        .await
        .expect("Execution failed");
    let second = executor
        .execute(&c_request("hello.c"))
        .await
        .expect("Execution failed");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(executor.cache().expect("cache enabled").len().await, 1);
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_concurrent_identical_requests_share_result() {
    let config = test_config();
    let executor = Arc::new(executor(&config));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&c_request("hello.c")).await })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.expect("task panicked").expect("Execution failed"));
    }

    assert_eq!(results[0].status, ExecutionStatus::Ok);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

#[tokio::test]
#[ignore = "requires bwrap and gcc"]
async fn test_failures_are_cached_too() {
    let config = test_config();
    let executor = executor(&config);

    let first = executor
        .execute(&c_request("compile_error.c"))
        .await
        .expect("Execution failed");
    let second = executor
        .execute(&c_request("compile_error.c"))
        .await
        .expect("Execution failed");

    assert_eq!(first.status, ExecutionStatus::CompileError);
    assert!(Arc::ptr_eq(&first, &second));
}
