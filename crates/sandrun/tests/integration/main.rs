//! Integration tests for sandrun
//!
//! These tests run real bubblewrap sandboxes. They need `bwrap` and `gcc` on
//! the host; the Go tests also need a toolchain at
//! `<toolchain_root>/go/<version>` (version from `SANDRUN_TEST_GO_VERSION`,
//! default 1.22).
//! Run with: cargo test -p sandrun --features integration-tests
//!
//! Tests that need those tools are marked `#[ignore]`. To include them:
//!    cargo test -p sandrun --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::sync::Arc;

use sandrun::{Bubblewrap, Config, ExecutionRequest, Executor};

mod config_loading;
mod coordinator;
mod pipeline;
mod resource_limits;
mod sandbox;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> Vec<u8> {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Configuration under test: `$SANDRUN_CONFIG` if set, else the built-in one
pub(crate) fn test_config() -> Config {
    Config::load(None).expect("Failed to load config")
}

pub(crate) fn go_version() -> String {
    std::env::var("SANDRUN_TEST_GO_VERSION").unwrap_or_else(|_| "1.22".to_string())
}

pub(crate) fn executor(config: &Config) -> Executor {
    let sandbox = Arc::new(Bubblewrap::new(config.bwrap_binary()));
    Executor::from_config(config, sandbox)
}

/// Request for a fixture in the system C toolchain
pub(crate) fn c_request(fixture: &str) -> ExecutionRequest {
    ExecutionRequest::new("c", "system", fixture_source(fixture))
}

pub(crate) fn go_request(fixture: &str) -> ExecutionRequest {
    ExecutionRequest::new("go", go_version(), fixture_source(fixture))
}
