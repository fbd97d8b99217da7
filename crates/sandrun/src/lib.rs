//! A library for cached, concurrency-limited sandboxed code execution.
//!
//! Sandrun compiles and runs untrusted source code inside bubblewrap sandboxes
//! with memory, CPU and wall clock ceilings. Languages are described in TOML
//! and dispatched through a registry; identical requests are served from a
//! fingerprint cache and a global limiter bounds how many sandboxes run at once.
//!
//! # Features
//!
//! - **Sandboxed execution**: no network, read-only toolchain binds, a private
//!   workspace per request that is always removed afterwards.
//! - **Multi-language**: compiled and interpreted languages from configuration.
//! - **Result cache**: keyed by language, version and source, with TTL expiry
//!   and single-flight de-duplication of concurrent identical requests.
//! - **Concurrency limit**: a bounded permit pool with an optional wait timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sandrun::{Bubblewrap, Config, ExecutionRequest, Executor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let sandbox = Arc::new(Bubblewrap::new(config.bwrap_binary()));
//! let executor = Executor::from_config(&config, sandbox);
//!
//! let request = ExecutionRequest::new("python", "3.12", "print('hi')");
//! let result = executor.execute(&request).await?;
//! assert_eq!(result.stdout.text, "hi\n");
//! # Ok(())
//! # }
//! ```

pub use cache::{Fingerprint, FingerprintCache, InFlight};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use executor::{ExecuteError, Executor};
pub use langs::{LangError, LanguageManager};
pub use limiter::{ConcurrencyLimiter, LimiterError, Permit};
pub use runner::{Job, PipelineRunner, Registry, Runner, RunnerError};
pub use sandbox::{Bubblewrap, Sandbox, SandboxError};
pub use types::{
    CapturedOutput, ExecutionRequest, ExecutionResult, ExecutionStatus, MountConfig,
    ResourceLimits, Stage,
};

pub mod cache;
pub mod config;
pub mod executor;
pub mod langs;
pub mod limiter;
pub mod runner;
pub mod sandbox;
pub mod types;
