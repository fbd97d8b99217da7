//! Per-language runners
//!
//! A [`Runner`] takes source code through write, optional compile and run
//! stages inside a fresh workspace and reports an [`ExecutionResult`]. The
//! [`Registry`] maps language identifiers to runners.

use async_trait::async_trait;
use thiserror::Error;

pub use crate::runner::pipeline::{PipelineRunner, PipelineSettings};
pub use crate::runner::registry::Registry;

mod pipeline;
mod registry;

use crate::{
    sandbox::SandboxError,
    types::{ExecutionRequest, ExecutionResult, ResourceLimits, Stage},
};

/// Errors that keep a runner from producing a result
///
/// Compile errors, runtime errors and timeouts of the user's program are not
/// errors: they come back as an [`ExecutionResult`] with the matching status.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid source file name: '{0}'")]
    InvalidFilename(String),

    #[error("invalid version: '{0}'")]
    InvalidVersion(String),

    #[error("toolchain for {language} {version} is not installed at {path}")]
    ToolchainMissing {
        language: String,
        version: String,
        path: String,
    },

    #[error("workspace error: {0}")]
    Workspace(#[source] SandboxError),

    #[error("{stage} stage failed: {source}")]
    Sandbox {
        stage: Stage,
        #[source]
        source: SandboxError,
    },

    #[error("compiler exited successfully but produced no '{0}'")]
    MissingArtifact(String),
}

impl RunnerError {
    /// The stage the failure is attributed to, if it got that far
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunnerError::Sandbox { stage, .. } => Some(*stage),
            RunnerError::MissingArtifact(_) => Some(Stage::Compile),
            _ => None,
        }
    }
}

/// Input handed to a runner
#[derive(Debug, Clone, Copy)]
pub struct Job<'a> {
    /// Source code, written verbatim
    pub source: &'a [u8],
    /// Language version, selects the toolchain directory
    pub version: &'a str,
    /// Source file name; the language default is used when absent
    pub filename: Option<&'a str>,
    /// Per-request compile limits, applied over the configured ones
    pub compile_limits: &'a ResourceLimits,
    /// Per-request run limits, applied over the configured ones
    pub run_limits: &'a ResourceLimits,
}

impl<'a> Job<'a> {
    pub fn new(source: &'a [u8], version: &'a str) -> Self {
        const NO_OVERRIDES: &ResourceLimits = &ResourceLimits {
            wall_time: None,
            cpu_time: None,
            memory: None,
            max_output: None,
        };
        Self {
            source,
            version,
            filename: None,
            compile_limits: NO_OVERRIDES,
            run_limits: NO_OVERRIDES,
        }
    }

    pub fn from_request(request: &'a ExecutionRequest) -> Self {
        Self {
            source: &request.code,
            version: &request.version,
            filename: request.filename.as_deref(),
            compile_limits: &request.compile_limits,
            run_limits: &request.run_limits,
        }
    }
}

/// Language-specific execution capability
#[async_trait]
pub trait Runner: Send + Sync {
    /// Take `job` through compile (if any) and run, always cleaning up the workspace
    async fn execute(&self, job: Job<'_>) -> Result<ExecutionResult, RunnerError>;
}
