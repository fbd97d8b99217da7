//! Resource-limited sandbox primitive
//!
//! A [`Sandbox`] runs one command in an isolated environment: no network, no
//! host filesystem beyond explicit binds, a private `/tmp`, and a per-request
//! workspace bound read-write at [`SANDBOX_WORKDIR`]. Memory and CPU ceilings
//! are enforced with resource limits and a wall-clock timeout kills the whole
//! process tree.
//!
//! [`Bubblewrap`] is the concrete implementation; runners only depend on the
//! trait, so another isolation mechanism can be swapped in.
//!
//! References for bubblewrap's CLI arguments:
//! - https://github.com/containers/bubblewrap

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::sandbox::command::SandboxCommand;
pub use crate::sandbox::process::Bubblewrap;
pub use crate::sandbox::workspace::Workspace;
use crate::types::{MountConfig, ResourceLimits};

mod command;
mod process;
mod workspace;

/// Where the request workspace is mounted inside the sandbox
pub const SANDBOX_WORKDIR: &str = "/job";

/// Errors that occur while constructing or driving a sandbox
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create workspace: {0}")]
    WorkspaceCreate(#[source] std::io::Error),

    #[error("failed to remove workspace {}: {source}", path.display())]
    WorkspaceRemove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn sandbox process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("sandbox command failed: {0}")]
    CommandFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(String),
}

/// A single sandboxed command
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program and arguments, resolved inside the sandbox
    pub command: Vec<String>,

    /// Host directory bound read-write at [`SANDBOX_WORKDIR`]
    pub workspace: PathBuf,

    /// Additional binds (toolchain, shared libraries)
    pub mounts: Vec<MountConfig>,

    /// Environment of the sandboxed process; nothing is inherited from the host
    pub env: BTreeMap<String, String>,

    /// Memory, CPU and wall clock ceilings
    pub limits: ResourceLimits,
}

impl Invocation {
    pub fn new(command: Vec<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workspace: workspace.into(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn wall_timeout(&self) -> Option<Duration> {
        self.limits.wall_time.map(Duration::from_secs)
    }

    /// Per-stream capture limit in bytes
    pub fn output_limit(&self) -> Option<u64> {
        self.limits.max_output.map(|kb| kb.saturating_mul(1024))
    }
}

/// How a sandboxed command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    /// Process exited; signal deaths are reported as `128 + signal`
    Exited(i32),

    /// Wall clock timeout expired and the process tree was killed
    TimedOut,
}

/// Captured result of one sandboxed command
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub status: SandboxStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set when either stream went over the output limit and was cut off
    pub truncated: bool,
    pub elapsed: Duration,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        self.status == SandboxStatus::Exited(0)
    }
}

/// Process-isolation capability used by runners
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run one command to completion or timeout
    ///
    /// Construction failures (spawn, missing mounts) are errors; the command's
    /// own failure is reported through [`SandboxStatus`].
    async fn run(&self, invocation: Invocation) -> Result<SandboxOutput, SandboxError>;
}

/// Validate that all mount source paths exist
///
/// Returns an error if any non-optional mount source path does not exist on the host filesystem.
/// Optional mounts (with `optional: true`) are silently skipped if the source doesn't exist.
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), SandboxError> {
    for mount in mounts {
        if mount.optional {
            continue;
        }
        if !Path::new(&mount.source).exists() {
            return Err(SandboxError::MountSourceNotFound(mount.source.clone()));
        }
    }
    Ok(())
}
