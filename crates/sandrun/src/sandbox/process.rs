//! Process spawning and I/O for the sandbox
//!
//! Runs a command with captured output under a wall clock timeout.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::sandbox::{
    Invocation, Sandbox, SandboxCommand, SandboxError, SandboxOutput, SandboxStatus,
    validate_mounts,
};

/// Bubblewrap-backed [`Sandbox`]
#[derive(Debug, Clone)]
pub struct Bubblewrap {
    bwrap_path: PathBuf,
}

impl Bubblewrap {
    pub fn new(bwrap_path: impl Into<PathBuf>) -> Self {
        Self {
            bwrap_path: bwrap_path.into(),
        }
    }

    /// Get the path to the bwrap binary
    pub fn bwrap_path(&self) -> &PathBuf {
        &self.bwrap_path
    }
}

#[async_trait]
impl Sandbox for Bubblewrap {
    #[instrument(skip(self, invocation), fields(command = ?invocation.command))]
    async fn run(&self, invocation: Invocation) -> Result<SandboxOutput, SandboxError> {
        validate_mounts(&invocation.mounts)?;

        let wall_timeout = invocation.wall_timeout();
        let output_limit = invocation.output_limit();
        let args = SandboxCommand::new(&self.bwrap_path)
            .limits(invocation.limits)
            .mounts(invocation.mounts)
            .workspace(&invocation.workspace)
            .envs(invocation.env)
            .command(invocation.command)
            .build();

        debug!(?args, "running sandboxed command");
        run_with_timeout(&args, wall_timeout, output_limit).await
    }
}

/// Spawn `args` and wait for it, killing it once `wall_timeout` expires
///
/// The child is spawned with `kill_on_drop`, so dropping the wait on timeout
/// delivers SIGKILL to it. Under bubblewrap the killed process is bwrap itself,
/// and `--die-with-parent` plus the private pid namespace take the rest of the
/// tree down with it.
///
/// At most `output_limit` bytes are kept from each stream. Anything past that
/// is read and thrown away so the child never stalls on a full pipe.
pub(crate) async fn run_with_timeout(
    args: &[String],
    wall_timeout: Option<Duration>,
    output_limit: Option<u64>,
) -> Result<SandboxOutput, SandboxError> {
    let program = args
        .first()
        .ok_or_else(|| SandboxError::CommandFailed("empty command arguments".to_string()))?;

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(&args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(SandboxError::SpawnFailed)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let wait = async {
        let (stdout, stderr) = tokio::try_join!(
            read_capped(stdout, output_limit),
            read_capped(stderr, output_limit)
        )?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    let (status, stdout, stderr) = match wall_timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(output) => output?,
            Err(_) => {
                let elapsed = start.elapsed();
                warn!(?limit, ?elapsed, "wall clock timeout expired, process killed");
                return Ok(SandboxOutput {
                    status: SandboxStatus::TimedOut,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    truncated: false,
                    elapsed,
                });
            }
        },
        None => wait.await?,
    };

    let elapsed = start.elapsed();
    let status = SandboxStatus::Exited(exit_code(status));
    let truncated = stdout.truncated || stderr.truncated;
    if truncated {
        warn!(limit = ?output_limit, "output exceeded the capture limit and was cut off");
    }
    debug!(?status, ?elapsed, "process finished");

    Ok(SandboxOutput {
        status,
        stdout: stdout.data,
        stderr: stderr.data,
        truncated,
        elapsed,
    })
}

struct Captured {
    data: Vec<u8>,
    truncated: bool,
}

/// Read a pipe to its end, keeping at most `limit` bytes
async fn read_capped<R>(pipe: Option<R>, limit: Option<u64>) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok(Captured {
            data,
            truncated: false,
        });
    };

    let truncated = match limit {
        Some(limit) => {
            (&mut pipe).take(limit).read_to_end(&mut data).await?;
            tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await? > 0
        }
        None => {
            pipe.read_to_end(&mut data).await?;
            false
        }
    };
    Ok(Captured { data, truncated })
}

/// Exit code of a finished process, with signal deaths mapped to `128 + signal`
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(128)
}
