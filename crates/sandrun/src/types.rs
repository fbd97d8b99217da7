use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Exit code reported when a stage exceeded its wall-clock timeout.
///
/// Real processes never produce it: signal deaths are reported as `128 + signal`.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock timeout in seconds
    #[serde(default)]
    pub wall_time: Option<u64>,

    /// CPU time limit in seconds (RLIMIT_CPU)
    #[serde(default)]
    pub cpu_time: Option<u64>,

    /// Virtual memory limit in kilobytes (RLIMIT_AS)
    #[serde(default)]
    pub memory: Option<u64>,

    /// Maximum captured size of each output stream in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Create new resource limits with all fields unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Build limits from raw request values where zero means "not supplied"
    pub fn from_raw(wall_time: u64, cpu_time: u64, memory: u64) -> Self {
        let non_zero = |value: u64| (value != 0).then_some(value);
        Self {
            wall_time: non_zero(wall_time),
            cpu_time: non_zero(cpu_time),
            memory: non_zero(memory),
            max_output: None,
        }
    }

    /// Set the wall clock timeout in seconds
    pub fn with_wall_time(mut self, seconds: u64) -> Self {
        self.wall_time = Some(seconds);
        self
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time(mut self, seconds: u64) -> Self {
        self.cpu_time = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory(mut self, kb: u64) -> Self {
        self.memory = Some(kb);
        self
    }

    /// Set the per-stream output cap in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            wall_time: overrides.wall_time.or(self.wall_time),
            cpu_time: overrides.cpu_time.or(self.cpu_time),
            memory: overrides.memory.or(self.memory),
            max_output: overrides.max_output.or(self.max_output),
        }
    }

    /// Defaults used for the compile stage when the configuration sets nothing
    pub fn compile_defaults() -> Self {
        Self {
            wall_time: Some(10),
            cpu_time: Some(10),
            memory: Some(Self::GB),
            max_output: Some(64 * Self::MB),
        }
    }

    /// Defaults used for the run stage when the configuration sets nothing
    pub fn run_defaults() -> Self {
        Self {
            wall_time: Some(5),
            cpu_time: Some(5),
            memory: Some(256 * Self::MB),
            max_output: Some(64 * Self::MB),
        }
    }
}

/// Configuration for a bind mount into the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (don't fail if source doesn't exist)
    #[serde(default)]
    pub optional: bool,
}

impl MountConfig {
    /// Read-only bind of `path` at the same location inside the sandbox
    pub fn read_only(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: path,
            writable: false,
            optional: false,
        }
    }
}

/// One of the two sandboxed phases of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compile,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => f.write_str("compile"),
            Stage::Run => f.write_str("run"),
        }
    }
}

/// A request to compile and run a piece of source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Language identifier (registry key)
    pub language: String,

    /// Toolchain version
    pub version: String,

    /// Source code bytes
    pub code: Vec<u8>,

    /// Name the source is written under; the language default when `None`
    pub filename: Option<String>,

    /// Per-request compile stage overrides
    pub compile_limits: ResourceLimits,

    /// Per-request run stage overrides
    pub run_limits: ResourceLimits,
}

impl ExecutionRequest {
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        code: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            language: language.into(),
            version: version.into(),
            code: code.into(),
            filename: None,
            compile_limits: ResourceLimits::default(),
            run_limits: ResourceLimits::default(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_compile_limits(mut self, limits: ResourceLimits) -> Self {
        self.compile_limits = limits;
        self
    }

    pub fn with_run_limits(mut self, limits: ResourceLimits) -> Self {
        self.run_limits = limits;
        self
    }
}

/// Captured output stream, kept both raw and decoded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub data: Vec<u8>,
    pub text: String,
}

impl CapturedOutput {
    /// Capture raw bytes; invalid UTF-8 is decoded lossily
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let text = String::from_utf8_lossy(&data).into_owned();
        Self { data, text }
    }

    /// A message with no raw payload behind it (e.g. a timeout notice)
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            text: text.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.text.is_empty()
    }
}

/// Classification of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Compiled and ran to a zero exit code
    Ok,

    /// Compiler exited non-zero or was killed
    CompileError,

    /// Compile stage exceeded its wall timeout
    CompileTimeout,

    /// Program exited non-zero or was killed
    RuntimeError,

    /// Run stage exceeded its wall timeout
    RunTimeout,
}

impl ExecutionStatus {
    /// The stage that failed, or `None` on success
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            ExecutionStatus::Ok => None,
            ExecutionStatus::CompileError | ExecutionStatus::CompileTimeout => Some(Stage::Compile),
            ExecutionStatus::RuntimeError | ExecutionStatus::RunTimeout => Some(Stage::Run),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::CompileTimeout | ExecutionStatus::RunTimeout
        )
    }
}

/// Result of an execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,

    /// Wall clock time of the compile stage in milliseconds (0 for interpreted languages)
    pub compilation_time_ms: f64,

    /// Wall clock time of the run stage in milliseconds; absent when compilation failed
    pub execution_time_ms: Option<f64>,

    pub stdout: CapturedOutput,

    pub stderr: CapturedOutput,

    /// Process exit code, or [`TIMEOUT_EXIT_CODE`]
    pub exit_code: i32,

    /// When the execution finished
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Check if the execution was successful (ran and exited with code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Ok) && self.exit_code == 0
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.status.is_timeout()
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ExecutionResult", 9)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("compilation_time_ms", &self.compilation_time_ms)?;
        match self.execution_time_ms {
            Some(ms) => state.serialize_field("execution_time_ms", &ms)?,
            None => state.skip_field("execution_time_ms")?,
        }
        state.serialize_field("stdout", &self.stdout.text)?;
        state.serialize_field("stdout_data", &STANDARD.encode(&self.stdout.data))?;
        state.serialize_field("stderr_text", &self.stderr.text)?;
        state.serialize_field("stderr_data", &STANDARD.encode(&self.stderr.data))?;
        state.serialize_field("exit_code", &self.exit_code)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}
