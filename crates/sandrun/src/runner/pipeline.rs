//! Compile-then-run pipeline driven by a language configuration
//!
//! Every execution walks the same states: write the source into a fresh
//! workspace, compile it (compiled languages only), run the result, then
//! remove the workspace. A compile failure or timeout ends the pipeline early
//! with the run stage skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, Language, is_plain_file_name};
use crate::runner::{Job, Runner, RunnerError};
use crate::sandbox::{Invocation, Sandbox, SandboxOutput, SandboxStatus, Workspace};
use crate::types::{
    CapturedOutput, ExecutionResult, ExecutionStatus, MountConfig, ResourceLimits, Stage,
    TIMEOUT_EXIT_CODE,
};

/// Host-wide settings shared by every pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Toolchains live at `<toolchain_root>/<language>/<version>`
    pub toolchain_root: PathBuf,
    /// Parent directory for workspaces; the system temp dir when `None`
    pub scratch_dir: Option<PathBuf>,
    /// Binds added to every stage
    pub sandbox_mounts: Vec<MountConfig>,
    pub compile_defaults: ResourceLimits,
    pub run_defaults: ResourceLimits,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            toolchain_root: config.toolchain_root.clone(),
            scratch_dir: config.scratch_dir.clone(),
            sandbox_mounts: config.sandbox_mounts.clone(),
            compile_defaults: config.stage_defaults(Stage::Compile),
            run_defaults: config.stage_defaults(Stage::Run),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            toolchain_root: PathBuf::from("/data"),
            scratch_dir: None,
            sandbox_mounts: Vec::new(),
            compile_defaults: ResourceLimits::compile_defaults(),
            run_defaults: ResourceLimits::run_defaults(),
        }
    }
}

/// [`Runner`] for one configured language
pub struct PipelineRunner {
    id: String,
    language: Language,
    sandbox: Arc<dyn Sandbox>,
    settings: PipelineSettings,
}

/// How the compile stage ended
enum CompileOutcome {
    /// Artifact is in place (or nothing to build); carries the stage's wall time
    Built(Duration),
    /// Pipeline ends here with this result
    Stopped(ExecutionResult),
}

/// Names and paths resolved for a single job
struct Prepared<'a> {
    source_name: &'a str,
    binary_name: &'a str,
    toolchain: Option<String>,
}

impl Prepared<'_> {
    fn toolchain_str(&self) -> &str {
        self.toolchain.as_deref().unwrap_or_default()
    }

    fn toolchain_mount(&self) -> Option<MountConfig> {
        self.toolchain.clone().map(MountConfig::read_only)
    }
}

impl PipelineRunner {
    pub fn new(
        id: impl Into<String>,
        language: Language,
        sandbox: Arc<dyn Sandbox>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            id: id.into(),
            language,
            sandbox,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Effective compile limits: configured defaults, then language, then request
    pub fn compile_limits(&self, overrides: &ResourceLimits) -> ResourceLimits {
        let language = self
            .language
            .compile
            .as_ref()
            .and_then(|compile| compile.limits)
            .unwrap_or_default();
        self.settings
            .compile_defaults
            .with_overrides(&language)
            .with_overrides(overrides)
    }

    /// Effective run limits: configured defaults, then language, then request
    pub fn run_limits(&self, overrides: &ResourceLimits) -> ResourceLimits {
        let language = self.language.run.limits.unwrap_or_default();
        self.settings
            .run_defaults
            .with_overrides(&language)
            .with_overrides(overrides)
    }

    fn prepare<'a>(&'a self, job: &Job<'a>) -> Result<Prepared<'a>, RunnerError> {
        if !is_plain_file_name(job.version) {
            return Err(RunnerError::InvalidVersion(job.version.to_string()));
        }

        let source_name = job.filename.unwrap_or(&self.language.source_name);
        if !is_plain_file_name(source_name) {
            return Err(RunnerError::InvalidFilename(source_name.to_string()));
        }

        // interpreted languages have no artifact; {binary} falls back to the source
        let binary_name = self
            .language
            .compile
            .as_ref()
            .map_or(source_name, |compile| compile.output_name.as_str());

        let toolchain = if self.language.toolchain {
            let path = toolchain_dir(&self.settings.toolchain_root, &self.id, job.version);
            if !path.is_dir() {
                return Err(RunnerError::ToolchainMissing {
                    language: self.id.clone(),
                    version: job.version.to_string(),
                    path: path.display().to_string(),
                });
            }
            Some(path.to_string_lossy().into_owned())
        } else {
            None
        };

        Ok(Prepared {
            source_name,
            binary_name,
            toolchain,
        })
    }

    fn environment(
        path: &str,
        vars: &std::collections::HashMap<String, String>,
        prepared: &Prepared<'_>,
    ) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = vars
            .iter()
            .map(|(key, value)| {
                let value = Language::expand(
                    value,
                    prepared.source_name,
                    prepared.binary_name,
                    prepared.toolchain_str(),
                );
                (key.clone(), value)
            })
            .collect();
        env.insert("PATH".to_string(), path.to_string());
        env
    }

    async fn compile(
        &self,
        workspace: &Workspace,
        prepared: &Prepared<'_>,
        overrides: &ResourceLimits,
    ) -> Result<CompileOutcome, RunnerError> {
        let Some(compile) = &self.language.compile else {
            return Ok(CompileOutcome::Built(Duration::ZERO));
        };

        let mut invocation = Invocation::new(
            Language::expand_command(
                &compile.command,
                prepared.source_name,
                prepared.binary_name,
                prepared.toolchain_str(),
            ),
            workspace.path(),
        );
        invocation.mounts = self.settings.sandbox_mounts.clone();
        invocation.mounts.extend(prepared.toolchain_mount());
        invocation.env = Self::environment(&compile.path, &compile.env, prepared);
        invocation.limits = self.compile_limits(overrides);
        let wall_time = invocation.limits.wall_time.unwrap_or_default();

        debug!(command = ?invocation.command, "compiling");
        let output = self
            .sandbox
            .run(invocation)
            .await
            .map_err(|source| RunnerError::Sandbox {
                stage: Stage::Compile,
                source,
            })?;
        let SandboxOutput {
            status,
            stdout,
            stderr,
            elapsed,
            ..
        } = output;

        match status {
            SandboxStatus::TimedOut => {
                info!(wall_time, "compilation timed out");
                Ok(CompileOutcome::Stopped(ExecutionResult {
                    status: ExecutionStatus::CompileTimeout,
                    compilation_time_ms: millis(elapsed),
                    execution_time_ms: None,
                    stdout: CapturedOutput::default(),
                    stderr: CapturedOutput::message(format!(
                        "compilation timed out after {wall_time} s"
                    )),
                    exit_code: TIMEOUT_EXIT_CODE,
                    timestamp: Utc::now(),
                }))
            }
            SandboxStatus::Exited(code) if code != 0 => {
                info!(exit_code = code, "compilation failed");
                // compilers are not consistent about which stream carries diagnostics
                let mut combined = stdout;
                combined.extend_from_slice(&stderr);
                Ok(CompileOutcome::Stopped(ExecutionResult {
                    status: ExecutionStatus::CompileError,
                    compilation_time_ms: millis(elapsed),
                    execution_time_ms: None,
                    stdout: CapturedOutput::default(),
                    stderr: CapturedOutput::from_bytes(combined),
                    exit_code: code,
                    timestamp: Utc::now(),
                }))
            }
            SandboxStatus::Exited(_) => {
                let produced = workspace
                    .file_exists(prepared.binary_name)
                    .await
                    .map_err(RunnerError::Workspace)?;
                if !produced {
                    return Err(RunnerError::MissingArtifact(
                        prepared.binary_name.to_string(),
                    ));
                }
                debug!(?elapsed, "compilation succeeded");
                Ok(CompileOutcome::Built(elapsed))
            }
        }
    }

    /// Run the program
    async fn run(
        &self,
        workspace: &Workspace,
        prepared: &Prepared<'_>,
        overrides: &ResourceLimits,
        compile_elapsed: Duration,
    ) -> Result<ExecutionResult, RunnerError> {
        let run = &self.language.run;

        let mut invocation = Invocation::new(
            Language::expand_command(
                &run.command,
                prepared.source_name,
                prepared.binary_name,
                prepared.toolchain_str(),
            ),
            workspace.path(),
        );
        invocation.mounts = self.settings.sandbox_mounts.clone();
        // compiled programs don't get the toolchain
        if !self.language.is_compiled() {
            invocation.mounts.extend(prepared.toolchain_mount());
        }
        invocation.mounts.extend(run.mounts.iter().cloned());
        invocation.env = Self::environment(&run.path, &run.env, prepared);
        invocation.limits = self.run_limits(overrides);
        let wall_time = invocation.limits.wall_time.unwrap_or_default();

        debug!(command = ?invocation.command, "running");
        let output = self
            .sandbox
            .run(invocation)
            .await
            .map_err(|source| RunnerError::Sandbox {
                stage: Stage::Run,
                source,
            })?;

        let result = match output.status {
            SandboxStatus::TimedOut => {
                info!(wall_time, "execution timed out");
                ExecutionResult {
                    status: ExecutionStatus::RunTimeout,
                    compilation_time_ms: millis(compile_elapsed),
                    execution_time_ms: Some(millis(output.elapsed)),
                    stdout: CapturedOutput::default(),
                    stderr: CapturedOutput::message(format!(
                        "execution timed out after {wall_time} s"
                    )),
                    exit_code: TIMEOUT_EXIT_CODE,
                    timestamp: Utc::now(),
                }
            }
            SandboxStatus::Exited(code) => ExecutionResult {
                status: if code == 0 {
                    ExecutionStatus::Ok
                } else {
                    ExecutionStatus::RuntimeError
                },
                compilation_time_ms: millis(compile_elapsed),
                execution_time_ms: Some(millis(output.elapsed)),
                stdout: CapturedOutput::from_bytes(output.stdout),
                stderr: CapturedOutput::from_bytes(output.stderr),
                exit_code: code,
                timestamp: Utc::now(),
            },
        };
        Ok(result)
    }

    async fn compile_and_run(
        &self,
        workspace: &Workspace,
        prepared: &Prepared<'_>,
        job: &Job<'_>,
    ) -> Result<ExecutionResult, RunnerError> {
        let compile_elapsed = match self.compile(workspace, prepared, job.compile_limits).await? {
            CompileOutcome::Built(elapsed) => elapsed,
            CompileOutcome::Stopped(result) => return Ok(result),
        };
        self.run(workspace, prepared, job.run_limits, compile_elapsed)
            .await
    }
}

#[async_trait]
impl Runner for PipelineRunner {
    #[instrument(skip(self, job), fields(language = %self.id, version = job.version))]
    async fn execute(&self, job: Job<'_>) -> Result<ExecutionResult, RunnerError> {
        let prepared = self.prepare(&job)?;

        let workspace = Workspace::create(self.settings.scratch_dir.as_deref())
            .map_err(RunnerError::Workspace)?;
        let result = match workspace.write_file(prepared.source_name, job.source).await {
            Ok(_) => self.compile_and_run(&workspace, &prepared, &job).await,
            Err(err) => Err(RunnerError::Workspace(err)),
        };

        if let Err(err) = workspace.close() {
            warn!(error = %err, "failed to remove workspace");
        }

        if let Ok(result) = &result {
            info!(status = ?result.status, exit_code = result.exit_code, "execution finished");
        }
        result
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("id", &self.id)
            .field("language", &self.language.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Toolchain directory for `language` at `version`
pub(crate) fn toolchain_dir(root: &Path, language: &str, version: &str) -> PathBuf {
    root.join(language).join(version)
}
