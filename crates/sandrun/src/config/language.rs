use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{MountConfig, ResourceLimits};

/// Default PATH for sandbox execution
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/bin:/bin";

/// Configuration for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "Go")
    pub name: String,

    /// Source file name used when a request does not supply one (e.g., "main.go")
    pub source_name: String,

    /// Whether the language needs an installed toolchain at
    /// `<toolchain_root>/<language>/<version>`
    #[serde(default = "default_true")]
    pub toolchain: bool,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Expand placeholders in the given command or environment value
    ///
    /// Placeholders: `{source}`, `{output}`/`{binary}`, `{toolchain}`. The
    /// template is scanned once, so substituted values are never expanded
    /// again; unknown `{...}` sequences are kept as they are.
    pub fn expand(template: &str, source: &str, binary: &str, toolchain: &str) -> String {
        let placeholders = [
            ("{source}", source),
            ("{output}", binary),
            ("{binary}", binary),
            ("{toolchain}", toolchain),
        ];
        let mut expanded = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            expanded.push_str(&rest[..open]);
            let tail = &rest[open..];
            match placeholders.iter().find(|(name, _)| tail.starts_with(name)) {
                Some((name, value)) => {
                    expanded.push_str(value);
                    rest = &tail[name.len()..];
                }
                None => {
                    expanded.push('{');
                    rest = &tail[1..];
                }
            }
        }
        expanded.push_str(rest);
        expanded
    }

    /// Expand placeholders in every argument of `command`
    pub fn expand_command(
        command: &[String],
        source: &str,
        binary: &str,
        toolchain: &str,
    ) -> Vec<String> {
        command
            .iter()
            .map(|arg| Self::expand(arg, source, binary, toolchain))
            .collect()
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    pub command: Vec<String>,

    /// Output artifact name (e.g., "main.exe")
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH inside the sandbox during compilation
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for compilation (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    pub command: Vec<String>,

    /// Environment Variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Extra directory mounts for the run stage
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// PATH environment variable for the sandbox
    ///
    /// Defaults to "/usr/bin:/bin" if not specified.
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}

fn default_true() -> bool {
    true
}

/// Check that `name` is a single, plain path component
///
/// Used for source file names, artifact names and toolchain versions, all of
/// which end up joined onto a host directory.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('-')
}
