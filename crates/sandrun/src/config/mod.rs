use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, Language, RunConfig, is_plain_file_name,
};
use crate::types::{MountConfig, ResourceLimits, Stage};

pub mod language;
mod loader;

pub use crate::config::loader::CONFIG_PATH_ENV;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../sandrun.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for Sandrun
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the bubblewrap binary (uses PATH if not specified).
    #[serde(default)]
    pub bwrap_path: Option<PathBuf>,

    /// Root of the installed toolchains, laid out as `<root>/<language>/<version>`.
    #[serde(default = "default_toolchain_root")]
    pub toolchain_root: PathBuf,

    /// Root of the install/pack scripts, laid out as `<root>/<language>/<version>/*.sh`.
    #[serde(default = "default_scripts_root")]
    pub scripts_root: PathBuf,

    /// Directory under which per-request workspaces are created
    /// (the system temp directory if not specified).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Global read-only mounts applied to every sandbox invocation
    /// (both compilation and execution).
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Result cache and concurrency settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Default per-stage limits, used when a request leaves a value unset
    #[serde(default)]
    pub limits: StageLimits,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached result in seconds; 0 disables the cache
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    /// Maximum number of sandboxed executions in flight
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// How long a request may wait for a free slot, in seconds (unbounded if not set)
    #[serde(default)]
    pub acquire_timeout: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl > 0).then(|| Duration::from_secs(self.ttl))
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            max_parallel: default_max_parallel(),
            acquire_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageLimits {
    #[serde(default)]
    pub compile: ResourceLimits,

    #[serde(default)]
    pub run: ResourceLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            bwrap_path: None,
            toolchain_root: default_toolchain_root(),
            scripts_root: default_scripts_root(),
            scratch_dir: None,
            sandbox_mounts: Vec::new(),
            cache: CacheConfig::default(),
            limits: StageLimits::default(),
            server: ServerConfig::default(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Get the path to the bubblewrap binary
    pub fn bwrap_binary(&self) -> PathBuf {
        self.bwrap_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("bwrap"))
    }

    /// Default limits for a stage: built-in defaults overridden by the configured ones
    pub fn stage_defaults(&self, stage: Stage) -> ResourceLimits {
        match stage {
            Stage::Compile => {
                ResourceLimits::compile_defaults().with_overrides(&self.limits.compile)
            }
            Stage::Run => ResourceLimits::run_defaults().with_overrides(&self.limits.run),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_toolchain_root() -> PathBuf {
    PathBuf::from("/data")
}

fn default_scripts_root() -> PathBuf {
    PathBuf::from("/app/scripts/packages")
}

fn default_ttl() -> u64 {
    60
}

fn default_max_parallel() -> usize {
    5
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}
