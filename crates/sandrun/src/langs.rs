//! Toolchain installation and packaging
//!
//! Each language version ships a directory of shell scripts at
//! `<scripts_root>/<language>/<version>/`: `install.sh` puts the toolchain in
//! place, `pack.sh` prepares extra packages for it. The manager only locates and
//! runs them; their output goes straight to the caller's terminal.

use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument};

use crate::config::{Config, is_plain_file_name};

/// Interpreter the scripts are run with
const SCRIPT_SHELL: &str = "/bin/bash";

/// Environment variable telling scripts where the toolchain belongs
pub const TOOLCHAIN_DIR_ENV: &str = "SANDRUN_TOOLCHAIN_DIR";

#[derive(Debug, Error)]
pub enum LangError {
    #[error("invalid {kind} name: '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("script {} failed with status {status}", script.display())]
    ScriptFailed { script: PathBuf, status: i32 },

    #[error("failed to run script: {0}")]
    Io(#[from] std::io::Error),
}

/// Script-driven toolchain manager
#[derive(Debug, Clone)]
pub struct LanguageManager {
    scripts_root: PathBuf,
    toolchain_root: PathBuf,
}

impl LanguageManager {
    pub fn new(scripts_root: impl Into<PathBuf>, toolchain_root: impl Into<PathBuf>) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            toolchain_root: toolchain_root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.scripts_root, &config.toolchain_root)
    }

    /// Install the toolchain for `language` at `version`
    #[instrument(skip(self))]
    pub async fn install(&self, language: &str, version: &str) -> Result<(), LangError> {
        info!("installing language");
        self.run_script(language, version, "install.sh").await
    }

    /// Install extra packages for an installed toolchain
    #[instrument(skip(self))]
    pub async fn pack(&self, language: &str, version: &str) -> Result<(), LangError> {
        info!("installing package");
        self.run_script(language, version, "pack.sh").await
    }

    /// Whether the toolchain directory for `language` at `version` exists
    pub fn is_installed(&self, language: &str, version: &str) -> bool {
        is_plain_file_name(language)
            && is_plain_file_name(version)
            && self.toolchain_dir(language, version).is_dir()
    }

    pub fn toolchain_dir(&self, language: &str, version: &str) -> PathBuf {
        self.toolchain_root.join(language).join(version)
    }

    pub fn script_path(&self, language: &str, version: &str, script: &str) -> PathBuf {
        self.scripts_root.join(language).join(version).join(script)
    }

    async fn run_script(
        &self,
        language: &str,
        version: &str,
        script: &str,
    ) -> Result<(), LangError> {
        check_name("language", language)?;
        check_name("version", version)?;

        let path = self.script_path(language, version, script);
        if !path.is_file() {
            return Err(LangError::ScriptNotFound(path));
        }

        let status = Command::new(SCRIPT_SHELL)
            .arg(&path)
            .env(TOOLCHAIN_DIR_ENV, self.toolchain_dir(language, version))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;

        if status.success() {
            info!(script = %path.display(), "script finished");
            Ok(())
        } else {
            Err(LangError::ScriptFailed {
                script: path,
                status: status.code().unwrap_or(-1),
            })
        }
    }
}

fn check_name(kind: &'static str, name: &str) -> Result<(), LangError> {
    if is_plain_file_name(name) {
        Ok(())
    } else {
        Err(LangError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}
