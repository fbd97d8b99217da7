//! Request-scoped workspace
//!
//! Each execution gets its own temporary directory, bound read-write into the
//! sandbox. The directory and everything in it (source, compiled artifact) is
//! removed when the [`Workspace`] is dropped, whichever way the pipeline ends.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::config::is_plain_file_name;
use crate::sandbox::SandboxError;

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `root`, or the system temp directory
    pub fn create(root: Option<&Path>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("exec-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(SandboxError::WorkspaceCreate)?;

        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    /// Host path of the workspace directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Get the host path to a file inside the workspace
    ///
    /// Only plain file names are accepted: no separators, no `..`.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if !is_plain_file_name(name) {
            return Err(SandboxError::InvalidPath(format!(
                "not a plain file name: {name}"
            )));
        }
        Ok(self.dir.path().join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf, SandboxError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(path)
    }

    /// Check if a file exists in the workspace
    pub async fn file_exists(&self, name: &str) -> Result<bool, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Remove the workspace, reporting failures that a plain drop would swallow
    pub fn close(self) -> Result<(), SandboxError> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|source| SandboxError::WorkspaceRemove { path, source })
    }
}
