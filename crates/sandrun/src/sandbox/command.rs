//! Command builder for bubblewrap
//!
//! Builds the argument vector that runs a command under bubblewrap with
//! shell-applied resource limits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::sandbox::SANDBOX_WORKDIR;
use crate::types::{MountConfig, ResourceLimits};

/// Builder for a resource-limited bubblewrap invocation
///
/// The result has the shape
/// `/bin/sh -c "ulimit -v KB && ulimit -t S && exec \"$@\"" sh bwrap <flags> -- <command>`:
/// limits are applied by the shell and inherited across `exec`, so they bind
/// the sandboxed tree without any code running between fork and exec.
#[derive(Debug)]
pub struct SandboxCommand {
    /// Path to the bwrap binary
    bwrap_path: PathBuf,
    /// ulimit -v / ulimit -t
    limits: ResourceLimits,
    /// --ro-bind / --bind (and -try variants)
    mounts: Vec<MountConfig>,
    /// --bind <workspace> /job --chdir /job
    workspace: Option<PathBuf>,
    /// --setenv
    env: BTreeMap<String, String>,
    command: Vec<String>,
}

impl SandboxCommand {
    /// Create a new bubblewrap command builder
    pub fn new(bwrap_path: impl Into<PathBuf>) -> Self {
        Self {
            bwrap_path: bwrap_path.into(),
            limits: ResourceLimits::default(),
            mounts: Vec::new(),
            workspace: None,
            env: BTreeMap::new(),
            command: Vec::new(),
        }
    }

    /// Set resource limits (only memory and CPU time end up in the argv)
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a bind mount
    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add multiple bind mounts
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Bind the host workspace read-write as the working directory
    pub fn workspace(mut self, path: impl AsRef<Path>) -> Self {
        self.workspace = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Set the command to run
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            limit_script(&self.limits),
            "sh".to_string(),
            self.bwrap_path.to_string_lossy().into_owned(),
        ];

        for flag in ["--unshare-all", "--die-with-parent", "--new-session"] {
            args.push(flag.to_string());
        }
        args.extend(["--dev", "/dev", "--proc", "/proc", "--tmpfs", "/tmp"].map(String::from));

        for mount in &self.mounts {
            let flag = match (mount.writable, mount.optional) {
                (false, false) => "--ro-bind",
                (false, true) => "--ro-bind-try",
                (true, false) => "--bind",
                (true, true) => "--bind-try",
            };
            args.push(flag.to_string());
            args.push(mount.source.clone());
            args.push(mount.target.clone());
        }

        if let Some(workspace) = self.workspace {
            args.push("--bind".to_string());
            args.push(workspace.to_string_lossy().into_owned());
            args.push(SANDBOX_WORKDIR.to_string());
            args.push("--chdir".to_string());
            args.push(SANDBOX_WORKDIR.to_string());
        }

        args.push("--clearenv".to_string());
        for (key, value) in self.env {
            args.push("--setenv".to_string());
            args.push(key);
            args.push(value);
        }

        args.push("--".to_string());
        args.extend(self.command);

        args
    }
}

/// Shell prologue applying RLIMIT_AS and RLIMIT_CPU before exec'ing bwrap
fn limit_script(limits: &ResourceLimits) -> String {
    let mut script = String::new();
    if let Some(memory) = limits.memory {
        script.push_str(&format!("ulimit -v {memory} && "));
    }
    if let Some(cpu) = limits.cpu_time {
        script.push_str(&format!("ulimit -t {cpu} && "));
    }
    script.push_str("exec \"$@\"");
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("{needle} not in {args:?}"))
    }

    #[test]
    fn test_basic_command() {
        let args = SandboxCommand::new("bwrap").command(vec!["./main"]).build();

        assert_eq!(args[0], "/bin/sh");
        assert_eq!(args[1], "-c");
        assert_eq!(args[2], "exec \"$@\"");
        assert_eq!(args[3], "sh");
        assert_eq!(args[4], "bwrap");
        assert!(args.contains(&"--unshare-all".to_string()));
        assert!(args.contains(&"--die-with-parent".to_string()));
        assert!(args.contains(&"--clearenv".to_string()));
        assert_eq!(args.last().unwrap(), "./main");
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn test_limits_in_prologue() {
        let limits = ResourceLimits::new()
            .with_memory(262144)
            .with_cpu_time(5)
            .with_wall_time(10);
        let args = SandboxCommand::new("bwrap")
            .limits(limits)
            .command(vec!["./main"])
            .build();

        assert_eq!(
            args[2],
            "ulimit -v 262144 && ulimit -t 5 && exec \"$@\""
        );
        // wall time is enforced by the caller, never by the shell
        assert!(!args[2].contains("10"));
    }

    #[test]
    fn test_mount_read_only() {
        let args = SandboxCommand::new("bwrap")
            .mount(MountConfig::read_only("/data/go/1.22"))
            .command(vec!["go"])
            .build();

        let at = position(&args, "--ro-bind");
        assert_eq!(args[at + 1], "/data/go/1.22");
        assert_eq!(args[at + 2], "/data/go/1.22");
    }

    #[test]
    fn test_mount_variants() {
        let mounts = vec![
            MountConfig {
                source: "/lib64".to_string(),
                target: "/lib64".to_string(),
                writable: false,
                optional: true,
            },
            MountConfig {
                source: "/tmp/data".to_string(),
                target: "/data".to_string(),
                writable: true,
                optional: false,
            },
            MountConfig {
                source: "/tmp/maybe".to_string(),
                target: "/maybe".to_string(),
                writable: true,
                optional: true,
            },
        ];
        let args = SandboxCommand::new("bwrap")
            .mounts(mounts)
            .command(vec!["./main"])
            .build();

        assert_eq!(args[position(&args, "--ro-bind-try") + 1], "/lib64");
        let bind = position(&args, "--bind");
        assert_eq!(args[bind + 1], "/tmp/data");
        assert_eq!(args[bind + 2], "/data");
        assert_eq!(args[position(&args, "--bind-try") + 2], "/maybe");
    }

    #[test]
    fn test_workspace_bind_and_chdir() {
        let args = SandboxCommand::new("bwrap")
            .workspace("/tmp/exec-abc")
            .command(vec!["./main"])
            .build();

        let bind = position(&args, "--bind");
        assert_eq!(args[bind + 1], "/tmp/exec-abc");
        assert_eq!(args[bind + 2], "/job");
        assert_eq!(args[position(&args, "--chdir") + 1], "/job");
    }

    #[test]
    fn test_env_after_clearenv() {
        let args = SandboxCommand::new("bwrap")
            .env("PATH", "/usr/bin")
            .env("GOCACHE", "/tmp")
            .command(vec!["./main"])
            .build();

        let clear = position(&args, "--clearenv");
        let setenv = position(&args, "--setenv");
        assert!(setenv > clear);
        // BTreeMap keeps variables sorted
        assert_eq!(args[setenv + 1], "GOCACHE");
        assert_eq!(args[setenv + 2], "/tmp");
        assert!(args.windows(3).any(|w| w == ["--setenv", "PATH", "/usr/bin"]));
    }

    #[test]
    fn test_command_arguments_follow_separator() {
        let args = SandboxCommand::new("/usr/bin/bwrap")
            .command(vec!["go", "build", "-o", "main.exe", "main.go"])
            .build();

        let sep = position(&args, "--");
        assert_eq!(&args[sep + 1..], ["go", "build", "-o", "main.exe", "main.go"]);
        assert_eq!(args[4], "/usr/bin/bwrap");
    }
}
