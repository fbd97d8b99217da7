use std::collections::BTreeMap;

use sandrun::config::DEFAULT_SANDBOX_PATH;
use sandrun::sandbox::{Bubblewrap, Invocation, Sandbox, SandboxOutput, SandboxStatus, Workspace};
use sandrun::ResourceLimits;

use super::test_config;

async fn run_shell(workspace: &Workspace, script: &str) -> SandboxOutput {
    let config = test_config();
    let sandbox = Bubblewrap::new(config.bwrap_binary());

    let mut invocation = Invocation::new(
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
        workspace.path(),
    );
    invocation.mounts = config.sandbox_mounts.clone();
    invocation.env = BTreeMap::from([("PATH".to_string(), DEFAULT_SANDBOX_PATH.to_string())]);
    invocation.limits = ResourceLimits::run_defaults();

    sandbox.run(invocation).await.expect("Sandbox failed")
}

#[tokio::test]
#[ignore = "requires bwrap"]
async fn test_runs_in_workspace() {
    let workspace = Workspace::create(None).expect("Failed to create workspace");
    let output = run_shell(&workspace, "pwd; echo data > out.txt").await;

    assert_eq!(output.status, SandboxStatus::Exited(0));
    assert_eq!(output.stdout, b"/job\n");
    let written = std::fs::read(workspace.path().join("out.txt")).expect("file not written");
    assert_eq!(written, b"data\n");
}

#[tokio::test]
#[ignore = "requires bwrap"]
async fn test_host_filesystem_is_read_only() {
    let workspace = Workspace::create(None).expect("Failed to create workspace");
    let output = run_shell(&workspace, "touch /usr/sandrun-escape").await;

    assert_ne!(output.status, SandboxStatus::Exited(0));
    assert!(!std::path::Path::new("/usr/sandrun-escape").exists());
}

#[tokio::test]
#[ignore = "requires bwrap"]
async fn test_no_network_interfaces_but_loopback() {
    let workspace = Workspace::create(None).expect("Failed to create workspace");
    let output = run_shell(&workspace, "cat /proc/net/dev").await;

    assert_eq!(output.status, SandboxStatus::Exited(0));
    let text = String::from_utf8_lossy(&output.stdout);
    let interfaces: Vec<&str> = text
        .lines()
        .skip(2)
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .collect();
    assert_eq!(interfaces, vec!["lo"]);
}

#[tokio::test]
#[ignore = "requires bwrap"]
async fn test_environment_is_cleared() {
    let workspace = Workspace::create(None).expect("Failed to create workspace");
    let output = run_shell(&workspace, "echo \"home=${HOME:-unset}\"; echo \"path=$PATH\"").await;

    assert_eq!(output.stdout, b"home=unset\npath=/usr/bin:/bin\n");
}

#[tokio::test]
#[ignore = "requires bwrap"]
async fn test_private_tmp() {
    let marker = format!("/tmp/sandrun-marker-{}", std::process::id());
    std::fs::write(&marker, b"host").expect("Failed to write marker");

    let workspace = Workspace::create(None).expect("Failed to create workspace");
    let output = run_shell(&workspace, &format!("test -e {marker}")).await;
    std::fs::remove_file(&marker).ok();

    assert_eq!(output.status, SandboxStatus::Exited(1));
}
