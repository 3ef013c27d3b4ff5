// ABOUTME: Single entry point for running external client tools
// ABOUTME: Enforces the configured timeout with a hard process kill

use crate::error::PipelineError;
use anyhow::{Context, Result};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Command;

/// Captured outcome of one tool invocation. Streams the caller redirected
/// elsewhere (e.g. a dump file) come back empty.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Human-readable exit status, covering signal termination on Unix.
    pub fn status_text(&self) -> String {
        describe_status(&self.status)
    }
}

pub fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Run a fully configured command to completion.
///
/// The child is spawned kill-on-drop; if `timeout` elapses the child is
/// killed and the invocation fails with `ToolTimedOut`. There is no default
/// timeout — a hung tool blocks the run unless one is configured.
pub async fn run_tool(
    mut cmd: Command,
    tool: &str,
    timeout: Option<Duration>,
) -> Result<ToolOutput> {
    cmd.kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to launch '{}'", tool))?;

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| PipelineError::ToolTimedOut {
                tool: tool.to_string(),
                seconds: limit.as_secs(),
            })?,
        None => child.wait_with_output().await,
    }
    .with_context(|| format!("failed to collect output of '{}'", tool))?;

    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn captures_stdout_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo hello; exit 3")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let out = run_tool(cmd, "sh", None).await.unwrap();
        assert!(!out.success());
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn kills_a_hung_tool_at_the_timeout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("sleep 30")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = std::time::Instant::now();
        let err = run_tool(cmd, "sleeper", Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));

        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(
            pipeline_err,
            PipelineError::ToolTimedOut { tool, .. } if tool == "sleeper"
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails_at_spawn() {
        let mut cmd = Command::new("/nonexistent/binary");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        assert!(run_tool(cmd, "ghost", None).await.is_err());
    }
}
