// SPDX-License-Identifier: GPL-3.0-only

//! `CommandRunner` backed by `tokio::process`

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use lun_contracts::traits::command::render;
use lun_contracts::{CommandOutput, CommandRunner, ConnectorError, Result};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs host tools, bounding each invocation by a timeout.
#[derive(Debug, Clone)]
pub struct HostCommandRunner {
    timeout: Duration,
}

impl HostCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HostCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let rendered = render(program, args);
        debug!(command = %rendered, "running");

        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) if error.kind() == io::ErrorKind::NotFound => {
                return Err(ConnectorError::ToolMissing(program.to_string()));
            }
            Ok(Err(error)) => {
                return Err(ConnectorError::CommandFailed {
                    command: rendered,
                    stderr: error.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %rendered, timeout = ?self.timeout, "command timed out");
                return Err(ConnectorError::CommandFailed {
                    command: rendered,
                    stderr: format!("timed out after {:?}", self.timeout),
                });
            }
        };

        let result = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success {
            debug!(command = %rendered, code = ?result.code, stderr = %result.stderr, "command exited non-zero");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_trimmed_stdout() {
        let runner = HostCommandRunner::default();
        let output = runner.run("echo", &["  mpatha  "]).await.expect("echo runs");
        assert!(output.success);
        assert_eq!(output.stdout, "mpatha");
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_tool_missing() {
        let runner = HostCommandRunner::default();
        let error = runner
            .run("definitely-not-an-installed-tool", &[])
            .await
            .expect_err("spawn should fail");
        assert!(matches!(error, ConnectorError::ToolMissing(_)));
    }

    #[tokio::test]
    async fn run_checked_rejects_non_zero_exit() {
        let runner = HostCommandRunner::default();
        let error = runner
            .run_checked("false", &[])
            .await
            .expect_err("false exits non-zero");
        assert!(matches!(error, ConnectorError::CommandFailed { .. }));
    }
}
