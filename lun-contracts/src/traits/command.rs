// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use crate::{ConnectorError, Result};

/// Captured result of one external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Trimmed standard output
    pub stdout: String,
    /// Trimmed standard error
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The tool failed because its target no longer exists.
    pub fn reports_absent(&self) -> bool {
        let text = format!("{} {}", self.stdout, self.stderr).to_ascii_lowercase();
        text.contains("no such file or directory")
            || text.contains("no such device")
            || text.contains("does not exist")
            || text.contains("not exist")
    }
}

pub fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Port through which the core runs every external tool.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`. A non-zero exit status is reported in the
    /// output, not as an error; only spawn failures are errors.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run and convert a non-zero exit status into `CommandFailed`.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(program, args).await?;
        if !output.success {
            return Err(ConnectorError::CommandFailed {
                command: render(program, args),
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}
