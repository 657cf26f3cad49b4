//! Test runner invocation
//!
//! Launches `<interpreter> <entrypoint>` as one child process, waits for it
//! and captures both output streams in full. The exit status is recorded
//! but never interpreted here; see [`crate::report`] for the verdict.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::config::{Settings, TEST_RUN_STAGE};
use crate::common::{Error, Result};

/// Captured outcome of one test-suite invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Full standard output text
    pub stdout: String,
    /// Full standard error text
    pub stderr: String,
    /// Exit code; `None` when the child was killed by a signal
    pub exit_status: Option<i32>,
    /// Command line that was run, for logging
    pub command: String,
}

/// Something that can run the test suite
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, entrypoint: &Path) -> Result<ExecutionResult>;
}

/// Runs the suite as a real child process
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    interpreter: String,
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: None,
        }
    }

    /// Build from the settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.runner.interpreter.clone())
            .with_timeout(settings.timeouts.test_run_secs.map(Duration::from_secs))
    }

    /// Kill the child and fail if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self, entrypoint: &Path) -> String {
        format!("{} {}", self.interpreter, entrypoint.display())
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(&self, entrypoint: &Path) -> Result<ExecutionResult> {
        let command = self.command_line(entrypoint);

        let interpreter = which::which(&self.interpreter).map_err(|e| Error::InvocationFailure {
            command: command.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, e.to_string()),
        })?;
        tracing::debug!("Resolved interpreter {} to {}", self.interpreter, interpreter.display());

        let child = Command::new(&interpreter)
            .arg(entrypoint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::InvocationFailure {
                command: command.clone(),
                source,
            })?;

        tracing::info!(pid = child.id(), "Running {}", command);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::timeout(TEST_RUN_STAGE, limit.as_secs()))??,
            None => child.wait_with_output().await?,
        };

        let result = ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code(),
            command,
        };

        tracing::info!(
            exit_status = ?result.exit_status,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Test command finished"
        );

        Ok(result)
    }
}
