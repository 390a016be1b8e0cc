//! The execution contract shared by the remote and local backends.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::interactive::is_interactive_command;

/// Outcome of a non-interactive command.
///
/// `exit_code` is the command's own status. `error` is set only when the
/// engine itself failed (could not spawn, not connected, cancelled), in which
/// case the process never ran to completion and `exit_code` is meaningless.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub error: Option<Error>,
}

impl ExecutionResult {
    /// A result describing an engine failure.
    pub fn failed(error: Error) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// A result carrying a message on stderr and the given exit status.
    pub fn with_stderr(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stderr: message.into().into_bytes(),
            exit_code,
            ..Default::default()
        }
    }

    /// True if the command ran and exited with status 0.
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Split off the engine error, if any.
    pub fn into_result(mut self) -> Result<Self, Error> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// How [`Executor::run`] handled a command.
#[derive(Debug)]
pub enum RunOutcome {
    /// Ran with captured output.
    Captured(ExecutionResult),
    /// Ran attached to the local terminal.
    Attached,
}

/// Capability contract implemented by [`crate::RemoteSession`] and
/// [`crate::LocalSession`].
///
/// Methods take `&mut self`, so a session runs one command at a time. Open
/// another session to run commands in parallel.
#[async_trait]
pub trait Executor: Send {
    /// Run `command` with stdout and stderr captured.
    ///
    /// A nonzero exit is reported in the result, never as an error.
    async fn execute(&mut self, cancel: &CancellationToken, command: &str) -> ExecutionResult;

    /// Run `command` attached to the local terminal until it exits or
    /// `cancel` fires.
    async fn execute_interactive(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<(), Error>;

    fn is_connected(&self) -> bool;

    /// Release the session. Safe to call more than once.
    async fn close(&mut self) -> Result<(), Error>;

    /// `user@host:port` for remote targets, `user@host:local` for local.
    fn host_info_string(&self) -> String;

    /// Classify `command` and dispatch to the matching method.
    async fn run(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<RunOutcome, Error> {
        if is_interactive_command(command) {
            log::debug!("running {:?} attached to terminal", command);
            self.execute_interactive(cancel, command).await?;
            Ok(RunOutcome::Attached)
        } else {
            Ok(RunOutcome::Captured(self.execute(cancel, command).await))
        }
    }
}
