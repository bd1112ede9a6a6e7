//! Handles on runs that have not been waited for yet.

use std::fmt;

use super::encoding::Encoding;
use super::result::RunResult;
use super::runner::Execution;
use crate::error::TaskrunError;
use crate::Result;

/// An asynchronous run in progress.
///
/// The subprocess and its worker threads keep going in the background;
/// [`join`](Promise::join) waits for them and classifies the outcome
/// exactly like a synchronous run would. A promise dropped without being
/// joined is joined implicitly, and any failure is logged.
pub struct Promise {
    execution: Option<Execution>,
    command: String,
    shell: String,
    pty: bool,
    encoding: Encoding,
}

impl Promise {
    pub(crate) fn new(execution: Execution) -> Self {
        Self {
            command: execution.command().to_string(),
            shell: execution.shell().to_string(),
            pty: execution.pty(),
            encoding: execution.encoding(),
            execution: Some(execution),
        }
    }

    /// The command being run.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The shell running it.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Whether it runs on a pty.
    pub fn pty(&self) -> bool {
        self.pty
    }

    /// Encoding used for its I/O.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Wait for the command and return its result, or the failure a
    /// synchronous run would have raised.
    pub fn join(mut self) -> Result<RunResult> {
        let mut execution = self.execution.take().ok_or_else(|| {
            TaskrunError::InvalidOptions(format!("{:?} was already joined", self.command))
        })?;
        execution.finish()
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if let Some(mut execution) = self.execution.take() {
            if let Err(err) = execution.finish() {
                tracing::warn!(command = %self.command, "background command failed: {err}");
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("command", &self.command)
            .field("shell", &self.shell)
            .field("pty", &self.pty)
            .field("encoding", &self.encoding)
            .field("joined", &self.execution.is_none())
            .finish()
    }
}

/// What [`Runner::run`](super::Runner::run) produced.
#[must_use]
#[derive(Debug)]
pub enum RunOutcome {
    /// The command ran to completion.
    Completed(RunResult),
    /// The command runs in the background.
    Pending(Promise),
    /// The command was started and forgotten.
    Detached,
}

impl RunOutcome {
    /// Wait for the outcome to settle. Detached runs yield `None`.
    pub fn join(self) -> Result<Option<RunResult>> {
        match self {
            RunOutcome::Completed(result) => Ok(Some(result)),
            RunOutcome::Pending(promise) => promise.join().map(Some),
            RunOutcome::Detached => Ok(None),
        }
    }

    /// The result of a completed run.
    pub fn into_result(self) -> Option<RunResult> {
        match self {
            RunOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// The promise of an asynchronous run.
    pub fn into_promise(self) -> Option<Promise> {
        match self {
            RunOutcome::Pending(promise) => Some(promise),
            _ => None,
        }
    }

    /// Whether the run was detached.
    pub fn is_detached(&self) -> bool {
        matches!(self, RunOutcome::Detached)
    }
}
