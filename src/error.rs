//! Error types for taskrun.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::execution::{RunResult, StreamKind};
use crate::watchers::WatcherError;

/// Main error type for taskrun operations.
#[derive(Error, Debug)]
pub enum TaskrunError {
    /// The subprocess ran to completion with a nonzero exit status.
    #[error("{}", unexpected_exit_message(.result))]
    UnexpectedExit {
        /// Full outcome of the run.
        result: Box<RunResult>,
    },

    /// The timeout timer fired and the subprocess was killed.
    #[error("{}", timed_out_message(.result, .timeout))]
    CommandTimedOut {
        /// The configured timeout.
        timeout: Duration,
        /// Partial outcome; `exited` is always `None`.
        result: Box<RunResult>,
    },

    /// One or more I/O worker threads failed with a non-watcher error.
    #[error("{}", thread_exception_message(.0))]
    ThreadException(Vec<ThreadFailure>),

    /// A watcher decided its injected reply did not have the desired effect.
    #[error("{}", failure_message(.result, .reason))]
    Failure {
        /// Outcome with an indeterminate (`None`) exit status.
        result: Box<RunResult>,
        /// The watcher's complaint.
        reason: WatcherError,
    },

    /// The sudo password was rejected.
    #[error("The password submitted to prompt {prompt:?} was rejected.")]
    AuthFailure {
        /// Outcome of the sudo invocation.
        result: Box<RunResult>,
        /// The sudo prompt that was answered.
        prompt: String,
    },

    /// Writing to or closing the subprocess's stdin is impossible.
    #[error("subprocess pipe error: {0}")]
    SubprocessPipe(String),

    /// Options contradict each other or hold unusable values.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TaskrunError {
    /// The run outcome carried by this error, if any.
    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::UnexpectedExit { result }
            | Self::CommandTimedOut { result, .. }
            | Self::Failure { result, .. }
            | Self::AuthFailure { result, .. } => Some(&**result),
            _ => None,
        }
    }
}

/// Convenience Result type for taskrun operations.
pub type Result<T> = std::result::Result<T, TaskrunError>;

/// A single worker thread's failure, as aggregated by
/// [`TaskrunError::ThreadException`].
#[derive(Debug, Clone)]
pub struct ThreadFailure {
    /// Which worker failed (e.g. `"stdout reader"`).
    pub worker: String,
    /// Rendered error or panic message.
    pub message: String,
}

impl fmt::Display for ThreadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread args: {}\n\n{}", self.worker, self.message)
    }
}

fn streams_for_display(result: &RunResult) -> (String, String) {
    let already_printed = " already printed".to_string();
    let stdout = if result.hide.contains(StreamKind::Stdout) {
        result.tail(StreamKind::Stdout, 10)
    } else {
        already_printed.clone()
    };
    let stderr = if result.pty {
        " n/a (PTYs have no stderr)".to_string()
    } else if result.hide.contains(StreamKind::Stderr) {
        result.tail(StreamKind::Stderr, 10)
    } else {
        already_printed
    };
    (stdout, stderr)
}

fn unexpected_exit_message(result: &RunResult) -> String {
    let (stdout, stderr) = streams_for_display(result);
    let exited = result
        .exited
        .map_or_else(|| "None".to_string(), |code| code.to_string());
    format!(
        "Encountered a bad command exit code!\n\nCommand: {:?}\n\nExit code: {}\n\nStdout:{}\n\nStderr:{}\n\n",
        result.command, exited, stdout, stderr
    )
}

fn timed_out_message(result: &RunResult, timeout: &Duration) -> String {
    let (stdout, stderr) = streams_for_display(result);
    format!(
        "Command did not complete within {} seconds!\n\nCommand: {:?}\n\nStdout:{}\n\nStderr:{}\n\n",
        timeout.as_secs_f64(),
        result.command,
        stdout,
        stderr
    )
}

fn failure_message(result: &RunResult, reason: &WatcherError) -> String {
    format!(
        "Command {:?} was aborted by a watcher: {}",
        result.command, reason
    )
}

fn thread_exception_message(failures: &[ThreadFailure]) -> String {
    let workers: Vec<&str> = failures.iter().map(|f| f.worker.as_str()).collect();
    let details: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!(
        "Saw {} exceptions within threads ({}):\n\n{}",
        failures.len(),
        workers.join(", "),
        details.join("\n\n----\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::HideSet;

    fn result_with(stdout: &str, exited: Option<i32>, hide: HideSet) -> RunResult {
        RunResult {
            command: "false".to_string(),
            stdout: stdout.to_string(),
            exited,
            hide,
            ..RunResult::default()
        }
    }

    #[test]
    fn test_unexpected_exit_display() {
        let err = TaskrunError::UnexpectedExit {
            result: Box::new(result_with("", Some(1), HideSet::NONE)),
        };
        let text = err.to_string();
        assert!(text.contains("bad command exit code"));
        assert!(text.contains("Exit code: 1"));
        assert!(text.contains("Stdout: already printed"));
    }

    #[test]
    fn test_unexpected_exit_shows_hidden_tail() {
        let err = TaskrunError::UnexpectedExit {
            result: Box::new(result_with("one\ntwo\n", Some(2), HideSet::BOTH)),
        };
        let text = err.to_string();
        assert!(text.contains("one\ntwo"));
        assert!(!text.contains("already printed"));
    }

    #[test]
    fn test_pty_has_no_stderr() {
        let mut result = result_with("", Some(1), HideSet::NONE);
        result.pty = true;
        let err = TaskrunError::UnexpectedExit {
            result: Box::new(result),
        };
        assert!(err.to_string().contains("PTYs have no stderr"));
    }

    #[test]
    fn test_timed_out_display() {
        let err = TaskrunError::CommandTimedOut {
            timeout: Duration::from_millis(500),
            result: Box::new(result_with("", None, HideSet::NONE)),
        };
        assert!(err.to_string().contains("within 0.5 seconds"));
        assert!(err.result().is_some());
    }

    #[test]
    fn test_thread_exception_display() {
        let err = TaskrunError::ThreadException(vec![ThreadFailure {
            worker: "stdout reader".into(),
            message: "boom".into(),
        }]);
        let text = err.to_string();
        assert!(text.contains("Saw 1 exceptions"));
        assert!(text.contains("stdout reader"));
        assert!(text.contains("boom"));
        assert!(err.result().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TaskrunError = io_err.into();
        assert!(matches!(err, TaskrunError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_pty_error_display() {
        let err = TaskrunError::Pty("failed to spawn".into());
        assert!(err.to_string().contains("PTY error"));
        assert!(err.to_string().contains("failed to spawn"));
    }
}
