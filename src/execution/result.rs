//! Run outcome type.

use std::collections::HashMap;
use std::fmt;

use super::options::{HideSet, StreamKind};

/// Outcome of one finished (or aborted) command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    /// The command as given to the shell.
    pub command: String,
    /// The shell that ran it.
    pub shell: String,
    /// Environment handed to the subprocess.
    pub env: HashMap<String, String>,
    /// Decoded stdout (everything, under a pty).
    pub stdout: String,
    /// Decoded stderr; always empty under a pty.
    pub stderr: String,
    /// Exit status; negative for a signal death, `None` when indeterminate.
    pub exited: Option<i32>,
    /// Whether the command ran on a pseudo-terminal.
    pub pty: bool,
    /// Streams that were hidden locally.
    pub hide: HideSet,
}

impl RunResult {
    /// Whether the command exited with status 0.
    pub fn ok(&self) -> bool {
        self.exited == Some(0)
    }

    /// Opposite of [`ok`](Self::ok).
    pub fn failed(&self) -> bool {
        !self.ok()
    }

    /// Alias for `exited`.
    pub fn return_code(&self) -> Option<i32> {
        self.exited
    }

    /// Captured text of `stream`.
    pub fn stream(&self, stream: StreamKind) -> &str {
        match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    /// The last `count` lines of `stream`, preceded by a blank line.
    pub fn tail(&self, stream: StreamKind, count: usize) -> String {
        let lines: Vec<&str> = self.stream(stream).lines().collect();
        let start = lines.len().saturating_sub(count);
        format!("\n\n{}", lines[start..].join("\n"))
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exited {
            Some(code) => writeln!(f, "Command exited with status {code}.")?,
            None => writeln!(f, "Command was not fully executed due to watcher error.")?,
        }
        for kind in [StreamKind::Stdout, StreamKind::Stderr] {
            let text = self.stream(kind);
            if text.trim().is_empty() {
                writeln!(f, "(no {kind})")?;
            } else {
                writeln!(f, "=== {kind} ===")?;
                writeln!(f, "{}", text.trim_end())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunResult {
        RunResult {
            command: "make".into(),
            shell: "/bin/sh".into(),
            stdout: (1..=15).map(|n| format!("line {n}\n")).collect(),
            exited: Some(0),
            ..RunResult::default()
        }
    }

    #[test]
    fn test_ok_and_failed() {
        let mut result = sample();
        assert!(result.ok());
        assert!(!result.failed());

        result.exited = Some(2);
        assert!(!result.ok());
        assert!(result.failed());
        assert_eq!(result.return_code(), Some(2));

        result.exited = None;
        assert!(result.failed());
    }

    #[test]
    fn test_tail() {
        let result = sample();
        let tail = result.tail(StreamKind::Stdout, 3);
        assert_eq!(tail, "\n\nline 13\nline 14\nline 15");
        assert_eq!(result.tail(StreamKind::Stderr, 10), "\n\n");
    }

    #[test]
    fn test_tail_shorter_than_count() {
        let result = RunResult {
            stdout: "only\n".into(),
            ..RunResult::default()
        };
        assert_eq!(result.tail(StreamKind::Stdout, 10), "\n\nonly");
    }

    #[test]
    fn test_display() {
        let result = RunResult {
            stdout: "hello\n".into(),
            exited: Some(0),
            ..RunResult::default()
        };
        let text = result.to_string();
        assert!(text.starts_with("Command exited with status 0."));
        assert!(text.contains("=== stdout ===\nhello"));
        assert!(text.contains("(no stderr)"));

        let aborted = RunResult::default();
        assert!(aborted.to_string().contains("watcher error"));
    }
}
