//! PTY (Pseudo-Terminal) allocation.
//!
//! This module wraps portable-pty to start a single shell command on a
//! freshly allocated pseudo-terminal. The master side becomes one merged
//! channel: reads yield everything the child writes (stdout and stderr
//! alike) and writes land on the child's stdin.

mod native;

pub use native::{default_shell, shell_flag, NativePty};

use std::io::{Read, Write};

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// A command running on a PTY.
pub struct PtyHandle {
    /// Reader for the merged PTY output.
    pub reader: Box<dyn Read + Send>,
    /// Writer for the child's input.
    pub writer: Box<dyn Write + Send>,
    /// Process ID of the spawned child.
    pub pid: u32,
    /// Master side and child handle; dropping this closes the master fd.
    pty: Box<dyn std::any::Any + Send>,
}

impl PtyHandle {
    /// Create a new PtyHandle.
    pub fn new(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        pid: u32,
        pty: Box<dyn std::any::Any + Send>,
    ) -> Self {
        Self {
            reader,
            writer,
            pid,
            pty,
        }
    }

    /// Split into reader, writer, pid and the keep-alive guard.
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn Read + Send>,
        Box<dyn Write + Send>,
        u32,
        Box<dyn std::any::Any + Send>,
    ) {
        (self.reader, self.writer, self.pid, self.pty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_size_default() {
        let size = PtySize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
    }

    #[test]
    fn test_pty_size_new() {
        let size = PtySize::new(40, 120);
        assert_eq!(size.rows, 40);
        assert_eq!(size.cols, 120);
    }

    #[test]
    fn test_pty_size_equality() {
        let size1 = PtySize::new(24, 80);
        let size2 = PtySize::default();
        assert_eq!(size1, size2);

        let size3 = PtySize::new(30, 100);
        assert_ne!(size1, size3);
    }
}
