//! Native PTY implementation using portable-pty.

use std::collections::HashMap;

use portable_pty::{native_pty_system, CommandBuilder, PtySize as NativePtySize};

use super::{PtyHandle, PtySize};
use crate::error::TaskrunError;
use crate::Result;

/// Get the default shell for the current platform.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        if std::path::Path::new("/bin/bash").exists() {
            "/bin/bash".to_string()
        } else {
            "/bin/sh".to_string()
        }
    }
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
}

/// The flag that makes `shell` run a single command string.
pub fn shell_flag(shell: &str) -> &'static str {
    let name = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    if name.eq_ignore_ascii_case("cmd.exe") || name.eq_ignore_ascii_case("cmd") {
        "/c"
    } else {
        "-c"
    }
}

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Run `command_line` through `shell` on a new PTY.
    ///
    /// The child's environment is exactly `env`; the window size is set to
    /// `size` before the command starts.
    pub fn spawn(
        &self,
        shell: &str,
        command_line: &str,
        env: &HashMap<String, String>,
        size: PtySize,
    ) -> Result<PtyHandle> {
        let native_size = NativePtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = self
            .pty_system
            .openpty(native_size)
            .map_err(|e| TaskrunError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.arg(shell_flag(shell));
        cmd.arg(command_line);
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TaskrunError::Pty(e.to_string()))?;
        // Our copy of the slave must go, or reads never see end-of-file.
        drop(pair.slave);

        let pid = child
            .process_id()
            .ok_or_else(|| TaskrunError::Pty("spawned child has no process id".into()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TaskrunError::Pty(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TaskrunError::Pty(e.to_string()))?;

        tracing::debug!(pid, rows = size.rows, cols = size.cols, "spawned command on pty");

        Ok(PtyHandle::new(
            reader,
            writer,
            pid,
            Box::new((pair.master, child)),
        ))
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_default_shell() {
        let shell = default_shell();
        assert!(!shell.is_empty());

        #[cfg(unix)]
        {
            assert!(shell.starts_with('/'));
        }
    }

    #[test]
    fn test_shell_flag() {
        assert_eq!(shell_flag("/bin/bash"), "-c");
        assert_eq!(shell_flag("sh"), "-c");
        assert_eq!(shell_flag("C:\\Windows\\System32\\cmd.exe"), "/c");
    }

    #[test]
    #[cfg(unix)]
    fn test_spawn_command_output() {
        let env: HashMap<String, String> = std::env::vars().collect();
        let pty = NativePty::new();
        let handle = pty
            .spawn("/bin/sh", "echo TASKRUN_PTY_OUTPUT", &env, PtySize::default())
            .unwrap();
        assert!(handle.pid > 0, "PID should be positive");

        let (mut reader, _writer, _pid, _guard) = handle.into_parts();
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                // EIO once the child side has closed.
                Err(_) => break,
            }
        }
        assert!(String::from_utf8_lossy(&output).contains("TASKRUN_PTY_OUTPUT"));
    }

    #[test]
    #[cfg(unix)]
    fn test_custom_size() {
        let pty = NativePty::new();
        let handle = pty.spawn(
            "/bin/sh",
            "true",
            &HashMap::new(),
            PtySize::new(40, 120),
        );

        assert!(handle.is_ok());
    }
}
