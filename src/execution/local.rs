//! Runs commands on the local machine, through pipes or a pty.

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::options::{InStream, ResolvedOptions};
use super::runner::{ProcessControl, Runner, Spawned};
use crate::config::Config;
use crate::error::TaskrunError;
use crate::pty::{shell_flag, NativePty};
use crate::terminal;
use crate::watchers::StreamWatcher;
use crate::Result;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
#[cfg(unix)]
use nix::unistd::Pid;

const PTY_FALLBACK_WARNING: &str = "WARNING: stdin has no fileno; falling back to non-pty execution!\n";

/// Executes commands as local subprocesses.
///
/// # Example
///
/// ```no_run
/// use taskrun::{Config, LocalRunner, RunOptions, Runner};
///
/// let runner = LocalRunner::new(Config::default());
/// let result = runner
///     .run("uname -s", RunOptions::new().hide(true))?
///     .join()?
///     .expect("not detached");
/// println!("running on {}", result.stdout.trim());
/// # Ok::<(), taskrun::TaskrunError>(())
/// ```
pub struct LocalRunner {
    config: Config,
    watchers: Vec<Arc<dyn StreamWatcher>>,
    pty: NativePty,
    warned_about_pty_fallback: AtomicBool,
}

impl LocalRunner {
    /// A runner using `config` for every unset option.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            watchers: Vec::new(),
            pty: NativePty::new(),
            warned_about_pty_fallback: AtomicBool::new(false),
        }
    }

    /// Attach watchers used by every run that does not bring its own.
    pub fn with_watchers(mut self, watchers: Vec<Arc<dyn StreamWatcher>>) -> Self {
        self.watchers = watchers;
        self
    }

    /// Decide whether this run really gets a pty.
    ///
    /// A pty needs our stdin to be a real descriptor; with `fallback`
    /// allowed, runs whose input has none quietly use pipes instead (after
    /// a one-time warning).
    pub fn should_use_pty(&self, options: &ResolvedOptions) -> Result<bool> {
        if !options.pty {
            return Ok(false);
        }
        let has_fileno = match options.in_stream {
            InStream::Reader(_) => false,
            InStream::Inherit | InStream::Disabled => terminal::has_fileno(&io::stdin()),
        };
        if has_fileno || !options.fallback {
            return Ok(true);
        }
        if !self.warned_about_pty_fallback.swap(true, Ordering::SeqCst) {
            tracing::warn!("stdin has no file descriptor, falling back to pipes");
            options.err_stream.write_str(PTY_FALLBACK_WARNING)?;
        }
        Ok(false)
    }

    fn start_pipes(&self, command: &str, options: &ResolvedOptions) -> Result<Spawned> {
        let mut child = Command::new(&options.shell)
            .arg(shell_flag(&options.shell))
            .arg(command)
            .env_clear()
            .envs(&options.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let missing = |name: &str| TaskrunError::SubprocessPipe(format!("child has no {name} pipe"));
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;

        Ok(Spawned {
            stdout: Box::new(stdout),
            stderr: Some(Box::new(stderr)),
            stdin: Some(Box::new(stdin)),
            process: Arc::new(PipeProcess::new(child)),
            pty: false,
            keepalive: None,
        })
    }

    fn start_pty(&self, command: &str, options: &ResolvedOptions) -> Result<Spawned> {
        let handle = self
            .pty
            .spawn(&options.shell, command, &options.env, terminal::pty_size())?;
        let (reader, writer, pid, guard) = handle.into_parts();
        Ok(Spawned {
            stdout: reader,
            stderr: None,
            stdin: Some(writer),
            process: Arc::new(PtyProcess::new(pid)),
            pty: true,
            keepalive: Some(guard),
        })
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Runner for LocalRunner {
    fn config(&self) -> &Config {
        &self.config
    }

    fn default_watchers(&self) -> &[Arc<dyn StreamWatcher>] {
        &self.watchers
    }

    fn start(&self, command: &str, options: &ResolvedOptions) -> Result<Spawned> {
        if self.should_use_pty(options)? {
            self.start_pty(command, options)
        } else {
            self.start_pipes(command, options)
        }
    }
}

/// A child started with three pipes.
struct PipeProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl PipeProcess {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    fn status(&self) -> io::Result<Option<ExitStatus>> {
        let mut child = self.child.lock().map_err(|_| poisoned())?;
        child.try_wait()
    }
}

impl ProcessControl for PipeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_finished(&self) -> io::Result<bool> {
        Ok(self.status()?.is_some())
    }

    fn returncode(&self) -> Option<i32> {
        self.status().ok().flatten().and_then(exit_code)
    }

    fn kill(&self) -> io::Result<()> {
        let mut child = self.child.lock().map_err(|_| poisoned())?;
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill()
    }

    fn reap(&self) {
        if let Ok(mut child) = self.child.lock() {
            if let Err(err) = child.wait() {
                tracing::debug!(pid = self.pid, "failed to reap child: {err}");
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|signal| -signal))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

fn poisoned() -> io::Error {
    io::Error::other("process lock poisoned")
}

/// A child running on a pty, tracked by pid.
///
/// The decoded exit status is kept after reaping; the process is never
/// signalled once reaped, since its pid may have been reused.
struct PtyProcess {
    pid: u32,
    status: Mutex<Option<i32>>,
}

impl PtyProcess {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            status: Mutex::new(None),
        }
    }

    #[cfg(unix)]
    fn wait(&self, blocking: bool) -> io::Result<Option<i32>> {
        let mut status = self.status.lock().map_err(|_| poisoned())?;
        if status.is_some() {
            return Ok(*status);
        }
        let flags = (!blocking).then_some(WaitPidFlag::WNOHANG);
        loop {
            match waitpid(self.nix_pid(), flags) {
                Ok(WaitStatus::StillAlive) => return Ok(None),
                Ok(wait_status) => {
                    if let Some(code) = decode_wait_status(wait_status) {
                        *status = Some(code);
                        return Ok(*status);
                    }
                    // Stopped or continued: not an exit.
                    if !blocking {
                        return Ok(None);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    #[cfg(not(unix))]
    fn wait(&self, _blocking: bool) -> io::Result<Option<i32>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "pty exit status is only available on unix",
        ))
    }

    #[cfg(unix)]
    fn nix_pid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }
}

/// Exit code for a normal exit, the negated signal number for a signal
/// death.
#[cfg(unix)]
fn decode_wait_status(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(-(signal as i32)),
        _ => None,
    }
}

impl ProcessControl for PtyProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_finished(&self) -> io::Result<bool> {
        Ok(self.wait(false)?.is_some())
    }

    fn returncode(&self) -> Option<i32> {
        self.wait(false).ok().flatten()
    }

    /// The pty child leads its own session, so the whole process group
    /// goes; anything it started would otherwise keep the pty open.
    #[cfg(unix)]
    fn kill(&self) -> io::Result<()> {
        let status = self.status.lock().map_err(|_| poisoned())?;
        if status.is_some() {
            return Ok(());
        }
        match killpg(self.nix_pid(), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(_) => kill(self.nix_pid(), Signal::SIGKILL).map_err(io::Error::from),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) -> io::Result<()> {
        Ok(())
    }

    fn reap(&self) {
        if let Err(err) = self.wait(true) {
            tracing::debug!(pid = self.pid, "failed to reap pty child: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{OutputStream, RunOptions};

    #[test]
    #[cfg(unix)]
    fn test_decode_wait_status() {
        let pid = Pid::from_raw(1234);
        assert_eq!(decode_wait_status(WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            decode_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(-9)
        );
        assert_eq!(decode_wait_status(WaitStatus::StillAlive), None);
        assert_eq!(
            decode_wait_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            None
        );
    }

    #[test]
    fn test_no_pty_requested() {
        let runner = LocalRunner::default();
        let config = Config::default();
        let options = ResolvedOptions::resolve(&config, &[], RunOptions::new()).unwrap();
        assert!(!runner.should_use_pty(&options).unwrap());
    }

    #[test]
    fn test_reader_input_falls_back_once() {
        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let runner = LocalRunner::default();
        let config = Config::default();
        let sink = Sink::default();
        let resolve = || {
            ResolvedOptions::resolve(
                &config,
                &[],
                RunOptions::new()
                    .pty(true)
                    .in_stream(InStream::reader(io::empty()))
                    .err_stream(OutputStream::new(sink.clone())),
            )
            .unwrap()
        };

        assert!(!runner.should_use_pty(&resolve()).unwrap());
        assert!(!runner.should_use_pty(&resolve()).unwrap());
        let warned = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(warned, PTY_FALLBACK_WARNING);
    }

    #[test]
    fn test_no_fallback_keeps_pty() {
        let runner = LocalRunner::default();
        let config = Config::default();
        let options = ResolvedOptions::resolve(
            &config,
            &[],
            RunOptions::new()
                .pty(true)
                .fallback(false)
                .in_stream(InStream::reader(io::empty())),
        )
        .unwrap();
        assert!(runner.should_use_pty(&options).unwrap());
    }
}
