//! Runner interface and the orchestration shared by every runner.
//!
//! A [`Runner`] only knows how to *start* a command (see [`Runner::start`]).
//! Everything after that (worker threads, the timeout timer, waiting,
//! interrupt forwarding, teardown and outcome classification) lives here
//! in [`Execution`], so synchronous runs and [`Promise::join`] behave
//! identically.

use std::any::Any;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::encoding::Encoding;
use super::io::{InputPump, LocalInput, OutputPump, ProcStdin, Worker, WorkerError, INPUT_SLEEP};
use super::options::{HideSet, InStream, ResolvedOptions, RunOptions, StreamKind};
use super::interrupt::{InterruptWatch, ETX};
use super::promise::{Promise, RunOutcome};
use super::result::RunResult;
use super::timer::TimeoutTimer;
use crate::config::Config;
use crate::error::{TaskrunError, ThreadFailure};
use crate::watchers::{StreamWatcher, WatcherError};
use crate::Result;

/// Join timeout for workers whose sibling already died, for the stdin
/// forwarder (which may be blocked on a local read), and the total grace
/// period output readers get after a timeout.
const SHORT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Control over a started subprocess.
pub trait ProcessControl: Send + Sync {
    /// OS process id, when there is one.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking check for process exit.
    fn is_finished(&self) -> io::Result<bool>;

    /// Exit status once finished: the exit code, or the negated signal
    /// number for a signal death.
    fn returncode(&self) -> Option<i32>;

    /// Forcibly terminate the process.
    fn kill(&self) -> io::Result<()>;

    /// Wait for the process to be fully reaped.
    fn reap(&self);
}

/// Handles produced by [`Runner::start`].
pub struct Spawned {
    /// stdout, or the merged pty stream.
    pub stdout: Box<dyn Read + Send>,
    /// stderr; `None` under a pty.
    pub stderr: Option<Box<dyn Read + Send>>,
    /// Writer for the subprocess's stdin.
    pub stdin: Option<Box<dyn Write + Send>>,
    pub process: Arc<dyn ProcessControl>,
    /// Whether the command really runs on a pty.
    pub pty: bool,
    /// Resources that must outlive the run (e.g. the pty master).
    pub keepalive: Option<Box<dyn Any + Send>>,
}

impl Spawned {
    /// Give up every handle without closing or killing anything.
    fn detach(self) {
        tracing::debug!(pid = ?self.process.pid(), "detaching from command");
        std::mem::forget(self);
    }
}

/// Something that can run shell commands.
///
/// Implementors provide [`start`](Runner::start); [`run`](Runner::run) does
/// the rest.
pub trait Runner {
    /// Defaults for every option a call leaves unset.
    fn config(&self) -> &Config;

    /// Watchers used when a call does not give its own.
    fn default_watchers(&self) -> &[Arc<dyn StreamWatcher>] {
        &[]
    }

    /// Start `command` with the resolved options.
    fn start(&self, command: &str, options: &ResolvedOptions) -> Result<Spawned>;

    /// Run `command`.
    ///
    /// Returns [`RunOutcome::Completed`] for ordinary runs,
    /// [`RunOutcome::Pending`] when `asynchronous` is set and
    /// [`RunOutcome::Detached`] when `disown` is set. Failures are
    /// classified as described on [`TaskrunError`].
    fn run(&self, command: &str, options: RunOptions) -> Result<RunOutcome> {
        let opts = ResolvedOptions::resolve(self.config(), self.default_watchers(), options)?;

        if opts.echo {
            opts.out_stream.write_str(&opts.echo_line(command))?;
        }

        if opts.dry {
            return Ok(RunOutcome::Completed(RunResult {
                command: command.to_string(),
                shell: opts.shell,
                env: opts.env,
                exited: Some(0),
                pty: opts.pty,
                hide: opts.hide,
                ..RunResult::default()
            }));
        }

        let spawned = self.start(command, &opts)?;
        tracing::debug!(
            command,
            pid = ?spawned.process.pid(),
            pty = spawned.pty,
            "started command"
        );

        if opts.disown {
            spawned.detach();
            return Ok(RunOutcome::Detached);
        }

        let asynchronous = opts.asynchronous;
        let mut execution = Execution::launch(command, opts, spawned)?;
        if asynchronous {
            Ok(RunOutcome::Pending(Promise::new(execution)))
        } else {
            execution.finish().map(RunOutcome::Completed)
        }
    }
}

/// One in-flight command: its process, worker threads and timer.
pub(crate) struct Execution {
    command: String,
    shell: String,
    env: HashMap<String, String>,
    pty: bool,
    hide: HideSet,
    warn: bool,
    timeout: Option<Duration>,
    encoding: Encoding,
    process: Arc<dyn ProcessControl>,
    stdin: ProcStdin,
    finished: Arc<AtomicBool>,
    readers: Vec<(StreamKind, Worker)>,
    input: Option<Worker>,
    timer: Option<TimeoutTimer>,
    keepalive: Option<Box<dyn Any + Send>>,
    stopped: bool,
}

impl Execution {
    /// Start the timer and the worker threads.
    ///
    /// If any of that fails the half-built execution is dropped, which
    /// kills the subprocess.
    pub(crate) fn launch(command: &str, opts: ResolvedOptions, spawned: Spawned) -> Result<Self> {
        let Spawned {
            stdout,
            stderr,
            stdin,
            process,
            pty,
            keepalive,
        } = spawned;

        let mut execution = Execution {
            command: command.to_string(),
            shell: opts.shell,
            env: opts.env,
            pty,
            hide: opts.hide,
            warn: opts.warn,
            timeout: opts.timeout,
            encoding: opts.encoding,
            process: Arc::clone(&process),
            stdin: ProcStdin::new(stdin, pty),
            finished: Arc::new(AtomicBool::new(false)),
            readers: Vec::with_capacity(2),
            input: None,
            timer: None,
            keepalive,
            stopped: false,
        };

        if let Some(timeout) = opts.timeout {
            execution.timer = Some(TimeoutTimer::start(timeout, process)?);
        }

        let mut streams = vec![(StreamKind::Stdout, stdout, opts.out_stream.clone())];
        if let Some(stderr) = stderr {
            streams.push((StreamKind::Stderr, stderr, opts.err_stream.clone()));
        }
        for (kind, reader, local) in streams {
            let worker = OutputPump {
                kind,
                reader,
                echo_to: (!opts.hide.contains(kind)).then_some(local),
                encoding: opts.encoding,
                watchers: opts.watchers.clone(),
                stdin: execution.stdin.clone(),
                pty,
            }
            .spawn()?;
            execution.readers.push((kind, worker));
        }

        let input = match opts.in_stream {
            InStream::Disabled => None,
            InStream::Inherit => Some(LocalInput::Stdin),
            InStream::Reader(reader) => Some(LocalInput::Reader(reader)),
        };
        if let Some(input) = input {
            let echo_stdin = opts.echo_stdin.unwrap_or_else(|| !pty && input.is_tty());
            let worker = InputPump {
                input,
                stdin: execution.stdin.clone(),
                finished: Arc::clone(&execution.finished),
                echo_to: echo_stdin.then_some(opts.out_stream),
                encoding: opts.encoding,
                pty,
            }
            .spawn()?;
            execution.input = Some(worker);
        }

        Ok(execution)
    }

    pub(crate) fn command(&self) -> &str {
        &self.command
    }

    pub(crate) fn shell(&self) -> &str {
        &self.shell
    }

    pub(crate) fn pty(&self) -> bool {
        self.pty
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn has_dead_workers(&self) -> bool {
        self.readers.iter().map(|(_, w)| w).chain(&self.input).any(Worker::is_dead)
    }

    /// Block until the command is over, then tear down and classify.
    pub(crate) fn finish(&mut self) -> Result<RunResult> {
        let outcome = self.collect();
        self.stop();
        outcome
    }

    fn wait(&self) -> Result<()> {
        let interrupts = InterruptWatch::arm();
        loop {
            if self.process.is_finished()? || self.has_dead_workers() {
                return Ok(());
            }
            if interrupts.take() {
                tracing::debug!(command = %self.command, "forwarding interrupt");
                self.stdin.write(&[ETX])?;
            }
            thread::sleep(INPUT_SLEEP);
        }
    }

    fn collect(&mut self) -> Result<RunResult> {
        let waited = self.wait();
        self.finished.store(true, Ordering::SeqCst);
        waited?;

        if self.has_dead_workers() && !self.process.is_finished().unwrap_or(true) {
            tracing::debug!(command = %self.command, "worker died, killing command");
            if let Err(err) = self.process.kill() {
                tracing::warn!("failed to kill command: {err}");
            }
        }

        // A killed shell's children may still hold the output pipes open;
        // after a timeout the readers get one shared grace period.
        let timed_out = self.timer.as_ref().is_some_and(TimeoutTimer::fired);
        let drain_deadline = timed_out.then(|| Instant::now() + SHORT_JOIN_TIMEOUT);

        let readers = std::mem::take(&mut self.readers);
        let input = self.input.take();
        let dead: Vec<bool> = readers.iter().map(|(_, w)| w.is_dead()).collect();
        let input_dead = input.as_ref().is_some_and(Worker::is_dead);

        let mut failures = Vec::new();
        let mut watcher_error: Option<WatcherError> = None;
        let mut stdout = String::new();
        let mut stderr = String::new();

        for (index, (kind, worker)) in readers.into_iter().enumerate() {
            let sibling_died = input_dead
                || dead
                    .iter()
                    .enumerate()
                    .any(|(other, died)| other != index && *died);
            let name = worker.name().to_string();
            let join_timeout = match drain_deadline {
                Some(deadline) => Some(deadline.saturating_duration_since(Instant::now())),
                None => sibling_died.then_some(SHORT_JOIN_TIMEOUT),
            };
            let Some(report) = worker.join(join_timeout) else {
                continue;
            };
            match kind {
                StreamKind::Stdout => stdout = report.captured,
                StreamKind::Stderr => stderr = report.captured,
            }
            record(name, report.error, &mut failures, &mut watcher_error);
        }
        if let Some(worker) = input {
            let name = worker.name().to_string();
            if let Some(report) = worker.join(Some(SHORT_JOIN_TIMEOUT)) {
                record(name, report.error, &mut failures, &mut watcher_error);
            }
        }

        if !failures.is_empty() {
            return Err(TaskrunError::ThreadException(failures));
        }

        let timed_out = timed_out || self.timer.as_ref().is_some_and(TimeoutTimer::fired);
        let exited = if watcher_error.is_some() || timed_out {
            None
        } else {
            self.process.returncode()
        };

        let result = RunResult {
            command: self.command.clone(),
            shell: self.shell.clone(),
            env: self.env.clone(),
            stdout,
            stderr,
            exited,
            pty: self.pty,
            hide: self.hide,
        };
        tracing::debug!(command = %result.command, exited = ?result.exited, "command finished");

        if let Some(reason) = watcher_error {
            return Err(TaskrunError::Failure {
                result: Box::new(result),
                reason,
            });
        }
        if timed_out {
            return Err(TaskrunError::CommandTimedOut {
                timeout: self.timeout.unwrap_or_default(),
                result: Box::new(result),
            });
        }
        if !result.ok() && !self.warn {
            return Err(TaskrunError::UnexpectedExit {
                result: Box::new(result),
            });
        }
        Ok(result)
    }

    /// Release everything: cancel the timer, close stdin, kill the process
    /// if it is still alive, reap it and drop the keep-alive handles.
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.finished.store(true, Ordering::SeqCst);

        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.stdin.release();

        if !matches!(self.process.is_finished(), Ok(true)) {
            tracing::debug!(command = %self.command, "killing command during teardown");
            if let Err(err) = self.process.kill() {
                tracing::warn!("failed to kill command: {err}");
            }
        }
        self.process.reap();
        drop(self.keepalive.take());
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record(
    worker: String,
    error: Option<WorkerError>,
    failures: &mut Vec<ThreadFailure>,
    watcher_error: &mut Option<WatcherError>,
) {
    match error {
        Some(WorkerError::Watcher(err)) => {
            watcher_error.get_or_insert(err);
        }
        Some(WorkerError::Failed(message)) => failures.push(ThreadFailure { worker, message }),
        None => {}
    }
}
