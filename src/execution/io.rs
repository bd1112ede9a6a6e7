//! I/O worker threads: output readers and the stdin forwarder.

use std::any::Any;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::encoding::{Encoding, IncrementalDecoder};
use super::options::{OutputStream, StreamKind};
use crate::error::TaskrunError;
use crate::terminal;
use crate::watchers::{StreamWatcher, WatcherError};
use crate::Result;

/// Bytes requested per read of subprocess output.
pub(crate) const READ_CHUNK_SIZE: usize = 1000;

/// Pause between polls of local input.
pub(crate) const INPUT_SLEEP: Duration = Duration::from_millis(10);

/// Shared handle on the subprocess's stdin.
///
/// Reader threads (watcher replies), the stdin forwarder and the main
/// thread (interrupts) all write through clones of this.
#[derive(Clone)]
pub(crate) struct ProcStdin {
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    pty: bool,
}

impl ProcStdin {
    pub(crate) fn new(writer: Option<Box<dyn Write + Send>>, pty: bool) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            pty,
        }
    }

    /// Write `data` to the subprocess. A child that already went away is
    /// not an error.
    pub(crate) fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().map_err(|_| TaskrunError::LockPoisoned)?;
        let writer = guard.as_mut().ok_or_else(|| {
            TaskrunError::SubprocessPipe("Unable to write to missing subprocess or stdin!".into())
        })?;
        match writer.write_all(data).and_then(|()| writer.flush()) {
            Ok(()) => Ok(()),
            Err(err) if self.is_gone(&err) => {
                tracing::debug!("subprocess stdin is gone: {err}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Close the subprocess's stdin. Impossible under a pty, where stdin
    /// and stdout share one descriptor.
    pub(crate) fn close(&self) -> Result<()> {
        if self.pty {
            return Err(TaskrunError::SubprocessPipe(
                "Cannot close stdin when pty=True".into(),
            ));
        }
        let mut guard = self.writer.lock().map_err(|_| TaskrunError::LockPoisoned)?;
        guard.take();
        Ok(())
    }

    /// Drop our end unconditionally.
    pub(crate) fn release(&self) {
        match self.writer.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }

    fn is_gone(&self, err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::BrokenPipe || (self.pty && is_eio(err))
    }
}

#[cfg(unix)]
fn is_eio(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_eio(_err: &io::Error) -> bool {
    false
}

/// Why a worker stopped early.
#[derive(Debug)]
pub(crate) enum WorkerError {
    /// A watcher aborted the run.
    Watcher(WatcherError),
    /// Anything else, already rendered (including panics).
    Failed(String),
}

impl From<TaskrunError> for WorkerError {
    fn from(err: TaskrunError) -> Self {
        WorkerError::Failed(err.to_string())
    }
}

impl From<io::Error> for WorkerError {
    fn from(err: io::Error) -> Self {
        WorkerError::Failed(err.to_string())
    }
}

/// What a worker hands back when joined.
#[derive(Debug, Default)]
pub(crate) struct WorkerReport {
    /// Decoded text read by the worker (empty for the stdin forwarder).
    pub captured: String,
    pub error: Option<WorkerError>,
}

/// A running worker thread.
pub(crate) struct Worker {
    name: String,
    handle: Option<JoinHandle<WorkerReport>>,
    dead: Arc<AtomicBool>,
}

impl Worker {
    fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce() -> WorkerReport + Send + 'static,
    {
        let dead = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dead);
        let handle = thread::Builder::new()
            .name(format!("taskrun {name}"))
            .spawn(move || {
                let report = match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(report) => report,
                    Err(payload) => WorkerReport {
                        captured: String::new(),
                        error: Some(WorkerError::Failed(panic_message(&*payload))),
                    },
                };
                if report.error.is_some() {
                    flag.store(true, Ordering::SeqCst);
                }
                report
            })?;
        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            dead,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker ended with an error.
    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Join, giving up after `timeout` if one is set.
    ///
    /// Returns `None` when the worker is still running at the deadline; it
    /// is then left to finish on its own.
    pub(crate) fn join(mut self, timeout: Option<Duration>) -> Option<WorkerReport> {
        let handle = self.handle.take()?;
        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    tracing::warn!(worker = %self.name, ?timeout, "worker did not finish in time");
                    return None;
                }
                thread::sleep(INPUT_SLEEP);
            }
        }
        Some(handle.join().unwrap_or_else(|payload| WorkerReport {
            captured: String::new(),
            error: Some(WorkerError::Failed(panic_message(&*payload))),
        }))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("thread panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("thread panicked: {msg}")
    } else {
        "thread panicked".to_string()
    }
}

/// Reads one output stream until end-of-file.
pub(crate) struct OutputPump {
    pub kind: StreamKind,
    pub reader: Box<dyn Read + Send>,
    /// Local echo destination; `None` when the stream is hidden.
    pub echo_to: Option<OutputStream>,
    pub encoding: Encoding,
    pub watchers: Vec<Arc<dyn StreamWatcher>>,
    pub stdin: ProcStdin,
    pub pty: bool,
}

impl OutputPump {
    pub(crate) fn spawn(self) -> io::Result<Worker> {
        let name = format!("{} reader", self.kind);
        Worker::spawn(&name, move || self.run())
    }

    fn run(mut self) -> WorkerReport {
        let mut captured = String::new();
        let mut decoder = self.encoding.decoder();
        let error = self.pump(&mut captured, &mut decoder).err();
        captured.push_str(&decoder.finish());
        tracing::trace!(stream = %self.kind, bytes = captured.len(), "reader finished");
        WorkerReport { captured, error }
    }

    fn pump(
        &mut self,
        captured: &mut String,
        decoder: &mut IncrementalDecoder,
    ) -> std::result::Result<(), WorkerError> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // The pty master reports EIO once the child side has closed.
                Err(err) if self.pty && is_eio(&err) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let text = decoder.decode(&buf[..n]);
            tracing::trace!(stream = %self.kind, bytes = n, "read chunk");
            if text.is_empty() {
                continue;
            }
            if let Some(out) = &self.echo_to {
                out.write_str(&text)?;
            }
            captured.push_str(&text);
            self.respond(captured)?;
        }
    }

    fn respond(&self, captured: &str) -> std::result::Result<(), WorkerError> {
        for watcher in &self.watchers {
            let replies = watcher.submit(captured).map_err(WorkerError::Watcher)?;
            for reply in replies {
                self.stdin.write(&self.encoding.encode(&reply))?;
            }
        }
        Ok(())
    }
}

/// Our own input, as seen by the stdin forwarder.
pub(crate) enum LocalInput {
    /// The process's fd 0, polled without blocking.
    Stdin,
    /// An arbitrary reader; reads may block.
    Reader(Box<dyn Read + Send>),
}

impl LocalInput {
    /// `Some(data)` when input was read (empty at end-of-file), `None` when
    /// nothing is available right now.
    fn read_available(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self {
            LocalInput::Stdin => {
                let stdin = io::stdin();
                if !terminal::has_fileno(&stdin) {
                    return Ok(Some(Vec::new()));
                }
                if !terminal::ready_for_reading(&stdin) {
                    return Ok(None);
                }
                terminal::read_fd(&stdin).map(Some)
            }
            LocalInput::Reader(reader) => {
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(n) => {
                            buf.truncate(n);
                            return Ok(Some(buf));
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Whether this input is an interactive terminal.
    pub(crate) fn is_tty(&self) -> bool {
        matches!(self, LocalInput::Stdin) && terminal::isatty(&io::stdin())
    }
}

/// Forwards local input to the subprocess until the run is over.
pub(crate) struct InputPump {
    pub input: LocalInput,
    pub stdin: ProcStdin,
    pub finished: Arc<AtomicBool>,
    /// Mirror forwarded input here, when echoing stdin.
    pub echo_to: Option<OutputStream>,
    pub encoding: Encoding,
    pub pty: bool,
}

impl InputPump {
    pub(crate) fn spawn(self) -> io::Result<Worker> {
        Worker::spawn("stdin forwarder", move || WorkerReport {
            captured: String::new(),
            error: self.run().err(),
        })
    }

    fn run(mut self) -> std::result::Result<(), WorkerError> {
        let _mode = match self.input {
            LocalInput::Stdin => terminal::character_buffered(&io::stdin())?,
            LocalInput::Reader(_) => terminal::CbreakGuard::inactive(),
        };
        let mut decoder = self.encoding.decoder();
        let mut closed_stdin = false;
        loop {
            let data = self.input.read_available()?;
            let got_data = data.as_ref().is_some_and(|d| !d.is_empty());
            match data {
                Some(bytes) if !bytes.is_empty() => {
                    self.stdin.write(&bytes)?;
                    if let Some(out) = &self.echo_to {
                        out.write_str(&decoder.decode(&bytes))?;
                    }
                }
                Some(_) => {
                    if !self.pty && !closed_stdin {
                        self.stdin.close()?;
                        closed_stdin = true;
                    }
                }
                None => {}
            }
            // Keep draining while input is still arriving so nothing typed
            // just before exit gets lost.
            if self.finished.load(Ordering::SeqCst) && !got_data {
                return Ok(());
            }
            thread::sleep(INPUT_SLEEP);
        }
    }
}
