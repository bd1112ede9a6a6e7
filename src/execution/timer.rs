//! One-shot timeout timer.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::runner::ProcessControl;

/// Kills a process once `timeout` elapses unless cancelled first.
pub(crate) struct TimeoutTimer {
    cancel: Option<Sender<()>>,
    fired: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutTimer {
    pub(crate) fn start(timeout: Duration, process: Arc<dyn ProcessControl>) -> io::Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = thread::Builder::new()
            .name("taskrun timer".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    flag.store(true, Ordering::SeqCst);
                    tracing::debug!(?timeout, pid = ?process.pid(), "timeout expired, killing command");
                    if let Err(err) = process.kill() {
                        tracing::warn!("failed to kill timed-out command: {err}");
                    }
                }
            })?;
        Ok(Self {
            cancel: Some(cancel),
            fired,
            handle: Some(handle),
        })
    }

    /// Whether the timeout expired.
    pub(crate) fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop the timer; it never fires afterwards.
    pub(crate) fn cancel(&mut self) {
        // Dropping the sender wakes the timer thread with a disconnect.
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
