//! Interrupt forwarding.
//!
//! While a run waits for its subprocess, SIGINT is caught and recorded so
//! the waiter can pass an ETX byte (Ctrl-C) to the subprocess instead of
//! dying. With no run waiting, SIGINT keeps its default action.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use signal_hook::consts::SIGINT;

/// The byte a terminal sends for Ctrl-C.
pub(crate) const ETX: u8 = 0x03;

struct InterruptState {
    pending: Arc<AtomicBool>,
    idle: Arc<AtomicBool>,
    /// Number of armed watches. `idle` is only written under this lock so
    /// it always agrees with the count.
    waiters: Mutex<usize>,
}

static STATE: OnceLock<Option<InterruptState>> = OnceLock::new();

fn install() -> Option<InterruptState> {
    let pending = Arc::new(AtomicBool::new(false));
    let idle = Arc::new(AtomicBool::new(true));
    // Default action while no run is waiting.
    let registered = signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&idle))
        .and_then(|_| signal_hook::flag::register(SIGINT, Arc::clone(&pending)));
    match registered {
        Ok(_) => Some(InterruptState {
            pending,
            idle,
            waiters: Mutex::new(0),
        }),
        Err(err) => {
            tracing::warn!("cannot intercept SIGINT, interrupts will not be forwarded: {err}");
            None
        }
    }
}

/// Marks the current thread as waiting on a subprocess. Dropping it
/// restores the default SIGINT behaviour once no other run is waiting.
pub(crate) struct InterruptWatch {
    state: Option<&'static InterruptState>,
}

impl InterruptWatch {
    pub(crate) fn arm() -> Self {
        let state = STATE.get_or_init(install).as_ref();
        if let Some(state) = state {
            let mut waiters = state.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            *waiters += 1;
            state.idle.store(false, Ordering::SeqCst);
        }
        Self { state }
    }

    /// Whether an interrupt arrived since the last call.
    pub(crate) fn take(&self) -> bool {
        self.state
            .is_some_and(|state| state.pending.swap(false, Ordering::SeqCst))
    }
}

impl Drop for InterruptWatch {
    fn drop(&mut self) {
        if let Some(state) = self.state {
            let mut waiters = state.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            *waiters = waiters.saturating_sub(1);
            if *waiters == 0 {
                state.idle.store(true, Ordering::SeqCst);
            }
        }
    }
}
