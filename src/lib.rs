//! # taskrun
//!
//! Shell command execution engine for task runners.
//!
//! This crate runs shell commands as local subprocesses and turns each run
//! into either a [`RunResult`] or a typed [`TaskrunError`]. It pumps stdout,
//! stderr and stdin concurrently on OS threads, can put the command on a
//! pseudo-terminal, answers prompts through stream watchers, and enforces
//! timeouts.
//!
//! ## Features
//!
//! - **Pipes or pty**: separate stdout/stderr, or one merged terminal stream
//! - **Watchers**: [`Responder`] and [`FailingResponder`] auto-reply to prompts
//! - **Failure taxonomy**: unexpected exit, timeout, thread and watcher failures
//! - **Async and detached runs**: [`Promise`] handles or fire-and-forget
//! - **Layered configuration**: JSON file, `TASKRUN_*` variables, CLI flags
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskrun::{Context, HideSet, Responder, RunOptions};
//!
//! fn main() -> taskrun::Result<()> {
//!     // Initialize logging
//!     taskrun::logging::try_init().ok();
//!
//!     let context = Context::default();
//!
//!     // Answer an installer's question automatically.
//!     let yes = Responder::new(r"Continue\? \[y/N\]", "y\n").expect("valid pattern");
//!     let outcome = context.run(
//!         "./install.sh",
//!         RunOptions::new().watcher(Arc::new(yes)).hide(HideSet::STDOUT),
//!     )?;
//!
//!     if let Some(result) = outcome.join()? {
//!         println!("installer exited with {:?}", result.exited);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod logging;
pub mod pty;
pub mod terminal;
pub mod watchers;

// Re-export commonly used types
pub use config::Config;
pub use context::{Context, SudoOptions};
pub use error::{Result, TaskrunError, ThreadFailure};
pub use execution::{
    Encoding, HideSet, InStream, LocalRunner, OutputStream, Promise, RunOptions, RunOutcome,
    RunResult, Runner, StreamKind,
};
pub use pty::{NativePty, PtyHandle, PtySize};
pub use watchers::{FailingResponder, Responder, StreamWatcher, WatcherError};
