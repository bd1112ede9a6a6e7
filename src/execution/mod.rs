//! Command execution engine.
//!
//! This module runs shell commands as subprocesses:
//! - Plain pipes or a pseudo-terminal
//! - Concurrent stdout/stderr capture with local echoing
//! - Stream watchers that answer prompts
//! - Timeouts, interrupt forwarding and failure classification
//! - Synchronous, asynchronous ([`Promise`]) and detached runs
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use taskrun::execution::{LocalRunner, RunOptions, Runner};
//!
//! let runner = LocalRunner::default();
//!
//! // Blocking run; a nonzero exit is an error unless `warn` is set.
//! let outcome = runner.run("ls /", RunOptions::new().hide(true))?;
//! let result = outcome.into_result().unwrap();
//! println!("{}", result.stdout);
//!
//! // Background run with a timeout.
//! let promise = runner
//!     .run(
//!         "sleep 1; echo done",
//!         RunOptions::new().asynchronous(true).timeout(Duration::from_secs(5)),
//!     )?
//!     .into_promise()
//!     .unwrap();
//! let result = promise.join()?;
//! assert!(result.ok());
//! # Ok::<(), taskrun::TaskrunError>(())
//! ```

mod encoding;
mod interrupt;
mod io;
mod local;
mod options;
mod promise;
mod result;
mod runner;
mod timer;

pub use encoding::{Encoding, IncrementalDecoder};
pub use local::LocalRunner;
pub use options::{
    generate_env, HideSet, HideSpec, InStream, OutputStream, ResolvedOptions, RunOptions,
    StreamKind,
};
pub use promise::{Promise, RunOutcome};
pub use result::RunResult;
pub use runner::{ProcessControl, Runner, Spawned};
