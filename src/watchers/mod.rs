//! Stream watchers: stateful scanners that answer subprocess output.
//!
//! A watcher is handed the *whole* text captured so far on one stream every
//! time a new chunk arrives, and returns the replies that should be written
//! to the subprocess's stdin.
//!
//! The same watcher instance may be attached to stdout and stderr at once,
//! and each stream is pumped by its own thread. Scan progress is therefore
//! tracked per calling thread (see [`ScanCursor`]), so a match consumed on
//! one stream never hides a match on the other.
//!
//! # Example
//!
//! ```
//! use taskrun::watchers::{Responder, StreamWatcher};
//!
//! let responder = Responder::new(r"Continue\? \[y/n\]", "y\n").unwrap();
//! let replies = responder.submit("Continue? [y/n] ").unwrap();
//! assert_eq!(replies, vec!["y\n".to_string()]);
//!
//! // Already-scanned text is not answered twice.
//! let replies = responder.submit("Continue? [y/n] ").unwrap();
//! assert!(replies.is_empty());
//! ```

mod cursor;
mod responder;

pub use cursor::ScanCursor;
pub use responder::{FailingResponder, Responder};

use thiserror::Error;

/// Something a watcher can do with a stream it has been shown.
pub trait StreamWatcher: Send + Sync {
    /// Inspect `stream` (everything captured so far on one stream) and
    /// return zero or more replies to write to the subprocess's stdin.
    fn submit(&self, stream: &str) -> Result<Vec<String>, WatcherError>;
}

/// Errors raised by watchers to abort a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatcherError {
    /// An automated reply was sent but the subprocess rejected it.
    #[error("{0}")]
    ResponseNotAccepted(String),

    /// Any other watcher-specific complaint.
    #[error("{0}")]
    Other(String),
}
