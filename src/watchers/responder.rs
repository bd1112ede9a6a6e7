//! Pattern-triggered auto-responders.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::{Regex, RegexBuilder};

use super::{ScanCursor, StreamWatcher, WatcherError};

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
}

/// Writes a fixed reply every time its pattern shows up.
pub struct Responder {
    pattern: Regex,
    response: String,
    cursor: ScanCursor,
}

impl Responder {
    /// Create a responder answering every match of `pattern` with `response`.
    pub fn new(pattern: &str, response: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: compile(pattern)?,
            response: response.into(),
            cursor: ScanCursor::new(),
        })
    }

    /// The compiled pattern.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// The reply text.
    pub fn response(&self) -> &str {
        &self.response
    }
}

impl StreamWatcher for Responder {
    fn submit(&self, stream: &str) -> Result<Vec<String>, WatcherError> {
        let hits = self.cursor.pattern_matches(stream, &self.pattern).len();
        Ok(vec![self.response.clone(); hits])
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("pattern", &self.pattern.as_str())
            .field("response", &self.response)
            .finish()
    }
}

/// A [`Responder`] that also watches for a sign its reply was refused.
///
/// The sentinel only counts once at least one reply has gone out: seeing
/// it earlier just means the subprocess has not been answered yet.
pub struct FailingResponder {
    responder: Responder,
    sentinel: Regex,
    failure_cursor: ScanCursor,
    tried: AtomicBool,
}

impl FailingResponder {
    /// Create a failing responder.
    pub fn new(
        pattern: &str,
        response: impl Into<String>,
        sentinel: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            responder: Responder::new(pattern, response)?,
            sentinel: compile(sentinel)?,
            failure_cursor: ScanCursor::new(),
            tried: AtomicBool::new(false),
        })
    }

    /// Whether a reply has been produced yet.
    pub fn tried(&self) -> bool {
        self.tried.load(Ordering::SeqCst)
    }
}

impl StreamWatcher for FailingResponder {
    fn submit(&self, stream: &str) -> Result<Vec<String>, WatcherError> {
        let replies = self.responder.submit(stream)?;
        let failed = !self
            .failure_cursor
            .pattern_matches(stream, &self.sentinel)
            .is_empty();
        if failed && self.tried() {
            return Err(WatcherError::ResponseNotAccepted(format!(
                "Auto-response to r\"{}\" failed with {:?}!",
                self.responder.pattern.as_str(),
                self.sentinel.as_str()
            )));
        }
        if !replies.is_empty() {
            self.tried.store(true, Ordering::SeqCst);
        }
        Ok(replies)
    }
}

impl fmt::Debug for FailingResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingResponder")
            .field("responder", &self.responder)
            .field("sentinel", &self.sentinel.as_str())
            .field("tried", &self.tried())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Feed `text` in `size`-byte chunks the way a reader thread would.
    fn feed_in_chunks(watcher: &dyn StreamWatcher, text: &str, size: usize) -> Vec<String> {
        let mut buffer = String::new();
        let mut replies = Vec::new();
        for chunk in text.as_bytes().chunks(size) {
            buffer.push_str(std::str::from_utf8(chunk).unwrap());
            replies.extend(watcher.submit(&buffer).unwrap());
        }
        replies
    }

    #[test]
    fn test_replies_once_per_match() {
        let responder = Responder::new("password:", "hunter2\n").unwrap();
        let replies = responder.submit("password: password:").unwrap();
        assert_eq!(replies, vec!["hunter2\n", "hunter2\n"]);
    }

    #[test]
    fn test_no_match_no_reply() {
        let responder = Responder::new("password:", "hunter2\n").unwrap();
        assert!(responder.submit("nothing here").unwrap().is_empty());
    }

    #[test]
    fn test_chunked_stream_yields_exact_count() {
        let responder = Responder::new("Proceed\\?", "y\n").unwrap();
        let text = "Proceed? working\nProceed? more work\nProceed? done\n";
        for size in 1..="Proceed?".len() {
            let fresh = Responder::new("Proceed\\?", "y\n").unwrap();
            assert_eq!(feed_in_chunks(&fresh, text, size).len(), 3, "chunk size {size}");
        }
        assert_eq!(feed_in_chunks(&responder, text, 1000).len(), 3);
    }

    #[test]
    fn test_adjacent_prompts_across_chunks() {
        let text = "Proceed?Proceed?";
        for size in 1..="Proceed?".len() {
            let responder = Responder::new("Proceed\\?", "y\n").unwrap();
            assert_eq!(feed_in_chunks(&responder, text, size).len(), 2, "chunk size {size}");
        }
    }

    #[test]
    fn test_multiline_anchors() {
        let responder = Responder::new("^Name: $", "bob\n").unwrap();
        let replies = responder.submit("Welcome\nName: ").unwrap();
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_same_instance_on_two_threads() {
        let responder = Arc::new(Responder::new("ready", "go\n").unwrap());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let watcher = Arc::clone(&responder);
                std::thread::spawn(move || watcher.submit("ready").unwrap().len())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_sentinel_before_reply_is_not_failure() {
        let watcher = FailingResponder::new("Password: ", "pw\n", "Sorry").unwrap();
        assert!(watcher.submit("Sorry, not yet").unwrap().is_empty());
        assert!(!watcher.tried());

        let replies = watcher.submit("Sorry, not yet\nPassword: ").unwrap();
        assert_eq!(replies, vec!["pw\n"]);
        assert!(watcher.tried());
    }

    #[test]
    fn test_sentinel_after_reply_fails() {
        let watcher = FailingResponder::new("Password: ", "pw\n", "Sorry, try again.").unwrap();
        let mut stream = String::from("Password: ");
        assert_eq!(watcher.submit(&stream).unwrap().len(), 1);

        stream.push_str("\nSorry, try again.\n");
        let err = watcher.submit(&stream).unwrap_err();
        assert!(matches!(err, WatcherError::ResponseNotAccepted(_)));
        assert!(err.to_string().contains("Auto-response"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Responder::new("(unclosed", "x").is_err());
        assert!(FailingResponder::new("ok", "x", "[").is_err());
    }
}
