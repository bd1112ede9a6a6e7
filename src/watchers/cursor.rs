//! Per-thread scan positions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use regex::Regex;

/// Remembers how far each scanning thread has read into its stream.
///
/// Positions are byte offsets into the accumulated text. They only move
/// forward when a scan finds at least one match, and then only to the end
/// of the last match, so a pattern split across two read chunks is still
/// found once the second chunk arrives.
#[derive(Debug, Default)]
pub struct ScanCursor {
    positions: Mutex<HashMap<ThreadId, usize>>,
}

impl ScanCursor {
    /// Create a cursor with no recorded progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position for the calling thread.
    pub fn position(&self) -> usize {
        let positions = self
            .positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        positions.get(&thread::current().id()).copied().unwrap_or(0)
    }

    /// Find every match of `pattern` in the part of `stream` this thread
    /// has not scanned yet.
    ///
    /// When anything matches, the thread's position moves to the end of the
    /// last match.
    pub fn pattern_matches(&self, stream: &str, pattern: &Regex) -> Vec<String> {
        let id = thread::current().id();
        let mut positions = self
            .positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = positions.get(&id).copied().unwrap_or(0);
        // A reused watcher may be shown a stream shorter than its position.
        let unscanned = stream.get(index..).unwrap_or("");
        let mut end = None;
        let matches: Vec<String> = pattern
            .find_iter(unscanned)
            .map(|m| {
                end = Some(m.end());
                m.as_str().to_string()
            })
            .collect();
        if let Some(end) = end {
            positions.insert(id, index + end);
        }
        matches
    }
}
