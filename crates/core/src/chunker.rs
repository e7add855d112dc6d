//! Sentence buffer that turns streamed text fragments into speakable units.
//!
//! Fragments are released at sentence boundaries once a minimum length is
//! reached, force-broken when a boundary never shows up, and flushed by a
//! fallback deadline so boundary-free text (code, lists) still gets spoken.
//! The buffer owns a single deadline that is always re-armed from the most
//! recent push, so there is never more than one live timer per buffer.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Minimum trimmed length of a released segment.
    pub min_chars: usize,
    /// Length past which the buffer is force-broken at the last whitespace.
    pub max_chars: usize,
    /// How long text may sit in the buffer without a boundary.
    pub fallback: Duration,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 20,
            max_chars: 200,
            fallback: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
pub struct SentenceBuffer {
    config: ChunkerConfig,
    buffer: String,
    deadline: Option<Instant>,
}

impl SentenceBuffer {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            deadline: None,
        }
    }

    /// Appends a fragment and returns every segment that became releasable,
    /// in stream order.
    pub fn push(&mut self, fragment: &str, now: Instant) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut segments = Vec::new();
        while let Some(end) = self.next_boundary().or_else(|| self.force_break()) {
            if let Some(segment) = self.take(end) {
                segments.push(segment);
            }
        }

        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            self.deadline = None;
        } else {
            self.deadline = Some(now + self.config.fallback);
        }
        segments
    }

    /// Fires the fallback deadline if it has passed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Drains the buffer. Used when the stream completes.
    pub fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        let remainder = self.buffer.trim().to_string();
        self.buffer.clear();
        (!remainder.is_empty()).then_some(remainder)
    }

    /// Discards the buffer without producing output. Used on interruption or
    /// cancellation.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Byte offset just past the first boundary whose prefix is long enough.
    ///
    /// A boundary is a newline, or `.`/`!`/`?` followed by whitespace. A
    /// terminator at the very end of the buffer is not yet a boundary since
    /// the next fragment may continue it (`a.go`, `3.5`).
    fn next_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let end = match c {
                '\n' => i + 1,
                '.' | '!' | '?' => match chars.peek() {
                    Some((_, next)) if next.is_whitespace() => i + 1,
                    _ => continue,
                },
                _ => continue,
            };
            if self.buffer[..end].trim().chars().count() >= self.config.min_chars {
                return Some(end);
            }
        }
        None
    }

    fn force_break(&self) -> Option<usize> {
        let limit = self
            .buffer
            .char_indices()
            .nth(self.config.max_chars)
            .map(|(i, _)| i)
            .filter(|&i| i > 0)?;
        let head = &self.buffer[..limit];
        match head.rfind(char::is_whitespace) {
            Some(i) if !head[..i].trim().is_empty() => Some(i),
            _ => Some(limit),
        }
    }

    fn take(&mut self, end: usize) -> Option<String> {
        let segment = self.buffer[..end].trim().to_string();
        self.buffer.drain(..end);
        let leading = self.buffer.len() - self.buffer.trim_start().len();
        self.buffer.drain(..leading);
        (!segment.is_empty()).then_some(segment)
    }
}
