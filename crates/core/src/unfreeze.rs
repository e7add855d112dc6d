//! Deferred answer to the delegate tool call.
//!
//! The voice API blocks until the delegate tool call is answered, but waiting
//! for the whole agent answer brings back dead air. Agent text is therefore
//! accumulated for a short window and the tool response is sent as soon as
//! the window closes or the agent finishes, whichever comes first. Every
//! path out of a relay (deadline, completion, failure) goes through the same
//! `sent` flag so the response leaves exactly once.

use serde_json::{Value, json};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct DeferredUnfreeze {
    initial: String,
    deadline: Instant,
    sent: bool,
    placeholder: String,
}

impl DeferredUnfreeze {
    pub fn start(now: Instant, delay: Duration, placeholder: impl Into<String>) -> Self {
        Self {
            initial: String::new(),
            deadline: now + delay,
            sent: false,
            placeholder: placeholder.into(),
        }
    }

    /// Accumulates agent text into the initial response. Returns `false`
    /// once the response has left, meaning the caller must relay the text
    /// some other way.
    pub fn push(&mut self, text: &str) -> bool {
        if self.sent {
            return false;
        }
        self.initial.push_str(text);
        true
    }

    /// Returns the tool response if the window has closed.
    pub fn poll(&mut self, now: Instant) -> Option<Value> {
        if now < self.deadline {
            return None;
        }
        self.complete()
    }

    /// Returns the tool response because the agent finished first.
    pub fn complete(&mut self) -> Option<Value> {
        if self.sent {
            return None;
        }
        self.sent = true;
        let text = self.initial.trim();
        let result = if text.is_empty() {
            self.placeholder.as_str()
        } else {
            text
        };
        Some(json!({ "result": result }))
    }

    /// Returns an error tool response. Whatever text arrived before the
    /// failure is passed along so the voice API can still speak it.
    pub fn fail(&mut self, message: &str) -> Option<Value> {
        if self.sent {
            return None;
        }
        self.sent = true;
        Some(json!({ "error": message, "result": self.initial.trim() }))
    }

    /// Deadline of the unsent response, if any.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.sent).then_some(self.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(1000);

    #[test]
    fn test_deadline_sends_accumulated_text_once() {
        let t0 = Instant::now();
        let mut unfreeze = DeferredUnfreeze::start(t0, DELAY, "Working on it.");

        assert!(unfreeze.push("Found "));
        assert_eq!(unfreeze.poll(t0 + Duration::from_millis(999)), None);
        assert_eq!(
            unfreeze.poll(t0 + DELAY),
            Some(json!({ "result": "Found" }))
        );
        assert_eq!(unfreeze.deadline(), None);

        // Everything after the send is rejected and nothing leaves twice.
        assert!(!unfreeze.push("3 files"));
        assert_eq!(unfreeze.poll(t0 + DELAY * 2), None);
        assert_eq!(unfreeze.complete(), None);
        assert_eq!(unfreeze.fail("boom"), None);
    }

    #[test]
    fn test_completion_before_deadline_sends_full_text() {
        let t0 = Instant::now();
        let mut unfreeze = DeferredUnfreeze::start(t0, DELAY, "Working on it.");

        unfreeze.push("Found ");
        unfreeze.push("3 files: a.go, b.go, c.go");
        assert_eq!(
            unfreeze.complete(),
            Some(json!({ "result": "Found 3 files: a.go, b.go, c.go" }))
        );
        assert_eq!(unfreeze.poll(t0 + DELAY), None);
    }

    #[test]
    fn test_placeholder_when_nothing_arrived() {
        let t0 = Instant::now();
        let mut unfreeze = DeferredUnfreeze::start(t0, DELAY, "Working on it.");
        assert_eq!(
            unfreeze.poll(t0 + DELAY),
            Some(json!({ "result": "Working on it." }))
        );
    }

    #[test]
    fn test_failure_carries_partial_text() {
        let t0 = Instant::now();
        let mut unfreeze = DeferredUnfreeze::start(t0, DELAY, "Working on it.");
        unfreeze.push("Partial ");
        assert_eq!(
            unfreeze.fail("backend unavailable"),
            Some(json!({ "error": "backend unavailable", "result": "Partial" }))
        );
        assert_eq!(unfreeze.complete(), None);
    }

    #[test]
    fn test_exactly_once_for_any_chunk_count_and_ending() {
        let t0 = Instant::now();
        for chunks in [0usize, 1, 5] {
            for ending in 0..3 {
                let mut unfreeze = DeferredUnfreeze::start(t0, DELAY, "p");
                let mut sent = 0;
                for i in 0..chunks {
                    unfreeze.push("x");
                    if i == 0 && unfreeze.poll(t0 + DELAY).is_some() {
                        sent += 1;
                    }
                }
                let last = match ending {
                    0 => unfreeze.complete(),
                    1 => unfreeze.fail("err"),
                    _ => unfreeze.poll(t0 + DELAY * 3),
                };
                sent += usize::from(last.is_some());
                sent += usize::from(unfreeze.complete().is_some());
                assert_eq!(sent, 1, "chunks={chunks} ending={ending}");
            }
        }
    }
}
