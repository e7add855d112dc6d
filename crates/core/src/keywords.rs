//! Voice keyword listener.
//!
//! Recognition itself happens elsewhere (the browser's speech recognizer);
//! this module owns the arming state. Each arming gets a fresh epoch so
//! results from a recognizer that was already stopped can be told apart
//! from live ones, and at most one trigger is produced per epoch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordAction {
    Approve,
    Reject,
}

const APPROVE_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "approve", "approved", "go", "send", "ok", "okay", "confirm", "sure",
];
const REJECT_WORDS: &[&str] = &["no", "nope", "reject", "cancel", "stop", "abort"];

/// Word to action lookup. Matching is on whole, lowercased words.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMap {
    words: BTreeMap<String, KeywordAction>,
}

impl Default for KeywordMap {
    fn default() -> Self {
        let mut map = Self::empty();
        for word in APPROVE_WORDS {
            map.insert(word, KeywordAction::Approve);
        }
        for word in REJECT_WORDS {
            map.insert(word, KeywordAction::Reject);
        }
        map
    }
}

impl KeywordMap {
    pub fn empty() -> Self {
        Self {
            words: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, word: &str, action: KeywordAction) {
        self.words.insert(word.trim().to_lowercase(), action);
    }

    /// First keyword in `text`, scanning words left to right.
    pub fn match_text(&self, text: &str) -> Option<KeywordAction> {
        text.split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .find_map(|w| self.words.get(&w).copied())
    }

    pub fn words(&self) -> Vec<String> {
        self.words.keys().cloned().collect()
    }
}

/// Recognizer failures, keyed by the Web Speech error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    NotAllowed,
    ServiceNotAllowed,
    AudioCapture,
    NoSpeech,
    Aborted,
    Network,
    Other(String),
}

impl RecognitionError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "audio-capture" => Self::AudioCapture,
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }

    /// Permission and device failures will not go away by retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::NotAllowed | Self::ServiceNotAllowed | Self::AudioCapture
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerReaction {
    Restart,
    Stop,
    Ignore,
}

#[derive(Debug)]
pub struct KeywordListener {
    keywords: KeywordMap,
    epoch: u64,
    armed: bool,
    disabled: bool,
}

impl KeywordListener {
    pub fn new(keywords: KeywordMap) -> Self {
        Self {
            keywords,
            epoch: 0,
            armed: false,
            disabled: false,
        }
    }

    /// Arms the listener for a new period. Returns `None` once a permission
    /// failure has disabled voice keywords for this session.
    pub fn arm(&mut self) -> Option<u64> {
        if self.disabled {
            debug!("Keyword listener disabled, not arming");
            return None;
        }
        self.epoch += 1;
        self.armed = true;
        Some(self.epoch)
    }

    /// Disarms the listener, returning the epoch that was live.
    pub fn disarm(&mut self) -> Option<u64> {
        if !self.armed {
            return None;
        }
        self.armed = false;
        Some(self.epoch)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn keywords(&self) -> &KeywordMap {
        &self.keywords
    }

    /// Handles one recognition result. On the first match the listener
    /// disarms itself and returns the action.
    pub fn on_result(&mut self, epoch: u64, text: &str, is_final: bool) -> Option<KeywordAction> {
        if !self.is_live(epoch) {
            debug!(epoch, "Ignoring keyword result for a stale epoch");
            return None;
        }
        if !is_final {
            return None;
        }
        let action = self.keywords.match_text(text)?;
        info!(epoch, ?action, "Voice keyword matched");
        self.armed = false;
        Some(action)
    }

    pub fn on_error(&mut self, epoch: u64, error: &RecognitionError) -> ListenerReaction {
        if !self.is_live(epoch) {
            return ListenerReaction::Ignore;
        }
        if error.is_permanent() {
            warn!(epoch, ?error, "Keyword recognition denied, voice approval disabled");
            self.armed = false;
            self.disabled = true;
            ListenerReaction::Stop
        } else {
            debug!(epoch, ?error, "Keyword recognition interrupted, restarting");
            ListenerReaction::Restart
        }
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.armed && epoch == self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_whole_words_only() {
        let map = KeywordMap::default();
        assert_eq!(map.match_text("Yes, do it."), Some(KeywordAction::Approve));
        assert_eq!(map.match_text("NO!"), Some(KeywordAction::Reject));
        // "going" and "known" contain keywords but are not keywords.
        assert_eq!(map.match_text("going known"), None);
        // First match wins.
        assert_eq!(
            map.match_text("cancel that, yes"),
            Some(KeywordAction::Reject)
        );
    }

    #[test]
    fn test_one_trigger_per_arming() {
        let mut listener = KeywordListener::new(KeywordMap::default());
        let epoch = listener.arm().unwrap();

        assert_eq!(listener.on_result(epoch, "hmm yes", false), None);
        assert_eq!(
            listener.on_result(epoch, "yes", true),
            Some(KeywordAction::Approve)
        );
        assert!(!listener.is_armed());
        assert_eq!(listener.on_result(epoch, "no", true), None);
        assert_eq!(listener.disarm(), None);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let mut listener = KeywordListener::new(KeywordMap::default());
        let first = listener.arm().unwrap();
        listener.disarm();
        let second = listener.arm().unwrap();
        assert_ne!(first, second);

        assert_eq!(listener.on_result(first, "yes", true), None);
        assert_eq!(
            listener.on_error(first, &RecognitionError::NoSpeech),
            ListenerReaction::Ignore
        );
        assert!(listener.is_armed());
    }

    #[test]
    fn test_transient_errors_restart() {
        let mut listener = KeywordListener::new(KeywordMap::default());
        let epoch = listener.arm().unwrap();
        for code in ["no-speech", "aborted", "network", "something-new"] {
            assert_eq!(
                listener.on_error(epoch, &RecognitionError::from_code(code)),
                ListenerReaction::Restart
            );
        }
        assert!(listener.is_armed());
    }

    #[test]
    fn test_permission_denial_disables_for_good() {
        let mut listener = KeywordListener::new(KeywordMap::default());
        let epoch = listener.arm().unwrap();
        assert_eq!(
            listener.on_error(epoch, &RecognitionError::from_code("not-allowed")),
            ListenerReaction::Stop
        );
        assert!(!listener.is_armed());
        assert_eq!(listener.arm(), None);
    }

    #[test]
    fn test_custom_map() {
        let mut map = KeywordMap::empty();
        map.insert(" Ship ", KeywordAction::Approve);
        assert_eq!(map.match_text("ship it"), Some(KeywordAction::Approve));
        assert_eq!(map.words(), vec!["ship".to_string()]);
    }
}
