//! Conversation history.
//!
//! Committed turns and the voice API's own transcript live in two separate
//! append-only logs. A voice line only refers to the turn it belongs to by
//! index, so rewinding the transcript never has to touch the voice log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub index: usize,
    pub user_text: String,
    pub voice_text: String,
    /// Instruction sent to the agent during this turn, if any.
    pub instruction: Option<String>,
    pub agent_text: String,
    pub blocks: Vec<Value>,
    pub committed_at: DateTime<Utc>,
}

/// Pending input and output of the turn in progress.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TurnDraft {
    pub user_text: String,
    pub voice_text: String,
    pub instruction: Option<String>,
    pub agent_text: String,
    pub blocks: Vec<Value>,
}

impl TurnDraft {
    pub fn is_empty(&self) -> bool {
        self.user_text.trim().is_empty()
            && self.voice_text.trim().is_empty()
            && self.instruction.is_none()
            && self.agent_text.is_empty()
            && self.blocks.is_empty()
    }

    pub fn user_spoke(&self) -> bool {
        !self.user_text.trim().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TranscriptLog {
    turns: Vec<Turn>,
}

impl TranscriptLog {
    /// Commits a draft as the next turn. Empty drafts are not recorded.
    pub fn commit(&mut self, draft: TurnDraft) -> Option<Turn> {
        if draft.is_empty() {
            return None;
        }
        let turn = Turn {
            index: self.turns.len(),
            user_text: draft.user_text.trim().to_string(),
            voice_text: draft.voice_text.trim().to_string(),
            instruction: draft.instruction,
            agent_text: draft.agent_text,
            blocks: draft.blocks,
            committed_at: Utc::now(),
        };
        self.turns.push(turn.clone());
        Some(turn)
    }

    /// Truncates the log so that `to` becomes the next turn index. Returns
    /// the removed turns.
    pub fn rewind(&mut self, to: usize) -> Vec<Turn> {
        if to >= self.turns.len() {
            return Vec::new();
        }
        self.turns.split_off(to)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn next_index(&self) -> usize {
        self.turns.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceLine {
    pub turn_index: usize,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct VoiceLog {
    lines: Vec<VoiceLine>,
}

impl VoiceLog {
    pub fn push(&mut self, turn_index: usize, text: &str) {
        self.lines.push(VoiceLine {
            turn_index,
            text: text.to_string(),
        });
    }

    pub fn lines(&self) -> &[VoiceLine] {
        &self.lines
    }

    pub fn for_turn(&self, turn_index: usize) -> impl Iterator<Item = &VoiceLine> {
        self.lines.iter().filter(move |l| l.turn_index == turn_index)
    }
}
