//! Approval Gate: holds one instruction for human confirmation.
//!
//! A hold is resolved exactly once, either approved (possibly with edited
//! text) or rejected. Resolution may come from the UI or from a voice
//! keyword; the gate does not care which, it only guarantees that the second
//! attempt finds nothing to resolve.

use crate::error::RelayError;
use crate::keywords::KeywordAction;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a delegate tool call reaches the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Forward the instruction immediately.
    #[default]
    Direct,
    /// Hold the instruction until a human approves or rejects it.
    Review,
    /// Run the corrector first, then hold the corrected instruction.
    #[serde(alias = "auto-correct-then-review", alias = "auto_correct_then_review")]
    AutoCorrect,
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionMode::Direct => write!(f, "direct"),
            InteractionMode::Review => write!(f, "review"),
            InteractionMode::AutoCorrect => write!(f, "auto_correct"),
        }
    }
}

impl FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(InteractionMode::Direct),
            "review" => Ok(InteractionMode::Review),
            "auto_correct" | "auto-correct" | "auto-correct-then-review"
            | "auto_correct_then_review" => Ok(InteractionMode::AutoCorrect),
            other => Err(format!("unknown interaction mode '{}'", other)),
        }
    }
}

/// Snapshot of an instruction awaiting confirmation, as presented to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub hold_id: u64,
    /// The instruction exactly as the voice API produced it.
    pub instruction: String,
    /// Corrector output, when it differs from the raw instruction.
    pub corrected: Option<String>,
    /// Size of the utterance audio captured with this instruction.
    pub audio_bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    /// The text approved when no edit is supplied.
    pub fn proposed_text(&self) -> &str {
        self.corrected.as_deref().unwrap_or(&self.instruction)
    }
}

/// An (original, edited) pair for the correction-learning sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub original: String,
    pub edited: String,
    #[serde(skip)]
    pub audio: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Approved {
        text: String,
        correction: Option<CorrectionRecord>,
    },
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub hold_id: u64,
    pub resolution: Resolution,
}

struct Held {
    approval: PendingApproval,
    audio: Vec<u8>,
}

#[derive(Default)]
pub struct ApprovalGate {
    next_hold_id: u64,
    held: Option<Held>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new pending approval. Only one hold may exist at a time.
    pub fn hold(
        &mut self,
        instruction: String,
        corrected: Option<String>,
        audio: Vec<u8>,
    ) -> Result<PendingApproval, RelayError> {
        if let Some(held) = &self.held {
            return Err(RelayError::ApprovalAlreadyPending {
                hold_id: held.approval.hold_id,
            });
        }
        self.next_hold_id += 1;
        let approval = PendingApproval {
            hold_id: self.next_hold_id,
            instruction,
            corrected,
            audio_bytes: audio.len(),
            created_at: Utc::now(),
        };
        self.held = Some(Held {
            approval: approval.clone(),
            audio,
        });
        Ok(approval)
    }

    pub fn current(&self) -> Option<&PendingApproval> {
        self.held.as_ref().map(|h| &h.approval)
    }

    /// Approves the pending instruction.
    ///
    /// A non-blank `edited` text replaces the proposal. When the approved
    /// text differs from what was proposed, the raw instruction and the
    /// approved text are returned as a correction record.
    pub fn approve(
        &mut self,
        hold_id: Option<u64>,
        edited: Option<String>,
    ) -> Result<ApprovalOutcome, RelayError> {
        let held = self.take(hold_id)?;
        let proposed = held.approval.proposed_text().to_string();
        let text = edited
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| proposed.clone());

        let correction = (text != proposed).then(|| CorrectionRecord {
            original: held.approval.instruction.clone(),
            edited: text.clone(),
            audio: held.audio,
            created_at: Utc::now(),
        });

        Ok(ApprovalOutcome {
            hold_id: held.approval.hold_id,
            resolution: Resolution::Approved { text, correction },
        })
    }

    pub fn reject(&mut self, hold_id: Option<u64>) -> Result<ApprovalOutcome, RelayError> {
        let held = self.take(hold_id)?;
        Ok(ApprovalOutcome {
            hold_id: held.approval.hold_id,
            resolution: Resolution::Rejected,
        })
    }

    pub fn resolve_keyword(&mut self, action: KeywordAction) -> Result<ApprovalOutcome, RelayError> {
        match action {
            KeywordAction::Approve => self.approve(None, None),
            KeywordAction::Reject => self.reject(None),
        }
    }

    /// Drops the hold without resolving it.
    pub fn cancel(&mut self) -> Option<PendingApproval> {
        self.held.take().map(|h| h.approval)
    }

    fn take(&mut self, hold_id: Option<u64>) -> Result<Held, RelayError> {
        let current = self
            .held
            .as_ref()
            .map(|h| h.approval.hold_id)
            .ok_or(RelayError::NoPendingApproval)?;
        if let Some(requested) = hold_id {
            if requested != current {
                return Err(RelayError::StaleApproval { hold_id: requested });
            }
        }
        self.held.take().ok_or(RelayError::NoPendingApproval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_without_edit() {
        let mut gate = ApprovalGate::new();
        let pending = gate
            .hold("list files".to_string(), None, vec![1, 2, 3])
            .unwrap();
        assert_eq!(pending.hold_id, 1);
        assert_eq!(pending.audio_bytes, 3);
        assert!(gate.current().is_some());

        let outcome = gate.approve(None, None).unwrap();
        assert_eq!(
            outcome.resolution,
            Resolution::Approved {
                text: "list files".to_string(),
                correction: None
            }
        );
        assert!(gate.current().is_none());
    }

    #[test]
    fn test_edit_produces_correction_record() {
        let mut gate = ApprovalGate::new();
        gate.hold("list fails".to_string(), None, vec![9; 4]).unwrap();

        let outcome = gate
            .approve(None, Some("  list files  ".to_string()))
            .unwrap();
        match outcome.resolution {
            Resolution::Approved { text, correction } => {
                assert_eq!(text, "list files");
                let record = correction.unwrap();
                assert_eq!(record.original, "list fails");
                assert_eq!(record.edited, "list files");
                assert_eq!(record.audio, vec![9; 4]);
            }
            Resolution::Rejected => panic!("expected approval"),
        }
    }

    #[test]
    fn test_corrected_text_is_the_proposal() {
        let mut gate = ApprovalGate::new();
        let pending = gate
            .hold(
                "run the test".to_string(),
                Some("run the tests".to_string()),
                Vec::new(),
            )
            .unwrap();
        assert_eq!(pending.proposed_text(), "run the tests");

        let outcome = gate.approve(None, Some("   ".to_string())).unwrap();
        assert_eq!(
            outcome.resolution,
            Resolution::Approved {
                text: "run the tests".to_string(),
                correction: None
            }
        );
    }

    #[test]
    fn test_second_resolution_is_rejected() {
        let mut gate = ApprovalGate::new();
        gate.hold("deploy".to_string(), None, Vec::new()).unwrap();

        assert!(gate.resolve_keyword(KeywordAction::Reject).is_ok());
        assert_eq!(gate.approve(None, None), Err(RelayError::NoPendingApproval));
        assert_eq!(gate.reject(None), Err(RelayError::NoPendingApproval));
    }

    #[test]
    fn test_stale_hold_id_does_not_resolve() {
        let mut gate = ApprovalGate::new();
        gate.hold("first".to_string(), None, Vec::new()).unwrap();
        gate.reject(Some(1)).unwrap();
        gate.hold("second".to_string(), None, Vec::new()).unwrap();

        assert_eq!(
            gate.approve(Some(1), None),
            Err(RelayError::StaleApproval { hold_id: 1 })
        );
        assert_eq!(gate.current().unwrap().hold_id, 2);
    }

    #[test]
    fn test_only_one_hold_at_a_time() {
        let mut gate = ApprovalGate::new();
        gate.hold("a".to_string(), None, Vec::new()).unwrap();
        assert_eq!(
            gate.hold("b".to_string(), None, Vec::new()),
            Err(RelayError::ApprovalAlreadyPending { hold_id: 1 })
        );
        assert_eq!(gate.cancel().unwrap().instruction, "a");
        assert!(gate.current().is_none());
    }

    #[test]
    fn test_interaction_mode_parsing() {
        assert_eq!(
            "review".parse::<InteractionMode>(),
            Ok(InteractionMode::Review)
        );
        assert_eq!(
            "auto-correct-then-review".parse::<InteractionMode>(),
            Ok(InteractionMode::AutoCorrect)
        );
        assert!("sometimes".parse::<InteractionMode>().is_err());

        let mode: InteractionMode = serde_json::from_str("\"auto_correct_then_review\"").unwrap();
        assert_eq!(mode, InteractionMode::AutoCorrect);
        assert_eq!(serde_json::to_string(&mode).unwrap(), "\"auto_correct\"");
    }
}
