//! Relay phase and connection status.
//!
//! The relay phase is converse-lifecycle state, independent of whether the
//! duplex connection is up. It decides which of the voice API's own outputs
//! are allowed to reach the listener while a delegated turn is in flight.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suppression state of the current delegated turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    /// No delegated turn in flight; the voice API speaks for itself.
    #[default]
    Idle,
    /// The delegate tool was invoked and the agent has not produced text yet.
    /// Anything the voice API emits now is stale chatter.
    Suppressing,
    /// Agent text is flowing; the voice API is reading it aloud.
    Relaying,
}

impl RelayPhase {
    /// Voice API audio is played in every phase except `Suppressing`.
    pub fn passes_audio(self) -> bool {
        !matches!(self, RelayPhase::Suppressing)
    }

    /// The voice API's own transcript only reaches history while idle. During
    /// a relay it is either stale or an echo of text we already have.
    pub fn passes_output_text(self) -> bool {
        matches!(self, RelayPhase::Idle)
    }

    /// Validates a phase transition.
    ///
    /// `Suppressing -> Idle` is legal: a rejected approval, a cancelled tool
    /// call, or an agent failure before the first chunk all end the relay
    /// without ever entering `Relaying`.
    pub fn transition(self, to: RelayPhase) -> Result<RelayPhase, RelayError> {
        use RelayPhase::*;
        match (self, to) {
            (Idle, Suppressing) | (Suppressing, Relaying) | (Suppressing, Idle) | (Relaying, Idle) => {
                Ok(to)
            }
            (from, to) => Err(RelayError::InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayPhase::Idle => write!(f, "idle"),
            RelayPhase::Suppressing => write!(f, "suppressing"),
            RelayPhase::Relaying => write!(f, "relaying"),
        }
    }
}

/// Status of the duplex voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
}
