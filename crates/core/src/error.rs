//! Protocol-level errors raised by the relay state machine.
//!
//! None of these are fatal: the relay logs them and carries on. They exist as
//! typed values so callers and tests can tell exactly which rule was violated.

use crate::phase::RelayPhase;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("delegate tool invoked while relay phase is {phase}")]
    ToolCallWhileBusy { phase: RelayPhase },

    #[error("invalid relay phase transition from {from} to {to}")]
    InvalidTransition { from: RelayPhase, to: RelayPhase },

    #[error("an approval is already pending (hold {hold_id})")]
    ApprovalAlreadyPending { hold_id: u64 },

    #[error("no approval is pending")]
    NoPendingApproval,

    #[error("approval hold {hold_id} is no longer pending")]
    StaleApproval { hold_id: u64 },

    #[error("delegate tool call is missing the `instruction` argument")]
    MissingInstruction,

    #[error("cannot rewind while relay phase is {phase}")]
    RewindWhileBusy { phase: RelayPhase },

    #[error("voice session is closed")]
    SessionClosed,
}
