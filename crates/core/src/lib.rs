pub mod approval;
pub mod audio;
pub mod bridge;
pub mod chunker;
pub mod config;
pub mod converse;
pub mod correction;
pub mod error;
pub mod generic_types;
pub mod history;
pub mod keywords;
pub mod phase;
pub mod relay;
pub mod tools;
pub mod unfreeze;

use approval::{CorrectionRecord, PendingApproval};
use bytes::Bytes;
use converse::ConverseRequest;
use generic_types::ToolInvocation;
use history::Turn;
use phase::{ConnectionStatus, RelayPhase};
use serde_json::Value;

/// Represents commands that the relay core issues to an external runtime.
///
/// The relay never touches a socket, a timer or a task itself. Every input it
/// receives is answered with a list of these, which the runtime executes in
/// order. This keeps every decision testable without any I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Forward a chunk of microphone PCM to the voice API.
    SendAudio(Bytes),
    /// Inject synthetic text input into the voice API.
    SendText { text: String, turn_complete: bool },
    /// Answer a tool call on the voice API.
    SendToolResponse {
        id: String,
        name: String,
        response: Value,
    },
    /// Play a base64 PCM chunk produced by the voice API.
    PlayAudio(String),
    /// Drop everything queued on the player immediately.
    FlushAudio,
    /// Open a streamed request to the agent backend.
    StartConverse {
        stream_id: u64,
        request: ConverseRequest,
    },
    /// Cancel an in-flight agent stream.
    AbortConverse { stream_id: u64 },
    /// Execute a peripheral (non-delegate) tool and report its result back.
    CallTool(ToolInvocation),
    /// Ask the corrector to rewrite an instruction before it is held.
    RequestCorrection { call_id: String, instruction: String },
    /// Present a pending approval to the human.
    ShowApproval(PendingApproval),
    /// The approval with this hold id no longer needs presenting.
    ClearApproval { hold_id: u64 },
    /// Arm the keyword recognizer.
    StartKeywordListener { epoch: u64, keywords: Vec<String> },
    /// Disarm the keyword recognizer.
    StopKeywordListener { epoch: u64 },
    /// Hand an (original, edited) pair to the correction sink.
    RecordCorrection(CorrectionRecord),
    /// A turn has been committed to permanent history.
    CommitTurn(Turn),
    UserTranscript(String),
    VoiceTranscript(String),
    AgentText(String),
    AgentBlock(Value),
    PhaseChanged(RelayPhase),
    StatusChanged(ConnectionStatus),
    /// Informational message for the user.
    Notify(String),
    /// User-visible error.
    ReportError(String),
}
