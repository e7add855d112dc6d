//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! Text frames carry the JSON messages below. Binary frames from the client
//! are raw microphone PCM16 at 16 kHz.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use voxrelay_core::{
    approval::{InteractionMode, PendingApproval},
    history::Turn,
    phase::{ConnectionStatus, RelayPhase},
};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a session. This must be the first message.
    Init {
        interaction_mode: Option<InteractionMode>,
        /// Capture rate of the binary mic frames. Defaults to 16 kHz.
        input_sample_rate: Option<u32>,
    },
    /// Opens or closes the duplex voice session.
    SetVoiceEnabled { enabled: bool },
    Approve {
        hold_id: Option<u64>,
        edited_text: Option<String>,
    },
    Reject { hold_id: Option<u64> },
    /// A result from the browser's keyword recognizer.
    KeywordResult {
        epoch: u64,
        text: String,
        is_final: bool,
    },
    /// A Web Speech error code from the keyword recognizer.
    KeywordError { epoch: u64, error: String },
    SetInteractionMode { mode: InteractionMode },
    /// Drops committed turns from index `to` on.
    Rewind { to: usize },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Initialized {
        session_id: Uuid,
        interaction_mode: InteractionMode,
    },
    Status { status: ConnectionStatus },
    Phase { phase: RelayPhase },
    /// A fragment of the user's speech-to-text transcription.
    TranscriptionUpdate { text: String, is_final: bool },
    /// What the voice model said on its own, outside a relay.
    VoiceText { text: String },
    AgentText { text: String },
    AgentBlock { block: Value },
    /// Base64 PCM16 at 24 kHz, to be started `start_at_ms` after the
    /// session's playback origin.
    AudioChunk { data: String, start_at_ms: u64 },
    /// Stop playback and drop everything queued.
    AudioFlush,
    ApprovalRequested { approval: PendingApproval },
    ApprovalCleared { hold_id: u64 },
    KeywordListenerStart { epoch: u64, keywords: Vec<String> },
    KeywordListenerStop { epoch: u64 },
    TurnCommitted { turn: Turn },
    Rewound { to: usize, removed: usize },
    ModeChanged { mode: InteractionMode },
    Notice { message: String },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"init"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                interaction_mode: None,
                input_sample_rate: None
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"init","interaction_mode":"review","input_sample_rate":48000}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                interaction_mode: Some(InteractionMode::Review),
                input_sample_rate: Some(48000)
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"approve","edited_text":"list all files"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Approve {
                hold_id: None,
                edited_text: Some("list all files".to_string())
            }
        );

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"keyword_result","epoch":3,"text":"yes","is_final":true}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::KeywordResult {
                epoch: 3,
                text: "yes".to_string(),
                is_final: true
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"rewind","to":2}"#).unwrap();
        assert_eq!(msg, ClientMessage::Rewind { to: 2 });
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"rewind","to":-1}"#).is_err());
    }

    #[test]
    fn test_unknown_client_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"user_message","text":"hi"}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        assert_eq!(
            serde_json::to_value(ServerMessage::Phase {
                phase: RelayPhase::Suppressing
            })
            .unwrap(),
            json!({ "type": "phase", "phase": "suppressing" })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::AudioChunk {
                data: "AAAA".to_string(),
                start_at_ms: 120
            })
            .unwrap(),
            json!({ "type": "audio_chunk", "data": "AAAA", "start_at_ms": 120 })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::AudioFlush).unwrap(),
            json!({ "type": "audio_flush" })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::KeywordListenerStart {
                epoch: 1,
                keywords: vec!["no".to_string(), "yes".to_string()]
            })
            .unwrap(),
            json!({ "type": "keyword_listener_start", "epoch": 1, "keywords": ["no", "yes"] })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Rewound { to: 1, removed: 2 }).unwrap(),
            json!({ "type": "rewound", "to": 1, "removed": 2 })
        );
    }
}
