use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Client -> server ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// A chunk of base64 PCM16 microphone audio.
    pub fn audio(data: String, sample_rate: u32) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: format!("audio/pcm;rate={}", sample_rate),
                data,
            },
        })
    }

    /// Synthetic user text, as if the user had said it.
    pub fn user_text(text: impl Into<String>, turn_complete: bool) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: text.into() }],
            }],
            turn_complete,
        })
    }

    pub fn tool_response(id: impl Into<String>, name: impl Into<String>, response: Value) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: id.into(),
                name: name.into(),
                response,
            }],
        })
    }
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    /// Audio-out session with both transcriptions switched on.
    pub fn audio(model: impl Into<String>, system_instruction: &str, tools: Vec<Tool>) -> Self {
        Self {
            model: model.into(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
            },
            system_instruction: (!system_instruction.trim().is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            }),
            tools,
            input_audio_transcription: Some(AudioTranscriptionConfig {}),
            output_audio_transcription: Some(AudioTranscriptionConfig {}),
        }
    }
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

/// Empty object; its presence enables the transcription.
#[derive(Serialize, Debug, Default)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug, Clone)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Debug)]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// --- Server -> client ---

/// One server message. Exactly one of the fields is normally set; unknown
/// fields are ignored.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
    pub usage_metadata: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub generation_complete: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let setup = Setup::audio(
            "models/gemini-live",
            "Be brief.",
            vec![Tool {
                function_declarations: vec![FunctionDeclaration {
                    name: "converse".to_string(),
                    description: "Ask the agent".to_string(),
                    parameters: Some(json!({ "type": "object" })),
                }],
            }],
        );
        let value = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-live",
                    "generationConfig": { "responseModalities": ["AUDIO"] },
                    "systemInstruction": { "parts": [{ "text": "Be brief." }] },
                    "tools": [{
                        "functionDeclarations": [{
                            "name": "converse",
                            "description": "Ask the agent",
                            "parameters": { "type": "object" }
                        }]
                    }],
                    "inputAudioTranscription": {},
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn test_blank_system_instruction_is_omitted() {
        let value = serde_json::to_value(ClientMessage::Setup(Setup::audio("m", "  ", vec![])))
            .unwrap();
        assert!(value["setup"].get("systemInstruction").is_none());
        assert!(value["setup"].get("tools").is_none());
    }

    #[test]
    fn test_client_message_helpers() {
        assert_eq!(
            serde_json::to_value(ClientMessage::audio("AAAA".to_string(), 16000)).unwrap(),
            json!({ "realtimeInput": { "audio": { "mimeType": "audio/pcm;rate=16000", "data": "AAAA" } } })
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::user_text("hi", true)).unwrap(),
            json!({ "clientContent": { "turns": [{ "role": "user", "parts": [{ "text": "hi" }] }], "turnComplete": true } })
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::tool_response(
                "c1",
                "converse",
                json!({ "result": "ok" })
            ))
            .unwrap(),
            json!({ "toolResponse": { "functionResponses": [{ "id": "c1", "name": "converse", "response": { "result": "ok" } }] } })
        );
    }

    #[test]
    fn test_parse_server_content() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }] },
                "outputTranscription": { "text": "Sure" },
                "turnComplete": true
            },
            "usageMetadata": { "totalTokenCount": 12 }
        }))
        .unwrap();
        let content = msg.server_content.unwrap();
        assert_eq!(content.model_turn.unwrap().parts[0].inline_data.as_ref().unwrap().data, "AAAA");
        assert_eq!(content.output_transcription.unwrap().text, "Sure");
        assert_eq!(content.turn_complete, Some(true));
        assert!(content.interrupted.is_none());
    }

    #[test]
    fn test_parse_tool_messages() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "toolCall": { "functionCalls": [{ "id": "c1", "name": "converse", "args": { "instruction": "ls" } }] }
        }))
        .unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].args["instruction"], "ls");

        let msg: ServerMessage =
            serde_json::from_value(json!({ "toolCallCancellation": { "ids": ["c1"] } })).unwrap();
        assert_eq!(msg.tool_call_cancellation.unwrap().ids, vec!["c1"]);

        let msg: ServerMessage = serde_json::from_value(json!({ "setupComplete": {} })).unwrap();
        assert!(msg.setup_complete.is_some());

        let msg: ServerMessage =
            serde_json::from_value(json!({ "goAway": { "timeLeft": "10s" } })).unwrap();
        assert_eq!(msg.go_away.unwrap().time_left.as_deref(), Some("10s"));
    }
}
