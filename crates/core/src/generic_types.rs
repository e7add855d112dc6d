use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generic configuration for opening a duplex voice session with any provider.
#[derive(Debug, Clone, Default)]
pub struct LiveSessionConfig {
    pub system_instruction: String,
    pub tools: Vec<ToolDeclaration>,
}

/// A function the voice API may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Option<Value>,
}

/// A single function call requested by the voice API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolInvocation {
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// Generic events that any duplex voice provider can emit to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The provider accepted the session setup.
    SetupComplete,
    /// One or more function calls, in the order they were requested.
    ToolCall(Vec<ToolInvocation>),
    /// The provider withdrew these pending function calls.
    ToolCallCancellation(Vec<String>),
    /// A transcription fragment of the user's speech.
    InputTranscription(String),
    /// A transcription fragment of the provider's own speech.
    OutputTranscription(String),
    /// A chunk of spoken audio from the provider (base64 PCM).
    Audio(String),
    TurnComplete,
    /// The user barged in over the provider's speech.
    Interrupted,
    /// The provider will close the connection soon.
    GoAway { time_left: Option<String> },
    /// An error from the provider.
    Error(String),
    /// The connection was closed.
    Closed,
}
