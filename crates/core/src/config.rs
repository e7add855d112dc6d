//! Relay configuration, injected once at controller construction.

use crate::approval::InteractionMode;
use crate::chunker::ChunkerConfig;
use crate::generic_types::ToolDeclaration;
use crate::keywords::KeywordMap;
use serde_json::json;
use std::time::Duration;

/// Name and description of the single "delegate to agent" tool.
#[derive(Debug, Clone)]
pub struct DelegateTool {
    pub name: String,
    pub description: String,
}

impl Default for DelegateTool {
    fn default() -> Self {
        Self {
            name: "converse".to_string(),
            description: "Send the user's request to the coding agent. Call this for every \
                          request about code, files, builds or the project. Pass the request \
                          as a clear, self-contained instruction."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub delegate_tool: DelegateTool,
    pub interaction_mode: InteractionMode,
    /// How long agent text is accumulated before the delegate tool call is
    /// answered.
    pub unfreeze_delay: Duration,
    pub chunker: ChunkerConfig,
    /// Synthetic input sent when the user spoke but the delegate tool was
    /// never invoked.
    pub nudge_text: String,
    /// Wraps each relayed chunk. `{text}` is replaced by the chunk.
    pub relay_template: String,
    /// Tool result used when the unfreeze fires before any agent text.
    pub unfreeze_placeholder: String,
    /// Tool result used when the human rejects an instruction.
    pub rejection_text: String,
    /// Spoken when the agent fails after the tool call was already answered.
    /// `{error}` is replaced by the failure message.
    pub failure_template: String,
    pub keywords: KeywordMap,
    /// Cap on mic audio retained for the current utterance.
    pub max_utterance_audio_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delegate_tool: DelegateTool::default(),
            interaction_mode: InteractionMode::Direct,
            unfreeze_delay: Duration::from_millis(1000),
            chunker: ChunkerConfig::default(),
            nudge_text: "You did not call the converse tool for my last request. Call it now \
                         with my request as the instruction."
                .to_string(),
            relay_template: "Read this aloud exactly, without commentary: {text}".to_string(),
            unfreeze_placeholder: "Working on it.".to_string(),
            rejection_text: "The user rejected this instruction. Do not run it. Ask what they \
                             want instead."
                .to_string(),
            failure_template: "Read this aloud: Sorry, the agent failed. {error}".to_string(),
            keywords: KeywordMap::default(),
            // Ten seconds of 16 kHz mono PCM16.
            max_utterance_audio_bytes: 16_000 * 2 * 10,
        }
    }
}

impl RelayConfig {
    /// Declaration of the delegate tool as advertised to the voice API.
    pub fn delegate_declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.delegate_tool.name.clone(),
            description: self.delegate_tool.description.clone(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "instruction": {
                        "type": "string",
                        "description": "The user's request, rewritten as a clear instruction for the agent."
                    }
                },
                "required": ["instruction"]
            })),
        }
    }

    pub fn relay_text(&self, chunk: &str) -> String {
        self.relay_template.replace("{text}", chunk)
    }

    pub fn failure_text(&self, error: &str) -> String {
        self.failure_template.replace("{error}", error)
    }
}
