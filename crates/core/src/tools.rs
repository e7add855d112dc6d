//! Relay Side Tools
//!
//! Besides the delegate tool, the voice API gets a few small tools that act on
//! the relay itself. They are served over the Model Context Protocol (MCP) so
//! the voice session can discover and call them the same way it would call
//! any other MCP server.

use crate::approval::InteractionMode;
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Session settings the voice user may change by asking for it.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct RelaySettings {
    /// How instructions reach the agent.
    pub interaction_mode: InteractionMode,
    /// Bumped every time the user asks for a fresh agent conversation.
    pub conversation_generation: u64,
}

impl RelaySettings {
    pub fn new(interaction_mode: InteractionMode) -> Self {
        Self {
            interaction_mode,
            conversation_generation: 0,
        }
    }
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SetInteractionModeArgs {
    #[schemars(
        description = "One of 'direct' (send immediately), 'review' (ask for approval first) or 'auto_correct' (fix the wording, then ask for approval)"
    )]
    pub mode: String,
}

/// MCP server exposing the relay side tools.
pub struct RelayToolService {
    pub settings: Arc<tokio::sync::Mutex<RelaySettings>>,
    /// Optional channel for pushing settings changes to the session runtime.
    pub settings_tx: Option<mpsc::Sender<RelaySettings>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for RelayToolService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl RelayToolService {
    pub fn new(
        settings: Arc<tokio::sync::Mutex<RelaySettings>>,
        settings_tx: Option<mpsc::Sender<RelaySettings>>,
    ) -> Self {
        Self {
            settings,
            settings_tx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get the current relay settings, including the interaction mode.")]
    pub async fn get_relay_settings(&self) -> Result<String, String> {
        info!("Executing tool 'get_relay_settings'");
        let settings = self.settings.lock().await;
        serde_json::to_string(&*settings)
            .map_err(|e| format!("Failed to serialize relay settings: {}", e))
    }

    /// Switches between sending instructions directly and holding them for
    /// approval.
    #[tool(
        description = "Change how the user's requests reach the coding agent: 'direct', 'review' or 'auto_correct'."
    )]
    pub async fn set_interaction_mode(
        &self,
        args: Parameters<SetInteractionModeArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'set_interaction_mode'");
        let mode: InteractionMode = args.0.mode.parse()?;

        let mut settings = self.settings.lock().await;
        settings.interaction_mode = mode;
        self.broadcast(&settings).await;
        Ok(format!("OK. Interaction mode is now {}.", mode))
    }

    #[tool(
        description = "Start a fresh conversation with the coding agent. The next request will not continue the previous one."
    )]
    pub async fn start_new_conversation(&self) -> Result<String, String> {
        info!("Executing tool 'start_new_conversation'");
        let mut settings = self.settings.lock().await;
        settings.conversation_generation += 1;
        self.broadcast(&settings).await;
        Ok("OK. The next request starts a new agent conversation.".to_string())
    }

    async fn broadcast(&self, settings: &RelaySettings) {
        if let Some(tx) = &self.settings_tx {
            if tx.send(settings.clone()).await.is_err() {
                tracing::warn!("Failed to broadcast settings update: receiver dropped.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::{
        ServiceExt,
        model::{CallToolRequestParam, RawContent},
    };
    use serde_json::json;

    async fn connect(
        settings: Arc<tokio::sync::Mutex<RelaySettings>>,
        tx: mpsc::Sender<RelaySettings>,
    ) -> rmcp::service::RunningService<rmcp::service::RoleClient, ()> {
        let service = RelayToolService::new(settings, Some(tx));
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            if let Ok(running) = service.serve(server_transport).await {
                let _ = running.waiting().await;
            }
        });
        ().serve(client_transport).await.unwrap()
    }

    #[tokio::test]
    async fn test_lists_side_tools() {
        let settings = Arc::new(tokio::sync::Mutex::new(RelaySettings::new(
            InteractionMode::Direct,
        )));
        let (tx, _rx) = mpsc::channel(4);
        let client = connect(settings, tx).await;

        let mut names: Vec<String> = client
            .list_all_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "get_relay_settings",
                "set_interaction_mode",
                "start_new_conversation"
            ]
        );
    }

    #[tokio::test]
    async fn test_set_mode_updates_and_broadcasts() {
        let settings = Arc::new(tokio::sync::Mutex::new(RelaySettings::new(
            InteractionMode::Direct,
        )));
        let (tx, mut rx) = mpsc::channel(4);
        let client = connect(settings.clone(), tx).await;

        let result = client
            .peer()
            .call_tool(CallToolRequestParam {
                name: "set_interaction_mode".into(),
                arguments: json!({ "mode": "review" }).as_object().cloned(),
            })
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        let text = match result.content.unwrap().pop().unwrap().raw {
            RawContent::Text(t) => t.text,
            _ => panic!("expected text content"),
        };
        assert_eq!(text, "OK. Interaction mode is now review.");

        let update = rx.recv().await.unwrap();
        assert_eq!(update.interaction_mode, InteractionMode::Review);
        assert_eq!(settings.lock().await.interaction_mode, InteractionMode::Review);
    }

    #[tokio::test]
    async fn test_unknown_mode_is_a_tool_error() {
        let settings = Arc::new(tokio::sync::Mutex::new(RelaySettings::new(
            InteractionMode::Direct,
        )));
        let (tx, mut rx) = mpsc::channel(4);
        let client = connect(settings.clone(), tx).await;

        let result = client
            .peer()
            .call_tool(CallToolRequestParam {
                name: "set_interaction_mode".into(),
                arguments: json!({ "mode": "sometimes" }).as_object().cloned(),
            })
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(rx.try_recv().is_err());
        assert_eq!(settings.lock().await.interaction_mode, InteractionMode::Direct);
    }

    #[tokio::test]
    async fn test_new_conversation_bumps_generation() {
        let settings = Arc::new(tokio::sync::Mutex::new(RelaySettings::new(
            InteractionMode::Review,
        )));
        let (tx, mut rx) = mpsc::channel(4);
        let client = connect(settings, tx).await;

        client
            .peer()
            .call_tool(CallToolRequestParam {
                name: "start_new_conversation".into(),
                arguments: None,
            })
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().conversation_generation, 1);
    }
}
