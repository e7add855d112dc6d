//! Drives one relay session over the Gemini Live WebSocket.

use super::{
    LiveInput, LiveOptions,
    runtime::{Runtime, RuntimeChannels},
};
use crate::{state::AppState, ws::protocol::ServerMessage as BrowserMessage};
use anyhow::{Context, Result};
use gemini_realtime::{
    LiveStream, Setup, ServerMessage, connect, live_url,
    types::{FunctionDeclaration, Tool},
};
use rmcp::{
    ServiceExt,
    service::{RoleClient, RunningService},
};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxrelay_core::{
    generic_types::{LiveEvent, ToolDeclaration, ToolInvocation},
    tools::{RelaySettings, RelayToolService},
};

/// Schema keys the Live API rejects in function parameters.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 5] = [
    "$schema",
    "title",
    "additionalProperties",
    "definitions",
    "$defs",
];

/// Runs the session until it closes.
///
/// Connects to the Live API with the delegate tool and the side tools
/// declared, then feeds every input into the relay one at a time.
pub async fn run(
    state: &Arc<AppState>,
    session_id: Uuid,
    options: LiveOptions,
    control: mpsc::Sender<LiveInput>,
    inputs: mpsc::Receiver<LiveInput>,
    outbox: mpsc::Sender<BrowserMessage>,
) -> Result<()> {
    let settings = Arc::new(Mutex::new(RelaySettings::new(options.interaction_mode)));
    let (settings_tx, settings_rx) = mpsc::channel(8);
    let (mut runtime, channels) =
        Runtime::new(state.clone(), session_id, options, outbox, settings.clone())?;
    runtime.register(control).await;

    // Serve the side tools in-process and talk to them as an MCP client.
    let tool_service = RelayToolService::new(settings, Some(settings_tx));
    let (server_transport, client_transport) = tokio::io::duplex(4096);
    let tool_server = tokio::spawn(async move {
        if let Ok(service) = tool_service.serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });
    let mcp_client = ().serve(client_transport).await?;
    runtime.set_tools(mcp_client.peer().clone());

    let mut declarations = vec![state.relay_config.delegate_declaration()];
    declarations.extend(side_tool_declarations(&mcp_client).await?);
    info!(tools = declarations.len(), "Declaring tools to the voice service");
    let setup = Setup::audio(
        state.config.live_model.clone(),
        &state.system_prompt,
        vec![live_tool(declarations)],
    );

    runtime.begin_connect().await;
    let url = live_url(&state.config.live_url, &state.config.gemini_api_key);
    match connect(&url, setup).await {
        Ok((sink, stream)) => {
            runtime.attach(sink);
            drive(&mut runtime, stream, inputs, channels, settings_rx).await;
        }
        Err(e) => {
            warn!(error = ?e, "Could not open the voice connection");
            runtime.connect_failed(&format!("{:#}", e)).await;
        }
    }

    runtime.shutdown().await;
    if let Err(e) = mcp_client.cancel().await {
        debug!(error = ?e, "Side tool client already stopped");
    }
    tool_server.abort();
    info!("Live session finished");
    Ok(())
}

async fn drive(
    runtime: &mut Runtime,
    mut stream: LiveStream,
    mut inputs: mpsc::Receiver<LiveInput>,
    channels: RuntimeChannels,
    mut settings_rx: mpsc::Receiver<RelaySettings>,
) {
    let RuntimeChannels {
        mut bridge_rx,
        mut side_rx,
    } = channels;

    while !runtime.relay().is_closed() {
        let deadline = runtime.relay().next_deadline();
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(msg)) => runtime.on_live_events(live_events(msg)).await,
                Some(Err(e)) => runtime.on_transport_error(&format!("{:#}", e)).await,
                None => runtime.on_live_events(vec![LiveEvent::Closed]).await,
            },
            input = inputs.recv() => match input {
                Some(input) => runtime.on_input(input).await,
                None => runtime.close().await,
            },
            Some(event) = bridge_rx.recv() => runtime.on_bridge_event(event).await,
            Some(result) = side_rx.recv() => runtime.on_side_result(result).await,
            Some(settings) = settings_rx.recv() => runtime.apply_settings(settings).await,
            _ = sleep_until(deadline) => runtime.poll().await,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

/// Splits one Live server message into relay events, in the order the relay
/// should see them.
pub fn live_events(msg: ServerMessage) -> Vec<LiveEvent> {
    let mut events = Vec::new();
    if msg.setup_complete.is_some() {
        events.push(LiveEvent::SetupComplete);
    }
    if let Some(content) = msg.server_content {
        if let Some(transcription) = content.input_transcription {
            if !transcription.text.is_empty() {
                events.push(LiveEvent::InputTranscription(transcription.text));
            }
        }
        if content.interrupted == Some(true) {
            events.push(LiveEvent::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .map(|blob| LiveEvent::Audio(blob.data)),
            );
        }
        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(LiveEvent::OutputTranscription(transcription.text));
            }
        }
        if content.turn_complete == Some(true) {
            events.push(LiveEvent::TurnComplete);
        }
    }
    if let Some(tool_call) = msg.tool_call {
        let calls: Vec<ToolInvocation> = tool_call
            .function_calls
            .into_iter()
            .map(|call| ToolInvocation {
                id: call.id,
                name: call.name,
                args: call.args,
            })
            .collect();
        if !calls.is_empty() {
            events.push(LiveEvent::ToolCall(calls));
        }
    }
    if let Some(cancellation) = msg.tool_call_cancellation {
        events.push(LiveEvent::ToolCallCancellation(cancellation.ids));
    }
    if let Some(go_away) = msg.go_away {
        events.push(LiveEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    events
}

/// Declarations for every tool the side tool server lists.
async fn side_tool_declarations(
    client: &RunningService<RoleClient, ()>,
) -> Result<Vec<ToolDeclaration>> {
    client
        .list_all_tools()
        .await
        .context("Failed to list side tools")?
        .into_iter()
        .map(|t| {
            Ok(ToolDeclaration {
                name: t.name.to_string(),
                description: t.description.map(String::from).unwrap_or_default(),
                parameters: live_parameters(serde_json::to_value(&*t.input_schema)?),
            })
        })
        .collect()
}

/// Cleans a JSON schema for the Live API. A schema without properties is
/// dropped entirely.
pub fn live_parameters(mut schema: Value) -> Option<Value> {
    strip_unsupported(&mut schema);
    let has_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty());
    has_properties.then_some(schema)
}

fn strip_unsupported(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            for key in UNSUPPORTED_SCHEMA_KEYS {
                map.remove(key);
            }
            map.values_mut().for_each(strip_unsupported);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_unsupported),
        _ => {}
    }
}

fn live_tool(declarations: Vec<ToolDeclaration>) -> Tool {
    Tool {
        function_declarations: declarations
            .into_iter()
            .map(|d| FunctionDeclaration {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
    }
}
