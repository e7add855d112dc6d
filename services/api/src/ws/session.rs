//! Manages the browser WebSocket connection lifecycle for a relay session.

use super::{
    protocol::{ClientMessage, ServerMessage},
    provider::{self, LiveInput, LiveOptions},
};
use crate::state::AppState;
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;
use voxrelay_core::{approval::InteractionMode, audio::MIC_FORMAT};

/// How long a closing live session may take to commit and hang up.
const LIVE_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// What `init` asked for.
struct SessionInit {
    interaction_mode: InteractionMode,
    input_sample_rate: u32,
}

/// A running live session as seen from the browser session.
struct LiveHandle {
    tx: mpsc::Sender<LiveInput>,
    task: JoinHandle<()>,
}

impl LiveHandle {
    fn is_running(&self) -> bool {
        !self.tx.is_closed() && !self.task.is_finished()
    }
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake, then spawns the session loop.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", session_id.to_string());
    info!("New WebSocket connection. Awaiting initialization...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be an `init` message.
    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(text.as_str(), &state),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let init = match init {
        Ok(init) => init,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    if send_msg(
        &mut socket_tx,
        ServerMessage::Initialized {
            session_id,
            interaction_mode: init.interaction_mode,
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
        return;
    }

    let session_span = tracing::info_span!("browser_session", %session_id);
    tokio::spawn(
        async move {
            run_browser_session(state, socket_tx, socket_rx, session_id, init).await;
            info!("Browser session finished.");
        }
        .instrument(session_span),
    );
}

fn parse_init(text: &str, state: &AppState) -> Result<SessionInit> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Init {
            interaction_mode,
            input_sample_rate,
        } => {
            let input_sample_rate = input_sample_rate.unwrap_or(MIC_FORMAT.sample_rate);
            if input_sample_rate == 0 {
                return Err(anyhow!("`input_sample_rate` must be positive"));
            }
            Ok(SessionInit {
                interaction_mode: interaction_mode
                    .unwrap_or(state.relay_config.interaction_mode),
                input_sample_rate,
            })
        }
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// The event loop for an initialized browser session.
///
/// Everything sent to the browser goes through one outbox so the live
/// session and this loop never contend for the socket.
async fn run_browser_session(
    state: Arc<AppState>,
    socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    session_id: Uuid,
    init: SessionInit,
) {
    let (outbox, outbox_rx) = mpsc::channel::<ServerMessage>(256);
    let writer = tokio::spawn(write_outbox(socket_tx, outbox_rx));

    let mut mode = init.interaction_mode;
    let mut live: Option<LiveHandle> = None;

    while let Some(msg_result) = socket_rx.next().await {
        let ws_msg = match msg_result {
            Ok(ws_msg) => ws_msg,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };
        match ws_msg {
            Message::Text(text) => {
                let msg = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed client message");
                        let _ = outbox
                            .send(ServerMessage::Error {
                                message: format!("Malformed message: {}", e),
                            })
                            .await;
                        continue;
                    }
                };
                match msg {
                    ClientMessage::SetVoiceEnabled { enabled: true } => {
                        if live.as_ref().is_some_and(LiveHandle::is_running) {
                            debug!("Voice already enabled");
                            continue;
                        }
                        let options = LiveOptions {
                            interaction_mode: mode,
                            input_sample_rate: init.input_sample_rate,
                        };
                        let (tx, task) = provider::start_live_session(
                            state.clone(),
                            session_id,
                            options,
                            outbox.clone(),
                        );
                        live = Some(LiveHandle { tx, task });
                        info!("Voice enabled by client.");
                    }
                    ClientMessage::SetVoiceEnabled { enabled: false } => {
                        if let Some(handle) = live.take() {
                            stop_live(handle).await;
                        }
                        info!("Voice disabled by client.");
                    }
                    ClientMessage::Approve {
                        hold_id,
                        edited_text,
                    } => {
                        let input = LiveInput::Approve {
                            hold_id,
                            edited_text,
                            reply: None,
                        };
                        forward(&mut live, input, &outbox).await;
                    }
                    ClientMessage::Reject { hold_id } => {
                        let input = LiveInput::Reject {
                            hold_id,
                            reply: None,
                        };
                        forward(&mut live, input, &outbox).await;
                    }
                    ClientMessage::KeywordResult {
                        epoch,
                        text,
                        is_final,
                    } => {
                        let input = LiveInput::KeywordResult {
                            epoch,
                            text,
                            is_final,
                        };
                        forward(&mut live, input, &outbox).await;
                    }
                    ClientMessage::KeywordError { epoch, error } => {
                        forward(&mut live, LiveInput::KeywordError { epoch, error }, &outbox)
                            .await;
                    }
                    ClientMessage::SetInteractionMode { mode: new_mode } => {
                        mode = new_mode;
                        let running = live.as_ref().is_some_and(LiveHandle::is_running);
                        if running {
                            forward(&mut live, LiveInput::SetMode(new_mode), &outbox).await;
                        } else {
                            let _ = outbox.send(ServerMessage::ModeChanged { mode }).await;
                        }
                    }
                    ClientMessage::Rewind { to } => {
                        forward(&mut live, LiveInput::Rewind { to }, &outbox).await;
                    }
                    ClientMessage::Init { .. } => {
                        warn!("Ignoring repeated `init` message.");
                    }
                }
            }
            Message::Binary(data) => match &live {
                Some(handle) if handle.is_running() => {
                    if handle.tx.send(LiveInput::MicAudio(data)).await.is_err() {
                        debug!("Live session ended, dropping mic audio");
                    }
                }
                _ => debug!("Received audio data from client, but voice is disabled."),
            },
            Message::Close(_) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if let Some(handle) = live.take() {
        stop_live(handle).await;
    }
    drop(outbox);
    if let Err(e) = writer.await {
        debug!(error = ?e, "Outbox writer task ended abnormally");
    }
    info!("WebSocket connection closed and relay session terminated.");
}

/// Sends an input to the live session, or tells the browser there is none.
async fn forward(
    live: &mut Option<LiveHandle>,
    input: LiveInput,
    outbox: &mpsc::Sender<ServerMessage>,
) {
    let delivered = match live.as_ref() {
        Some(handle) if handle.is_running() => handle.tx.send(input).await.is_ok(),
        _ => false,
    };
    if !delivered {
        *live = None;
        warn!("Client message needs a voice session, but none is running.");
        let _ = outbox
            .send(ServerMessage::Error {
                message: "Voice is not enabled.".to_string(),
            })
            .await;
    }
}

/// Asks the live session to close and waits briefly for it to finish.
async fn stop_live(handle: LiveHandle) {
    let LiveHandle { tx, mut task } = handle;
    if tx.send(LiveInput::Close).await.is_err() {
        debug!("Live session already finished");
    }
    if tokio::time::timeout(LIVE_SHUTDOWN_GRACE, &mut task)
        .await
        .is_err()
    {
        warn!("Live session did not stop in time, aborting it.");
        task.abort();
    }
}

async fn write_outbox(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = outbox_rx.recv().await {
        if let Err(e) = send_msg(&mut socket_tx, msg).await {
            debug!(error = %e, "Client socket closed, stopping outbox writer");
            break;
        }
    }
    let _ = socket_tx.close().await;
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
