//! Executes relay commands against the real world: the voice connection, the
//! browser, the agent bridge, the side tools and the stores.

use super::{DecisionReply, LiveInput, LiveOptions};
use crate::{
    audio_utils::{self, MicResampler},
    state::{AppState, LiveSessionEntry},
    ws::protocol::ServerMessage,
};
use bytes::Bytes;
use chrono::Utc;
use gemini_realtime::{ClientMessage, LiveSink};
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{Peer, RoleClient},
};
use serde_json::{Value, json};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Instant,
};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxrelay_core::{
    Command,
    approval::PendingApproval,
    audio::{MIC_FORMAT, MicFramer, PlaybackScheduler, SPEAKER_FORMAT},
    bridge::{BridgeEvent, BridgePayload, ConverseBridge, ConverseHandle},
    converse::ConverseEvent,
    correction::correct_with_history,
    error::RelayError,
    generic_types::{LiveEvent, ToolInvocation},
    relay::Relay,
    tools::RelaySettings,
};

/// Past corrections handed to the corrector.
const CORRECTION_HISTORY_LIMIT: usize = 20;

/// Results of work the runtime spawned off the session loop.
#[derive(Debug)]
pub(super) enum SideResult {
    Tool {
        call: ToolInvocation,
        response: Value,
    },
    Correction {
        call_id: String,
        corrected: String,
    },
}

/// Channels the session loop selects on besides the voice stream and the
/// inputs.
pub(super) struct RuntimeChannels {
    pub bridge_rx: mpsc::Receiver<BridgeEvent>,
    pub side_rx: mpsc::Receiver<SideResult>,
}

pub(super) struct Runtime {
    session_id: Uuid,
    state: Arc<AppState>,
    relay: Relay,
    sink: Option<LiveSink>,
    outbox: mpsc::Sender<ServerMessage>,
    framer: MicFramer,
    resampler: Option<MicResampler>,
    playback: PlaybackScheduler,
    streams: HashMap<u64, ConverseHandle>,
    bridge_tx: mpsc::Sender<BridgeEvent>,
    side_tx: mpsc::Sender<SideResult>,
    tools: Option<Peer<RoleClient>>,
    settings: Arc<Mutex<RelaySettings>>,
    conversation_generation: u64,
    approval_tx: watch::Sender<Option<PendingApproval>>,
}

impl Runtime {
    pub(super) fn new(
        state: Arc<AppState>,
        session_id: Uuid,
        options: LiveOptions,
        outbox: mpsc::Sender<ServerMessage>,
        settings: Arc<Mutex<RelaySettings>>,
    ) -> anyhow::Result<(Self, RuntimeChannels)> {
        let mut config = (*state.relay_config).clone();
        config.interaction_mode = options.interaction_mode;

        let resampler = if options.input_sample_rate == MIC_FORMAT.sample_rate {
            None
        } else {
            info!(
                from = options.input_sample_rate,
                to = MIC_FORMAT.sample_rate,
                "Resampling mic input"
            );
            Some(MicResampler::new(
                options.input_sample_rate,
                MIC_FORMAT.sample_rate,
            )?)
        };

        let (bridge_tx, bridge_rx) = mpsc::channel(64);
        let (side_tx, side_rx) = mpsc::channel(16);
        let (approval_tx, _) = watch::channel(None);

        let runtime = Self {
            session_id,
            state,
            relay: Relay::new(config),
            sink: None,
            outbox,
            framer: MicFramer::default(),
            resampler,
            playback: PlaybackScheduler::new(SPEAKER_FORMAT, Instant::now()),
            streams: HashMap::new(),
            bridge_tx,
            side_tx,
            tools: None,
            settings,
            conversation_generation: 0,
            approval_tx,
        };
        Ok((runtime, RuntimeChannels { bridge_rx, side_rx }))
    }

    pub(super) fn relay(&self) -> &Relay {
        &self.relay
    }

    pub(super) fn set_tools(&mut self, peer: Peer<RoleClient>) {
        self.tools = Some(peer);
    }

    /// Makes the session reachable from the REST layer.
    pub(super) async fn register(&self, control: mpsc::Sender<LiveInput>) {
        self.state
            .sessions
            .register(
                self.session_id,
                LiveSessionEntry {
                    control,
                    approval: self.approval_tx.subscribe(),
                    started_at: Utc::now(),
                },
            )
            .await;
    }

    pub(super) async fn begin_connect(&mut self) {
        let cmds = self.relay.begin_connect();
        self.execute(cmds).await;
    }

    pub(super) fn attach(&mut self, sink: LiveSink) {
        self.sink = Some(sink);
    }

    pub(super) async fn connect_failed(&mut self, message: &str) {
        let cmds = self.relay.on_connect_failed(message);
        self.execute(cmds).await;
    }

    pub(super) async fn on_live_events(&mut self, events: Vec<LiveEvent>) {
        for event in events {
            let cmds = self.relay.on_live_event(event, Instant::now());
            self.execute(cmds).await;
        }
    }

    pub(super) async fn on_transport_error(&mut self, message: &str) {
        let cmds = self.relay.on_transport_error(message);
        self.execute(cmds).await;
    }

    pub(super) async fn on_input(&mut self, input: LiveInput) {
        match input {
            LiveInput::MicAudio(data) => self.on_mic_audio(data).await,
            LiveInput::Approve {
                hold_id,
                edited_text,
                reply,
            } => {
                let result = self.relay.approve(hold_id, edited_text, Instant::now());
                self.finish_decision(result, reply).await;
            }
            LiveInput::Reject { hold_id, reply } => {
                let result = self.relay.reject(hold_id, Instant::now());
                self.finish_decision(result, reply).await;
            }
            LiveInput::KeywordResult {
                epoch,
                text,
                is_final,
            } => {
                let cmds = self
                    .relay
                    .on_keyword_result(epoch, &text, is_final, Instant::now());
                self.execute(cmds).await;
            }
            LiveInput::KeywordError { epoch, error } => {
                let cmds = self.relay.on_keyword_error(epoch, &error);
                self.execute(cmds).await;
            }
            LiveInput::SetMode(mode) => {
                let mut settings = self.settings.lock().await;
                settings.interaction_mode = mode;
                let snapshot = settings.clone();
                drop(settings);
                self.apply_settings(snapshot).await;
            }
            LiveInput::Rewind { to } => self.rewind(to).await,
            LiveInput::Close => self.close().await,
        }
    }

    async fn rewind(&mut self, to: usize) {
        let removed = match self.relay.rewind(to) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Ignoring rewind");
                self.emit(ServerMessage::Error {
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };
        if let Some(db) = self.state.db.clone().filter(|_| removed > 0) {
            let session_id = self.session_id;
            tokio::spawn(async move {
                if let Err(e) = db.delete_turns_from(session_id, to).await {
                    warn!(error = ?e, "Failed to delete rewound turns");
                }
            });
        }
        self.emit(ServerMessage::Rewound { to, removed }).await;
    }

    pub(super) async fn on_bridge_event(&mut self, event: BridgeEvent) {
        let BridgeEvent { stream_id, payload } = event;
        let cmds = match payload {
            BridgePayload::Event(event) => {
                if matches!(event, ConverseEvent::Done(_)) {
                    self.streams.remove(&stream_id);
                }
                self.relay
                    .on_converse_event(stream_id, event, Instant::now())
            }
            BridgePayload::Failed(message) => {
                self.streams.remove(&stream_id);
                self.relay.on_converse_error(stream_id, &message)
            }
        };
        self.execute(cmds).await;
    }

    pub(super) async fn on_side_result(&mut self, result: SideResult) {
        let cmds = match result {
            SideResult::Tool { call, response } => self.relay.on_tool_result(call, response),
            SideResult::Correction { call_id, corrected } => {
                self.relay.on_correction(&call_id, corrected)
            }
        };
        self.execute(cmds).await;
    }

    /// Settings changed by a side tool or by the browser.
    pub(super) async fn apply_settings(&mut self, settings: RelaySettings) {
        if settings.conversation_generation != self.conversation_generation {
            self.conversation_generation = settings.conversation_generation;
            self.relay.reset_conversation();
        }
        if settings.interaction_mode != self.relay.mode() {
            self.relay.set_mode(settings.interaction_mode);
            self.emit(ServerMessage::ModeChanged {
                mode: settings.interaction_mode,
            })
            .await;
        }
    }

    pub(super) async fn poll(&mut self) {
        let cmds = self.relay.poll(Instant::now());
        self.execute(cmds).await;
    }

    pub(super) async fn close(&mut self) {
        let cmds = self.relay.close();
        self.execute(cmds).await;
    }

    /// Releases everything the session still holds. Call after `close`.
    pub(super) async fn shutdown(&mut self) {
        for (stream_id, handle) in self.streams.drain() {
            debug!(stream_id, "Aborting agent stream on shutdown");
            handle.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Voice connection already closed");
            }
        }
        self.approval_tx.send_replace(None);
    }

    async fn on_mic_audio(&mut self, data: Bytes) {
        let pcm = match self.resampler.as_mut() {
            Some(resampler) => Bytes::from(resampler.process(&data)),
            None => data,
        };
        for frame in self.framer.push(&pcm) {
            if let Some(cmd) = self.relay.on_mic_audio(frame) {
                self.execute(vec![cmd]).await;
            }
        }
    }

    async fn finish_decision(
        &mut self,
        result: Result<Vec<Command>, RelayError>,
        reply: Option<DecisionReply>,
    ) {
        let outcome = match result {
            Ok(cmds) => {
                self.execute(cmds).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Ignoring approval decision");
                Err(e)
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    /// Runs commands in order. Commands that fail against the voice
    /// connection queue the relay's reaction behind the remaining ones.
    pub(super) async fn execute(&mut self, cmds: Vec<Command>) {
        let mut queue: VecDeque<Command> = cmds.into();
        while let Some(cmd) = queue.pop_front() {
            let follow_up = self.apply(cmd).await;
            queue.extend(follow_up);
        }
    }

    async fn apply(&mut self, cmd: Command) -> Vec<Command> {
        match cmd {
            Command::SendAudio(pcm) => {
                let msg =
                    ClientMessage::audio(audio_utils::encode_pcm(&pcm), MIC_FORMAT.sample_rate);
                return self.send_live(msg).await;
            }
            Command::SendText {
                text,
                turn_complete,
            } => {
                return self
                    .send_live(ClientMessage::user_text(text, turn_complete))
                    .await;
            }
            Command::SendToolResponse { id, name, response } => {
                return self
                    .send_live(ClientMessage::tool_response(id, name, response))
                    .await;
            }
            Command::PlayAudio(data) => {
                let now = Instant::now();
                let chunk = self
                    .playback
                    .schedule(audio_utils::pcm_byte_len(&data), now);
                let start_at_ms = self.playback.offset_ms(chunk.start);
                self.emit(ServerMessage::AudioChunk { data, start_at_ms })
                    .await;
            }
            Command::FlushAudio => {
                let dropped = self.playback.flush(Instant::now());
                debug!(dropped, "Flushing playback");
                self.emit(ServerMessage::AudioFlush).await;
            }
            Command::StartConverse { stream_id, request } => {
                let handle = ConverseBridge::spawn(
                    self.state.converse_client.clone(),
                    request,
                    stream_id,
                    self.bridge_tx.clone(),
                );
                self.streams.insert(stream_id, handle);
            }
            Command::AbortConverse { stream_id } => {
                if let Some(handle) = self.streams.remove(&stream_id) {
                    handle.abort();
                }
            }
            Command::CallTool(call) => self.spawn_side_tool(call),
            Command::RequestCorrection {
                call_id,
                instruction,
            } => self.spawn_correction(call_id, instruction),
            Command::ShowApproval(approval) => {
                self.approval_tx.send_replace(Some(approval.clone()));
                self.emit(ServerMessage::ApprovalRequested { approval })
                    .await;
            }
            Command::ClearApproval { hold_id } => {
                self.approval_tx.send_replace(None);
                self.emit(ServerMessage::ApprovalCleared { hold_id }).await;
            }
            Command::RecordCorrection(record) => {
                let store = self.state.corrections.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.record(record).await {
                        warn!(error = ?e, "Failed to record correction");
                    }
                });
            }
            Command::CommitTurn(turn) => {
                if let Some(db) = self.state.db.clone() {
                    let session_id = self.session_id;
                    let stored = turn.clone();
                    tokio::spawn(async move {
                        if let Err(e) = db.add_turn(session_id, &stored).await {
                            warn!(error = ?e, "Failed to persist turn");
                        }
                    });
                }
                self.emit(ServerMessage::TurnCommitted { turn }).await;
            }
            other => {
                if let Some(msg) = ui_message(other) {
                    self.emit(msg).await;
                }
            }
        }
        Vec::new()
    }

    async fn send_live(&mut self, msg: ClientMessage) -> Vec<Command> {
        let Some(sink) = self.sink.as_mut() else {
            debug!("No voice connection, dropping outbound message");
            return Vec::new();
        };
        match sink.send(&msg).await {
            Ok(()) => Vec::new(),
            Err(e) => {
                self.sink = None;
                self.relay.on_transport_error(&e.to_string())
            }
        }
    }

    fn spawn_side_tool(&self, call: ToolInvocation) {
        let Some(peer) = self.tools.clone() else {
            warn!(tool = %call.name, "Side tools are unavailable");
            let response = json!({ "error": format!("Unknown tool '{}'", call.name) });
            let tx = self.side_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(SideResult::Tool { call, response }).await;
            });
            return;
        };
        let tx = self.side_tx.clone();
        tokio::spawn(async move {
            let response = call_side_tool(&peer, &call).await;
            let _ = tx.send(SideResult::Tool { call, response }).await;
        });
    }

    fn spawn_correction(&self, call_id: String, instruction: String) {
        let corrector = self.state.corrector.clone();
        let store = self.state.corrections.clone();
        let tx = self.side_tx.clone();
        tokio::spawn(async move {
            let corrected = correct_with_history(
                corrector.as_ref(),
                store.as_ref(),
                &instruction,
                CORRECTION_HISTORY_LIMIT,
            )
            .await;
            let _ = tx.send(SideResult::Correction { call_id, corrected }).await;
        });
    }

    async fn emit(&self, msg: ServerMessage) {
        if self.outbox.send(msg).await.is_err() {
            debug!("Browser outbox closed");
        }
    }
}

/// Runs one side tool over MCP and shapes the result as a tool response.
async fn call_side_tool(peer: &Peer<RoleClient>, call: &ToolInvocation) -> Value {
    let request = CallToolRequestParam {
        name: call.name.clone().into(),
        arguments: call.args.as_object().cloned(),
    };
    match peer.call_tool(request).await {
        Ok(result) => {
            let is_error = result.is_error == Some(true);
            let text = result
                .content
                .and_then(|mut content| content.pop())
                .map(|content| match content.raw {
                    RawContent::Text(text_content) => text_content.text,
                    _ => "Unexpected content type from tool".to_string(),
                })
                .unwrap_or_default();
            if is_error {
                json!({ "error": text })
            } else {
                json!({ "result": text })
            }
        }
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Side tool call failed");
            json!({ "error": e.to_string() })
        }
    }
}

/// Browser message for commands that only inform the UI.
fn ui_message(cmd: Command) -> Option<ServerMessage> {
    let msg = match cmd {
        Command::UserTranscript(text) => ServerMessage::TranscriptionUpdate {
            text,
            is_final: false,
        },
        Command::VoiceTranscript(text) => ServerMessage::VoiceText { text },
        Command::AgentText(text) => ServerMessage::AgentText { text },
        Command::AgentBlock(block) => ServerMessage::AgentBlock { block },
        Command::PhaseChanged(phase) => ServerMessage::Phase { phase },
        Command::StatusChanged(status) => ServerMessage::Status { status },
        Command::StartKeywordListener { epoch, keywords } => {
            ServerMessage::KeywordListenerStart { epoch, keywords }
        }
        Command::StopKeywordListener { epoch } => ServerMessage::KeywordListenerStop { epoch },
        Command::Notify(message) => ServerMessage::Notice { message },
        Command::ReportError(message) => ServerMessage::Error { message },
        _ => return None,
    };
    Some(msg)
}
