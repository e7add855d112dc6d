//! Live Session Controller.
//!
//! `Relay` is the single owner of one duplex voice session's state: the
//! connection status, the closed flag, the relay phase, the pending tool
//! invocation and the approval hold. Every input (a voice API event, an agent
//! stream event, a UI decision, a keyword result, a timer tick) is a method
//! call that fully handles the input before returning the commands the
//! runtime must execute. Inputs are handled one at a time by the runtime, so
//! the phase machine needs no locking.
//!
//! Phase machine per delegated turn:
//!
//! ```text
//! idle --(delegate tool call)--> suppressing --(first agent text)--> relaying
//!   ^                                 |                                 |
//!   +----(rejected/cancelled/failed)--+------(agent done or error)------+
//! ```

use crate::Command;
use crate::approval::{ApprovalGate, ApprovalOutcome, InteractionMode, PendingApproval, Resolution};
use crate::chunker::SentenceBuffer;
use crate::config::RelayConfig;
use crate::converse::{ConverseEvent, ConverseRequest};
use crate::error::RelayError;
use crate::generic_types::{LiveEvent, ToolInvocation};
use crate::history::{TranscriptLog, TurnDraft, VoiceLog};
use crate::keywords::{KeywordListener, ListenerReaction, RecognitionError};
use crate::phase::{ConnectionStatus, RelayPhase};
use crate::unfreeze::DeferredUnfreeze;
use bytes::Bytes;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolStage {
    /// Waiting on the corrector.
    Correcting,
    /// Held for human approval. The voice session is frozen.
    AwaitingApproval,
    /// The agent stream is open.
    Streaming,
}

/// The delegate call the voice API is waiting on.
#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    instruction: String,
    /// Agent text received so far.
    result: String,
    stage: ToolStage,
}

pub struct Relay {
    config: RelayConfig,
    mode: InteractionMode,
    status: ConnectionStatus,
    phase: RelayPhase,
    closed: bool,
    pending: Option<PendingTool>,
    gate: ApprovalGate,
    listener: KeywordListener,
    chunker: SentenceBuffer,
    unfreeze: Option<DeferredUnfreeze>,
    active_stream: Option<u64>,
    next_stream_id: u64,
    continuation_id: Option<String>,
    draft: TurnDraft,
    transcript: TranscriptLog,
    voice_log: VoiceLog,
    turn_delegated: bool,
    nudge_outstanding: bool,
    /// Synthetic inputs whose spoken echo has not finished yet.
    echo_turns: u32,
    /// The most recent mic audio since the last commit, capped.
    utterance_audio: VecDeque<u8>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            mode: config.interaction_mode,
            listener: KeywordListener::new(config.keywords.clone()),
            chunker: SentenceBuffer::new(config.chunker.clone()),
            config,
            status: ConnectionStatus::Idle,
            phase: RelayPhase::Idle,
            closed: false,
            pending: None,
            gate: ApprovalGate::new(),
            unfreeze: None,
            active_stream: None,
            next_stream_id: 1,
            continuation_id: None,
            draft: TurnDraft::default(),
            transcript: TranscriptLog::default(),
            voice_log: VoiceLog::default(),
            turn_delegated: false,
            nudge_outstanding: false,
            echo_turns: 0,
            utterance_audio: VecDeque::new(),
        }
    }

    // --- Connection lifecycle ---

    pub fn begin_connect(&mut self) -> Vec<Command> {
        if self.closed || self.status != ConnectionStatus::Idle {
            return Vec::new();
        }
        self.status = ConnectionStatus::Connecting;
        vec![Command::StatusChanged(self.status)]
    }

    pub fn on_connected(&mut self) -> Vec<Command> {
        if self.closed || self.status == ConnectionStatus::Connected {
            return Vec::new();
        }
        info!("Voice session connected");
        self.status = ConnectionStatus::Connected;
        vec![Command::StatusChanged(self.status)]
    }

    /// The connection could not be opened. No retry happens here.
    pub fn on_connect_failed(&mut self, message: &str) -> Vec<Command> {
        let mut cmds = vec![Command::ReportError(format!(
            "Could not connect to the voice service: {}",
            message
        ))];
        cmds.extend(self.close());
        cmds
    }

    /// The transport failed or dropped.
    pub fn on_transport_error(&mut self, message: &str) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        warn!(error = %message, "Voice transport error");
        let mut cmds = vec![Command::ReportError(format!(
            "Voice connection lost: {}",
            message
        ))];
        cmds.extend(self.close());
        cmds
    }

    /// Tears the session down. Idempotent.
    ///
    /// The closed flag is set before anything else so that every input
    /// arriving afterwards, including agent chunks already in flight, is a
    /// no-op.
    pub fn close(&mut self) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        info!(phase = %self.phase, "Closing voice session");

        let mut cmds = Vec::new();
        if let Some(stream_id) = self.active_stream.take() {
            cmds.push(Command::AbortConverse { stream_id });
        }
        self.release_approval(&mut cmds);
        self.chunker.clear();
        self.unfreeze = None;
        self.pending = None;
        if self.phase != RelayPhase::Idle {
            self.phase = RelayPhase::Idle;
            cmds.push(Command::PhaseChanged(self.phase));
        }
        if let Some(turn) = self.transcript.commit(std::mem::take(&mut self.draft)) {
            cmds.push(Command::CommitTurn(turn));
        }
        cmds.push(Command::FlushAudio);
        if self.status != ConnectionStatus::Idle {
            self.status = ConnectionStatus::Idle;
            cmds.push(Command::StatusChanged(self.status));
        }
        cmds
    }

    // --- Voice API input ---

    /// The single dispatch point for everything the voice API sends.
    pub fn on_live_event(&mut self, event: LiveEvent, now: Instant) -> Vec<Command> {
        if self.closed {
            debug!(?event, "Dropping voice event on a closed session");
            return Vec::new();
        }
        match event {
            LiveEvent::SetupComplete => self.on_connected(),
            LiveEvent::ToolCall(calls) => calls
                .into_iter()
                .flat_map(|call| self.on_tool_call(call, now))
                .collect(),
            LiveEvent::ToolCallCancellation(ids) => self.on_tool_cancellation(&ids),
            LiveEvent::InputTranscription(text) => {
                // User speech is never suppressed.
                if self.phase == RelayPhase::Idle && self.echo_turns > 0 {
                    // The voice API may answer several relayed turns at once,
                    // so a new utterance ends any echo still owed.
                    debug!(echo_turns = self.echo_turns, "User spoke, clearing relay echo");
                    self.echo_turns = 0;
                }
                self.draft.user_text.push_str(&text);
                vec![Command::UserTranscript(text)]
            }
            LiveEvent::OutputTranscription(text) => {
                if self.phase.passes_output_text() && self.echo_turns == 0 {
                    self.draft.voice_text.push_str(&text);
                    self.voice_log.push(self.transcript.next_index(), &text);
                    vec![Command::VoiceTranscript(text)]
                } else {
                    debug!(phase = %self.phase, echo_turns = self.echo_turns, "Dropping voice transcript");
                    Vec::new()
                }
            }
            LiveEvent::Audio(data) => {
                if self.phase.passes_audio() {
                    vec![Command::PlayAudio(data)]
                } else {
                    Vec::new()
                }
            }
            LiveEvent::TurnComplete => self.on_turn_complete(),
            LiveEvent::Interrupted => {
                self.echo_turns = 0;
                let mut cmds = vec![Command::FlushAudio];
                if self.phase == RelayPhase::Idle {
                    cmds.extend(self.commit_turn());
                }
                cmds
            }
            LiveEvent::GoAway { time_left } => {
                warn!(?time_left, "Voice service is about to close the session");
                vec![Command::Notify(
                    "The voice service will end this session shortly.".to_string(),
                )]
            }
            LiveEvent::Error(message) => self.on_transport_error(&message),
            LiveEvent::Closed => self.on_transport_error("closed by the voice service"),
        }
    }

    fn on_tool_call(&mut self, call: ToolInvocation, now: Instant) -> Vec<Command> {
        if call.name != self.config.delegate_tool.name {
            debug!(tool = %call.name, "Dispatching side tool");
            return vec![Command::CallTool(call)];
        }

        if self.phase != RelayPhase::Idle || self.pending.is_some() {
            let err = RelayError::ToolCallWhileBusy { phase: self.phase };
            warn!(call_id = %call.id, error = %err, "Rejecting delegate call");
            return vec![error_response(&call, &err)];
        }

        let instruction = call.str_arg("instruction").unwrap_or("").trim().to_string();
        if instruction.is_empty() {
            let err = RelayError::MissingInstruction;
            warn!(call_id = %call.id, error = %err, "Rejecting delegate call");
            return vec![error_response(&call, &err)];
        }

        info!(call_id = %call.id, mode = %self.mode, %instruction, "Delegate tool invoked");
        self.turn_delegated = true;
        self.draft.instruction = Some(instruction.clone());

        let mut cmds = Vec::new();
        self.set_phase(RelayPhase::Suppressing, &mut cmds);
        // Whatever the voice API was saying before the call must not leak.
        cmds.push(Command::FlushAudio);

        let stage = match self.mode {
            InteractionMode::Direct => ToolStage::Streaming,
            InteractionMode::Review => ToolStage::AwaitingApproval,
            InteractionMode::AutoCorrect => ToolStage::Correcting,
        };
        self.pending = Some(PendingTool {
            id: call.id.clone(),
            name: call.name,
            instruction: instruction.clone(),
            result: String::new(),
            stage,
        });

        match stage {
            ToolStage::Streaming => self.start_stream(instruction, now, &mut cmds),
            ToolStage::AwaitingApproval => self.hold_for_approval(None, &mut cmds),
            ToolStage::Correcting => cmds.push(Command::RequestCorrection {
                call_id: call.id,
                instruction,
            }),
        }
        cmds
    }

    fn on_tool_cancellation(&mut self, ids: &[String]) -> Vec<Command> {
        let Some(pending) = &self.pending else {
            return Vec::new();
        };
        if !ids.contains(&pending.id) {
            return Vec::new();
        }
        info!(call_id = %pending.id, "Voice service cancelled the delegate call");

        let mut cmds = Vec::new();
        if let Some(stream_id) = self.active_stream.take() {
            cmds.push(Command::AbortConverse { stream_id });
        }
        self.release_approval(&mut cmds);
        self.chunker.clear();
        self.unfreeze = None;
        self.pending = None;
        self.set_phase(RelayPhase::Idle, &mut cmds);
        cmds
    }

    fn on_turn_complete(&mut self) -> Vec<Command> {
        self.echo_turns = self.echo_turns.saturating_sub(1);
        if self.phase != RelayPhase::Idle {
            // The relay commits the turn itself when the agent finishes.
            return Vec::new();
        }

        let nudge_due = self.draft.user_spoke() && !self.turn_delegated && !self.nudge_outstanding;
        let mut cmds = self.commit_turn();
        if nudge_due {
            info!("User spoke but the delegate tool was not called, nudging");
            cmds.push(Command::SendText {
                text: self.config.nudge_text.clone(),
                turn_complete: true,
            });
        }
        self.nudge_outstanding = nudge_due;
        cmds
    }

    /// Forwards mic audio unless the session is closed, not connected, or
    /// frozen by an approval hold.
    pub fn on_mic_audio(&mut self, data: Bytes) -> Option<Command> {
        if self.closed || self.status != ConnectionStatus::Connected || self.is_frozen() {
            return None;
        }
        self.utterance_audio.extend(data.iter().copied());
        let excess = self
            .utterance_audio
            .len()
            .saturating_sub(self.config.max_utterance_audio_bytes);
        self.utterance_audio.drain(..excess);
        Some(Command::SendAudio(data))
    }

    /// Result of a side tool, reported back to the voice API unchanged.
    pub fn on_tool_result(&mut self, call: ToolInvocation, response: Value) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        vec![Command::SendToolResponse {
            id: call.id,
            name: call.name,
            response,
        }]
    }

    // --- Approval ---

    /// Corrector output for the call waiting in the correcting stage.
    pub fn on_correction(&mut self, call_id: &str, corrected: String) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        let Some(pending) = &self.pending else {
            debug!(%call_id, "Dropping correction for a finished call");
            return Vec::new();
        };
        if pending.id != call_id || pending.stage != ToolStage::Correcting {
            debug!(%call_id, "Dropping stale correction");
            return Vec::new();
        }

        let corrected = corrected.trim();
        let corrected = (!corrected.is_empty() && corrected != pending.instruction)
            .then(|| corrected.to_string());
        let mut cmds = Vec::new();
        self.hold_for_approval(corrected, &mut cmds);
        cmds
    }

    /// UI approval. `hold_id`, when given, must match the current hold.
    pub fn approve(
        &mut self,
        hold_id: Option<u64>,
        edited: Option<String>,
        now: Instant,
    ) -> Result<Vec<Command>, RelayError> {
        if self.closed {
            return Err(RelayError::SessionClosed);
        }
        let outcome = self.gate.approve(hold_id, edited)?;
        Ok(self.resolve(outcome, now))
    }

    /// UI rejection.
    pub fn reject(&mut self, hold_id: Option<u64>, now: Instant) -> Result<Vec<Command>, RelayError> {
        if self.closed {
            return Err(RelayError::SessionClosed);
        }
        let outcome = self.gate.reject(hold_id)?;
        Ok(self.resolve(outcome, now))
    }

    pub fn on_keyword_result(
        &mut self,
        epoch: u64,
        text: &str,
        is_final: bool,
        now: Instant,
    ) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        let Some(action) = self.listener.on_result(epoch, text, is_final) else {
            return Vec::new();
        };
        // The listener disarmed itself on the match; stop the recognizer
        // before the resolution so the UI path finds nothing left to do.
        let mut cmds = vec![Command::StopKeywordListener { epoch }];
        match self.gate.resolve_keyword(action) {
            Ok(outcome) => cmds.extend(self.resolve(outcome, now)),
            Err(e) => warn!(error = %e, "Keyword matched without a pending approval"),
        }
        cmds
    }

    pub fn on_keyword_error(&mut self, epoch: u64, code: &str) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        match self.listener.on_error(epoch, &RecognitionError::from_code(code)) {
            ListenerReaction::Restart => vec![Command::StartKeywordListener {
                epoch,
                keywords: self.listener.keywords().words(),
            }],
            ListenerReaction::Stop => vec![
                Command::StopKeywordListener { epoch },
                Command::Notify(
                    "Voice approval is unavailable. Use the approve and reject buttons."
                        .to_string(),
                ),
            ],
            ListenerReaction::Ignore => Vec::new(),
        }
    }

    fn hold_for_approval(&mut self, corrected: Option<String>, cmds: &mut Vec<Command>) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let audio: Vec<u8> = self.utterance_audio.drain(..).collect();
        match self.gate.hold(pending.instruction.clone(), corrected, audio) {
            Ok(approval) => {
                pending.stage = ToolStage::AwaitingApproval;
                info!(hold_id = approval.hold_id, "Holding instruction for approval");
                cmds.push(Command::ShowApproval(approval));
                if let Some(epoch) = self.listener.arm() {
                    cmds.push(Command::StartKeywordListener {
                        epoch,
                        keywords: self.listener.keywords().words(),
                    });
                }
            }
            Err(e) => warn!(error = %e, "Could not hold instruction"),
        }
    }

    fn resolve(&mut self, outcome: ApprovalOutcome, now: Instant) -> Vec<Command> {
        let mut cmds = vec![Command::ClearApproval {
            hold_id: outcome.hold_id,
        }];
        if let Some(epoch) = self.listener.disarm() {
            cmds.push(Command::StopKeywordListener { epoch });
        }

        match outcome.resolution {
            Resolution::Approved { text, correction } => {
                info!(hold_id = outcome.hold_id, %text, "Instruction approved");
                if let Some(record) = correction {
                    cmds.push(Command::RecordCorrection(record));
                }
                if let Some(pending) = self.pending.as_mut() {
                    pending.instruction = text.clone();
                }
                self.draft.instruction = Some(text.clone());
                self.start_stream(text, now, &mut cmds);
            }
            Resolution::Rejected => {
                info!(hold_id = outcome.hold_id, "Instruction rejected");
                if let Some(pending) = self.pending.take() {
                    cmds.push(Command::SendToolResponse {
                        id: pending.id,
                        name: pending.name,
                        response: json!({ "result": self.config.rejection_text }),
                    });
                }
                self.draft.instruction = None;
                self.set_phase(RelayPhase::Idle, &mut cmds);
            }
        }
        cmds
    }

    fn release_approval(&mut self, cmds: &mut Vec<Command>) {
        if let Some(epoch) = self.listener.disarm() {
            cmds.push(Command::StopKeywordListener { epoch });
        }
        if let Some(approval) = self.gate.cancel() {
            cmds.push(Command::ClearApproval {
                hold_id: approval.hold_id,
            });
        }
    }

    // --- Agent stream ---

    fn start_stream(&mut self, instruction: String, now: Instant, cmds: &mut Vec<Command>) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        pending.stage = ToolStage::Streaming;

        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        self.active_stream = Some(stream_id);
        self.chunker.clear();
        self.unfreeze = Some(DeferredUnfreeze::start(
            now,
            self.config.unfreeze_delay,
            self.config.unfreeze_placeholder.clone(),
        ));
        cmds.push(Command::StartConverse {
            stream_id,
            request: ConverseRequest {
                instruction,
                session_id: self.continuation_id.clone(),
            },
        });
    }

    pub fn on_converse_event(
        &mut self,
        stream_id: u64,
        event: ConverseEvent,
        now: Instant,
    ) -> Vec<Command> {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "Dropping event from a stale agent stream");
            return Vec::new();
        }

        let mut cmds = Vec::new();
        match event {
            ConverseEvent::Text(text) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.result.push_str(&text);
                }
                self.draft.agent_text.push_str(&text);
                cmds.push(Command::AgentText(text.clone()));

                if self.phase == RelayPhase::Suppressing {
                    self.set_phase(RelayPhase::Relaying, &mut cmds);
                }
                let absorbed = self.unfreeze.as_mut().is_some_and(|u| u.push(&text));
                if !absorbed {
                    for segment in self.chunker.push(&text, now) {
                        self.relay_segment(&segment, &mut cmds);
                    }
                }
            }
            ConverseEvent::Block(block) => {
                self.draft.blocks.push(block.clone());
                cmds.push(Command::AgentBlock(block));
            }
            ConverseEvent::Done(summary) => {
                info!(
                    stream_id,
                    cost_usd = ?summary.cost_usd,
                    duration_ms = ?summary.duration_ms,
                    "Agent finished"
                );
                if summary.session_id.is_some() {
                    self.continuation_id = summary.session_id;
                }
                if let Some(response) = self.unfreeze.as_mut().and_then(|u| u.complete()) {
                    self.send_unfreeze(response, &mut cmds);
                }
                if let Some(segment) = self.chunker.flush() {
                    self.relay_segment(&segment, &mut cmds);
                }
                self.finish_relay(&mut cmds);
            }
        }
        cmds
    }

    /// The agent stream failed or was cancelled.
    pub fn on_converse_error(&mut self, stream_id: u64, message: &str) -> Vec<Command> {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "Dropping error from a stale agent stream");
            return Vec::new();
        }
        warn!(stream_id, error = %message, "Agent stream failed");

        let mut cmds = Vec::new();
        // The voice API must never be left waiting on the tool call.
        match self.unfreeze.as_mut().and_then(|u| u.fail(message)) {
            Some(response) => self.send_unfreeze(response, &mut cmds),
            None => {
                self.echo_turns += 1;
                cmds.push(Command::SendText {
                    text: self.config.failure_text(message),
                    turn_complete: true,
                });
            }
        }
        self.chunker.clear();
        cmds.push(Command::ReportError(format!("Agent failed: {}", message)));
        self.finish_relay(&mut cmds);
        cmds
    }

    fn relay_segment(&mut self, segment: &str, cmds: &mut Vec<Command>) {
        self.echo_turns += 1;
        cmds.push(Command::SendText {
            text: self.config.relay_text(segment),
            turn_complete: true,
        });
    }

    fn send_unfreeze(&mut self, response: Value, cmds: &mut Vec<Command>) {
        let Some(pending) = &self.pending else {
            return;
        };
        debug!(call_id = %pending.id, "Answering delegate call");
        // The voice API speaks the tool result; that speech is an echo too.
        self.echo_turns += 1;
        cmds.push(Command::SendToolResponse {
            id: pending.id.clone(),
            name: pending.name.clone(),
            response,
        });
    }

    fn finish_relay(&mut self, cmds: &mut Vec<Command>) {
        self.active_stream = None;
        self.unfreeze = None;
        self.pending = None;
        self.set_phase(RelayPhase::Idle, cmds);
        cmds.extend(self.commit_turn());
    }

    // --- Timers ---

    /// Earliest instant at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let unfreeze = self.unfreeze.as_ref().and_then(|u| u.deadline());
        match (unfreeze, self.chunker.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll(&mut self, now: Instant) -> Vec<Command> {
        if self.closed {
            return Vec::new();
        }
        let mut cmds = Vec::new();
        if let Some(response) = self.unfreeze.as_mut().and_then(|u| u.poll(now)) {
            self.send_unfreeze(response, &mut cmds);
        }
        if let Some(segment) = self.chunker.poll(now) {
            self.relay_segment(&segment, &mut cmds);
        }
        cmds
    }

    // --- Settings ---

    pub fn set_mode(&mut self, mode: InteractionMode) {
        if self.mode != mode {
            info!(from = %self.mode, to = %mode, "Interaction mode changed");
            self.mode = mode;
        }
    }

    /// Forgets the continuation id so the next instruction starts a new
    /// agent conversation.
    pub fn reset_conversation(&mut self) {
        info!("Starting a new agent conversation");
        self.continuation_id = None;
    }

    /// Drops committed turns from index `to` on and returns how many went.
    /// The voice log is left untouched. Only allowed between relays.
    pub fn rewind(&mut self, to: usize) -> Result<usize, RelayError> {
        if self.phase != RelayPhase::Idle {
            return Err(RelayError::RewindWhileBusy { phase: self.phase });
        }
        let removed = self.transcript.rewind(to).len();
        if removed > 0 {
            info!(to, removed, "Transcript rewound");
        }
        Ok(removed)
    }

    // --- Helpers ---

    fn commit_turn(&mut self) -> Vec<Command> {
        self.turn_delegated = false;
        self.utterance_audio.clear();
        self.transcript
            .commit(std::mem::take(&mut self.draft))
            .map(Command::CommitTurn)
            .into_iter()
            .collect()
    }

    fn set_phase(&mut self, to: RelayPhase, cmds: &mut Vec<Command>) {
        match self.phase.transition(to) {
            Ok(phase) => {
                debug!(from = %self.phase, to = %phase, "Relay phase change");
                self.phase = phase;
                cmds.push(Command::PhaseChanged(phase));
            }
            Err(e) => warn!(error = %e, "Ignoring relay phase change"),
        }
    }

    fn is_current_stream(&self, stream_id: u64) -> bool {
        !self.closed && self.active_stream == Some(stream_id)
    }

    // --- Accessors ---

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True while an approval hold (or the correction step before it) has
    /// the voice session frozen.
    pub fn is_frozen(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.stage != ToolStage::Streaming)
    }

    pub fn pending_approval(&self) -> Option<&PendingApproval> {
        self.gate.current()
    }

    pub fn continuation_id(&self) -> Option<&str> {
        self.continuation_id.as_deref()
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn voice_log(&self) -> &VoiceLog {
        &self.voice_log
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

fn error_response(call: &ToolInvocation, err: &RelayError) -> Command {
    Command::SendToolResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response: json!({ "error": err.to_string() }),
    }
}
