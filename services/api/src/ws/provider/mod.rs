//! Runs the duplex voice connection for one browser session.

pub mod gemini;
mod runtime;

use super::protocol::ServerMessage;
use crate::state::AppState;
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{Instrument, error, info_span};
use uuid::Uuid;
use voxrelay_core::{approval::InteractionMode, error::RelayError};

/// Reply channel for decisions made outside the session, such as the REST
/// approval endpoints.
pub type DecisionReply = oneshot::Sender<Result<(), RelayError>>;

/// An input to a running live session.
#[derive(Debug)]
pub enum LiveInput {
    /// Raw mic PCM16 at the rate announced in `init`.
    MicAudio(Bytes),
    Approve {
        hold_id: Option<u64>,
        edited_text: Option<String>,
        reply: Option<DecisionReply>,
    },
    Reject {
        hold_id: Option<u64>,
        reply: Option<DecisionReply>,
    },
    KeywordResult {
        epoch: u64,
        text: String,
        is_final: bool,
    },
    KeywordError {
        epoch: u64,
        error: String,
    },
    SetMode(InteractionMode),
    /// Drops committed turns from this index on.
    Rewind { to: usize },
    /// Ends the session. Everything in flight is cancelled.
    Close,
}

/// Options fixed for the lifetime of one live session.
#[derive(Debug, Clone, Copy)]
pub struct LiveOptions {
    pub interaction_mode: InteractionMode,
    pub input_sample_rate: u32,
}

/// Starts the live session task.
///
/// # Returns
/// A tuple containing:
/// 1. A `mpsc::Sender` to send `LiveInput`s to the session task.
/// 2. A `JoinHandle` for the spawned task.
pub fn start_live_session(
    state: Arc<AppState>,
    session_id: Uuid,
    options: LiveOptions,
    outbox: mpsc::Sender<ServerMessage>,
) -> (mpsc::Sender<LiveInput>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let control = tx.clone();
    let span = info_span!("relay_session", %session_id, mode = %options.interaction_mode);

    let handle = tokio::spawn(
        async move {
            let result = gemini::run(&state, session_id, options, control, rx, outbox.clone()).await;
            state.sessions.deregister(session_id).await;
            if let Err(e) = result {
                error!(error = ?e, "Live session failed");
                let _ = outbox
                    .send(ServerMessage::Error {
                        message: format!("Voice connection failed: {}", e),
                    })
                    .await;
            }
        }
        .instrument(span),
    );

    (tx, handle)
}
