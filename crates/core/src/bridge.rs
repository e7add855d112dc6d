//! Converse Bridge: runs one agent stream as a cancellable task.
//!
//! Events are forwarded to the session runtime tagged with their stream id.
//! The relay ignores anything whose id is no longer current, which covers the
//! window between issuing an abort and the reader actually observing it.

use crate::converse::{ConverseClient, ConverseError, ConverseEvent, ConverseRequest};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum BridgePayload {
    Event(ConverseEvent),
    /// The stream ended without completing. Sent at most once, and never
    /// after a `Done` event.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    pub stream_id: u64,
    pub payload: BridgePayload,
}

/// Handle to a running agent stream.
pub struct ConverseHandle {
    stream_id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConverseHandle {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Requests cancellation. The reader observes it at its next await point.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct ConverseBridge;

impl ConverseBridge {
    /// Spawns the reader task for one instruction.
    pub fn spawn(
        client: Arc<dyn ConverseClient>,
        request: ConverseRequest,
        stream_id: u64,
        tx: mpsc::Sender<BridgeEvent>,
    ) -> ConverseHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ConverseError::Cancelled),
                result = pump(client, request, stream_id, &tx) => result,
            };

            match outcome {
                Ok(()) => debug!(stream_id, "Agent stream completed"),
                Err(ConverseError::Closed) => {
                    debug!(stream_id, "Session dropped the bridge receiver")
                }
                Err(e) => {
                    if matches!(e, ConverseError::Cancelled) {
                        info!(stream_id, "Agent stream cancelled");
                    } else {
                        warn!(stream_id, error = %e, "Agent stream failed");
                    }
                    let _ = tx
                        .send(BridgeEvent {
                            stream_id,
                            payload: BridgePayload::Failed(e.to_string()),
                        })
                        .await;
                }
            }
        });

        ConverseHandle {
            stream_id,
            cancel,
            task,
        }
    }
}

async fn pump(
    client: Arc<dyn ConverseClient>,
    request: ConverseRequest,
    stream_id: u64,
    tx: &mpsc::Sender<BridgeEvent>,
) -> Result<(), ConverseError> {
    let mut stream = client.stream(request).await?;
    while let Some(item) = stream.next().await {
        let event = item?;
        let done = matches!(event, ConverseEvent::Done(_));
        tx.send(BridgeEvent {
            stream_id,
            payload: BridgePayload::Event(event),
        })
        .await
        .map_err(|_| ConverseError::Closed)?;
        if done {
            return Ok(());
        }
    }
    Err(ConverseError::Backend(
        "stream ended without completion".to_string(),
    ))
}
