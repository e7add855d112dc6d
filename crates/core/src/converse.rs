//! Client side of the agent backend stream.
//!
//! The backend answers one instruction with a server-sent event stream of
//! JSON frames: text fragments, structured blocks, and a final `done` or
//! `error` frame.

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub instruction: String,
    /// Continuation id from the previous `done` frame, so the agent keeps
    /// the same conversation.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConverseSummary {
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConverseEvent {
    Text(String),
    /// Structured sub-event from the agent (tool use, tool result). Kept for
    /// history, never spoken.
    Block(Value),
    Done(ConverseSummary),
}

#[derive(Debug, Error)]
pub enum ConverseError {
    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed agent frame: {0}")]
    Decode(String),
    #[error("agent error: {0}")]
    Backend(String),
    #[error("agent stream cancelled")]
    Cancelled,
    #[error("agent stream closed")]
    Closed,
}

/// A stream of events for one instruction.
pub type ConverseStream = Pin<Box<dyn Stream<Item = Result<ConverseEvent, ConverseError>> + Send>>;

/// Anything that can answer an instruction with a converse stream.
#[async_trait]
pub trait ConverseClient: Send + Sync {
    async fn stream(&self, request: ConverseRequest) -> Result<ConverseStream, ConverseError>;
}

#[derive(Deserialize)]
struct WireFrame {
    text: Option<String>,
    block: Option<Value>,
    #[serde(default)]
    done: bool,
    session_id: Option<String>,
    cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    error: Option<String>,
}

/// Incremental decoder for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds raw body bytes and returns every event completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ConverseEvent, ConverseError>> {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let frame = String::from_utf8_lossy(&frame);
            let data = frame
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect::<Vec<_>>()
                .join("\n");
            if data.trim().is_empty() {
                continue;
            }
            if let Some(event) = parse_frame(&data) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(data: &str) -> Option<Result<ConverseEvent, ConverseError>> {
    let frame: WireFrame = match serde_json::from_str(data) {
        Ok(frame) => frame,
        Err(e) => return Some(Err(ConverseError::Decode(e.to_string()))),
    };
    if let Some(error) = frame.error {
        return Some(Err(ConverseError::Backend(error)));
    }
    if frame.done {
        return Some(Ok(ConverseEvent::Done(ConverseSummary {
            session_id: frame.session_id,
            cost_usd: frame.cost_usd,
            duration_ms: frame.duration_ms,
        })));
    }
    if let Some(text) = frame.text {
        return Some(Ok(ConverseEvent::Text(text)));
    }
    if let Some(block) = frame.block {
        return Some(Ok(ConverseEvent::Block(block)));
    }
    debug!(%data, "Skipping unrecognised agent frame");
    None
}

/// `ConverseClient` for the agent backend's HTTP endpoint.
pub struct HttpConverseClient {
    client: reqwest::Client,
    url: String,
}

impl HttpConverseClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ConverseClient for HttpConverseClient {
    async fn stream(&self, request: ConverseRequest) -> Result<ConverseStream, ConverseError> {
        info!(url = %self.url, continuation = ?request.session_id, "Opening agent stream");
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConverseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut decoder = SseDecoder::default();
        let events = response.bytes_stream().flat_map(move |chunk| {
            let items = match chunk {
                Ok(bytes) => decoder.feed(&bytes),
                Err(e) => vec![Err(ConverseError::Http(e))],
            };
            stream::iter(items)
        });
        Ok(Box::pin(events))
    }
}

const MOCK_CHUNKS: [&str; 5] = [
    "A closure is a function that remembers variables from the scope it was defined in, even after that scope has finished.",
    "If an inner function references a variable of the outer function, that variable is captured.",
    "Calling the inner function later still reaches the captured variable, even though the outer function is long gone.",
    "This is what makes factory functions, decorators and callbacks work.",
    "The closure captures the variable itself, not a copy of its value at creation time.",
];

/// A `ConverseClient` that streams canned text at a fixed pace.
///
/// Useful for exercising the voice side without an agent backend.
pub struct MockConverseClient {
    chunks: Vec<String>,
    pace: Duration,
    fail_with: Option<String>,
}

impl Default for MockConverseClient {
    fn default() -> Self {
        Self::new(
            MOCK_CHUNKS.iter().map(|c| c.to_string()).collect(),
            Duration::from_secs(1),
        )
    }
}

impl MockConverseClient {
    pub fn new(chunks: Vec<String>, pace: Duration) -> Self {
        Self {
            chunks,
            pace,
            fail_with: None,
        }
    }

    /// Ends the stream with an error frame instead of `done`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }
}

#[async_trait]
impl ConverseClient for MockConverseClient {
    async fn stream(&self, request: ConverseRequest) -> Result<ConverseStream, ConverseError> {
        let (tx, rx) = mpsc::channel(16);
        let chunks = self.chunks.clone();
        let pace = self.pace;
        let fail_with = self.fail_with.clone();
        let session_id = request
            .session_id
            .unwrap_or_else(|| "mock-session".to_string());

        tokio::spawn(async move {
            let started = Instant::now();
            for chunk in chunks {
                if tx.send(Ok(ConverseEvent::Text(chunk))).await.is_err() {
                    return;
                }
                tokio::time::sleep(pace).await;
            }
            let last = match fail_with {
                Some(message) => Err(ConverseError::Backend(message)),
                None => Ok(ConverseEvent::Done(ConverseSummary {
                    session_id: Some(session_id),
                    cost_usd: Some(0.0),
                    duration_ms: Some(started.elapsed().as_millis() as u64),
                })),
            };
            let _ = tx.send(last).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
