//! Client for the Gemini Live `BidiGenerateContent` WebSocket API.
//!
//! `types` holds the JSON wire messages; `connection` opens the socket, sends
//! the setup message and exposes a typed sink/stream pair.

pub mod connection;
pub mod types;

pub use connection::{DEFAULT_LIVE_URL, LiveSink, LiveStream, connect, live_url};
pub use types::{ClientMessage, ServerMessage, Setup};
