//! WebSocket Session Management
//!
//! - `protocol`: the JSON message format between browser and server.
//! - `session`: the browser connection lifecycle, from `init` to close.
//! - `provider`: the duplex voice connection and the relay runtime behind it.

pub mod protocol;
pub mod provider;
pub mod session;

pub use session::ws_handler;
