//! Voice Relay API Library Crate
//!
//! The web service that relays a spoken conversation to a coding agent:
//! application state, database access, REST handlers for approvals and
//! corrections, the browser WebSocket and routing. The `api` binary is a
//! thin wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
