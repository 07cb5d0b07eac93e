//! WebSocket Session Management
//!
//! This module contains the logic for running a DESC exercise session over a
//! WebSocket. It is structured into submodules:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from handshake to termination.
//! - `bridge`: Browser-backed speech recognition, audio playback and presentation.

mod bridge;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
