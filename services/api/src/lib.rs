//! DESC API Library Crate
//!
//! This library contains the web service around the DESC roleplay core: the
//! configuration, the shared application state, the inspection REST API, the
//! WebSocket session logic and the routing. The binaries are thin wrappers
//! around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
