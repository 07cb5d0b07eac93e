//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the service clients
//! shared by every connection and the registry of live sessions.

use crate::config::Config;
use chrono::{DateTime, Utc};
use desc_core::{
    Session, SessionConfig, llm_client::LLMClient, prompts::PhasePrompts,
    voice::SpeechSynthesizer,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A session hosted by an open WebSocket.
#[derive(Clone)]
pub struct LiveSession {
    pub session: Session,
    pub connected_at: DateTime<Utc>,
}

/// In-memory index of the sessions whose socket is still open.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, LiveSession>>,
}

impl SessionRegistry {
    pub async fn insert(&self, session: Session) {
        let live = LiveSession {
            session: session.clone(),
            connected_at: Utc::now(),
        };
        self.sessions.write().await.insert(session.id(), live);
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn get(&self, id: Uuid) -> Option<LiveSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Oldest connection first.
    pub async fn list(&self) -> Vec<LiveSession> {
        let mut sessions: Vec<LiveSession> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|live| live.connected_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub llm_client: Arc<dyn LLMClient>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub prompts: Arc<PhasePrompts>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Per-session settings derived from the service configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_messages: self.config.max_messages,
            expected_language: self.config.expected_language.clone(),
            ..SessionConfig::default()
        }
    }
}
