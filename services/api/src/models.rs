//! REST API Models
//!
//! Response bodies of the inspection endpoints, with `utoipa` schemas for the
//! OpenAPI document. They are built from the live core session types.

use chrono::{DateTime, Utc};
use desc_core::{
    DescScores, ExerciseState, Message as CoreMessage, SessionSnapshot,
    scores::Dimension,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub live_sessions: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ExerciseStateView {
    #[schema(example = "roleplay")]
    pub phase: String,
    pub started: bool,
    pub can_start: bool,
    pub elapsed_seconds: u64,
    pub message_count: u32,
}

impl From<&ExerciseState> for ExerciseStateView {
    fn from(state: &ExerciseState) -> Self {
        Self {
            phase: state.phase().to_string(),
            started: state.started(),
            can_start: state.can_start(),
            elapsed_seconds: state.elapsed_seconds(),
            message_count: state.message_count(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ScoresView {
    pub decrire: f64,
    pub exprimer: f64,
    pub specifier: f64,
    pub conclure: f64,
    pub average: f64,
}

impl From<&DescScores> for ScoresView {
    fn from(scores: &DescScores) -> Self {
        Self {
            decrire: scores.get(Dimension::Decrire),
            exprimer: scores.get(Dimension::Exprimer),
            specifier: scores.get(Dimension::Specifier),
            conclure: scores.get(Dimension::Conclure),
            average: scores.average(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct MessageView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "assistant")]
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "ai")]
    pub source: String,
    pub is_thomas: bool,
    pub coach_feedback: Option<String>,
    pub is_off_topic: bool,
    pub is_language_warning: bool,
}

impl From<&CoreMessage> for MessageView {
    fn from(message: &CoreMessage) -> Self {
        Self {
            id: message.id,
            role: message.role.to_string(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            source: message.source.to_string(),
            is_thomas: message.is_thomas,
            coach_feedback: message.coach_feedback.clone(),
            is_off_topic: message.is_off_topic,
            is_language_warning: message.is_language_warning,
        }
    }
}

/// One live session, as listed by `GET /sessions`.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub state: ExerciseStateView,
    pub average_score: f64,
    pub voice_mode: bool,
}

impl SessionSummary {
    pub fn new(connected_at: DateTime<Utc>, snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            connected_at,
            state: ExerciseStateView::from(&snapshot.state),
            average_score: snapshot.scores.average(),
            voice_mode: snapshot.voice_mode,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionDetail {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub state: ExerciseStateView,
    pub scores: ScoresView,
    pub voice_mode: bool,
    pub typing: bool,
    pub messages: Vec<MessageView>,
}

impl SessionDetail {
    pub fn new(connected_at: DateTime<Utc>, snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            connected_at,
            state: ExerciseStateView::from(&snapshot.state),
            scores: ScoresView::from(&snapshot.scores),
            voice_mode: snapshot.voice_mode,
            typing: snapshot.typing,
            messages: snapshot.messages.iter().map(MessageView::from).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
