//! DESC Roleplay Core
//!
//! The orchestration core of the DESC communication trainer. A session walks
//! the user through three phases (briefing, roleplay with the simulated
//! colleague Thomas, debrief) while a language model plays the counterpart,
//! a coach comments on each turn, and a lexical tracker scores the four DESC
//! dimensions of what the user says.
//!
//! The crate is transport agnostic: the model service, the speech providers
//! and the presentation surface are all consumed through traits.

pub mod llm_client;
pub mod markup;
pub mod message;
pub mod phase;
pub mod presenter;
pub mod prompts;
pub mod scores;
pub mod session;
pub mod stream;
pub mod tts;
pub mod validator;
pub mod voice;
pub mod voices;

pub use message::{Message, MessageRole, MessageSource};
pub use phase::{ExerciseState, Phase, PhaseError};
pub use scores::DescScores;
pub use session::{
    RejectReason, Session, SessionConfig, SessionEvent, SessionParts, SessionSnapshot, TurnOutcome,
};
