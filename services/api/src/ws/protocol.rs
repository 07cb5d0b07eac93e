//! Defines the WebSocket message protocol between the browser client and the API server.

use desc_core::{
    DescScores, ExerciseState, Message, SessionEvent,
    voice::VoiceSupport,
    voices::{Emotion, Speaker},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session. This must be the first message.
    Init {
        /// Whether the browser offers speech recognition.
        #[serde(default)]
        stt_supported: bool,
        /// Engage voice mode when the roleplay starts.
        #[serde(default)]
        voice_on_start: bool,
    },
    /// A typed message from the user.
    UserMessage { text: String },
    StartExercise,
    EndExercise,
    /// Resets the exercise, asking the user first when `confirm` is set.
    ResetExercise {
        #[serde(default)]
        confirm: bool,
    },
    /// Toggles the voice input/output feature.
    SetVoiceEnabled { enabled: bool },
    /// A recognition result from the browser.
    Transcript { text: String, is_final: bool },
    /// The browser recognizer failed with a Web Speech API error code.
    RecognitionError { code: String },
    /// The browser recognizer stopped on its own.
    RecognitionEnded,
    /// An audio clip finished playing.
    PlaybackEnded { playback_id: u64 },
    /// Answer to a `confirm` prompt.
    ConfirmResponse { request_id: u64, confirmed: bool },
    ShowCoachFeedback { message_id: Uuid },
    /// Asks for a plain-text copy of the conversation.
    RequestTranscript,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms successful session initialization and provides the initial state.
    Initialized {
        session_id: Uuid,
        state: ExerciseState,
        scores: DescScores,
        history: Vec<Message>,
        stt_available: bool,
        tts_available: bool,
    },
    MessageAppended { message: Message },
    HistoryReplaced { history: Vec<Message> },
    StateUpdate { state: ExerciseState },
    ScoresUpdate { scores: DescScores },
    /// A reply is being prepared.
    Typing { active: bool },
    Notice {
        title: String,
        message: String,
        icon: String,
    },
    CoachFeedback { feedback: String },
    /// Asks the user a yes/no question; answered with `confirm_response`.
    Confirm {
        request_id: u64,
        title: String,
        message: String,
    },
    /// An update on the user's speech-to-text transcription.
    TranscriptionUpdate { text: String, is_final: bool },
    StartRecognition { locale: String },
    StopRecognition,
    Listening { active: bool },
    /// A complete clip (base64 encoded MP3) to play; acknowledged with `playback_ended`.
    AudioChunk { playback_id: u64, data: String },
    StopAudio,
    /// Signals that the AI has started speaking.
    AiSpeakingStart { speaker: Speaker, emotion: Emotion },
    /// Signals that the AI has finished speaking.
    AiSpeakingEnd { speaker: Speaker, emotion: Emotion },
    VoiceMode { enabled: bool },
    Transcript { text: String },
    /// Reports an error to the client.
    Error { message: String },
}

impl ServerMessage {
    pub fn initialized(
        session_id: Uuid,
        state: ExerciseState,
        scores: DescScores,
        history: Vec<Message>,
        support: VoiceSupport,
    ) -> Self {
        ServerMessage::Initialized {
            session_id,
            state,
            scores,
            history,
            stt_available: support.stt,
            tts_available: support.tts,
        }
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::MessageAppended(message) => ServerMessage::MessageAppended { message },
            SessionEvent::HistoryReplaced(history) => ServerMessage::HistoryReplaced { history },
            SessionEvent::StateChanged(state) => ServerMessage::StateUpdate { state },
            SessionEvent::ScoresChanged(scores) => ServerMessage::ScoresUpdate { scores },
            SessionEvent::Typing(active) => ServerMessage::Typing { active },
            SessionEvent::Transcription { text, is_final } => {
                ServerMessage::TranscriptionUpdate { text, is_final }
            }
            SessionEvent::ListeningChanged(active) => ServerMessage::Listening { active },
            SessionEvent::SpeakingStarted { speaker, emotion } => {
                ServerMessage::AiSpeakingStart { speaker, emotion }
            }
            SessionEvent::SpeakingEnded { speaker, emotion } => {
                ServerMessage::AiSpeakingEnd { speaker, emotion }
            }
            SessionEvent::VoiceModeChanged(enabled) => ServerMessage::VoiceMode { enabled },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_init_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "init"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                stt_supported: false,
                voice_on_start: false
            }
        );
    }

    #[test]
    fn test_client_messages_deserialize() {
        let cases = [
            (
                json!({"type": "user_message", "text": "Tu es en retard"}),
                ClientMessage::UserMessage {
                    text: "Tu es en retard".to_string(),
                },
            ),
            (json!({"type": "start_exercise"}), ClientMessage::StartExercise),
            (
                json!({"type": "reset_exercise", "confirm": true}),
                ClientMessage::ResetExercise { confirm: true },
            ),
            (
                json!({"type": "transcript", "text": "Salut", "is_final": false}),
                ClientMessage::Transcript {
                    text: "Salut".to_string(),
                    is_final: false,
                },
            ),
            (
                json!({"type": "playback_ended", "playback_id": 7}),
                ClientMessage::PlaybackEnded { playback_id: 7 },
            ),
            (
                json!({"type": "confirm_response", "request_id": 2, "confirmed": false}),
                ClientMessage::ConfirmResponse {
                    request_id: 2,
                    confirmed: false,
                },
            ),
        ];
        for (value, expected) in cases {
            let parsed: ClientMessage = serde_json::from_value(value).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn test_unknown_client_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "launch_rocket"}"#).is_err());
    }

    #[test]
    fn test_session_events_map_to_server_messages() {
        let msg = ServerMessage::from(SessionEvent::Typing(true));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "typing", "active": true})
        );

        let msg = ServerMessage::from(SessionEvent::SpeakingStarted {
            speaker: Speaker::Thomas,
            emotion: Emotion::Defensive,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "ai_speaking_start", "speaker": "thomas", "emotion": "defensive"})
        );

        let msg = ServerMessage::from(SessionEvent::StateChanged(ExerciseState::new()));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "state_update");
        assert_eq!(value["state"]["phase"], "brief");
        assert_eq!(value["state"]["can_start"], true);
    }

    #[test]
    fn test_audio_chunk_serialization() {
        let msg = ServerMessage::AudioChunk {
            playback_id: 3,
            data: "SUQz".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"audio_chunk","playback_id":3,"data":"SUQz"}"#
        );
    }
}
