//! Conversation Orchestrator
//!
//! A [`Session`] owns one exercise: its phase state, the conversation history
//! and the DESC scores. It decides which instruction and sampling parameters
//! apply to a user turn, sends the turn to the model, routes the answer
//! through the validator (typed roleplay), the stream assembler (spoken
//! roleplay) or plain-text normalisation (brief and debrief), and publishes
//! every visible change as a [`SessionEvent`].
//!
//! Session state sits behind a single async mutex that is never held across a
//! model call, and every handler runs to completion under it. A turn carries
//! the generation it started in: ending or resetting the exercise bumps the
//! generation, so a reply that arrives afterwards is discarded.

use crate::llm_client::{ChatTurn, CompletionRequest, LLMClient};
use crate::markup::normalize_plain_text;
use crate::message::{DEFAULT_MAX_MESSAGES, Message, MessageLog, MessageRole};
use crate::phase::{ExerciseState, Phase, PhaseError, TIME_WARNING_SECONDS, Tick};
use crate::presenter::{Notice, Presenter};
use crate::prompts::{self, PhasePrompts};
use crate::scores::{DescScores, Dimension};
use crate::stream;
use crate::validator::{ResponseValidator, TurnError, ValidatedReply};
use crate::voice::{
    AudioOutput, SpeechRecognizer, SpeechSynthesizer, VoiceBridge, VoiceError, VoiceEvent,
    VoiceSupport,
};
use crate::voices::{Emotion, Speaker, detect_emotion};
use serde::Serialize;
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_messages: usize,
    /// Language code the roleplay replies must carry.
    pub expected_language: String,
    pub time_warning_after_seconds: u64,
    /// Delay between the debrief summary and the reflection prompt.
    pub follow_up_delay: Duration,
    pub text_history_window: usize,
    pub voice_history_window: usize,
    pub recognition_locale: String,
    /// Engage voice mode when the exercise starts, unless it was used before.
    pub voice_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            expected_language: "fr".to_string(),
            time_warning_after_seconds: TIME_WARNING_SECONDS,
            follow_up_delay: Duration::from_secs(3),
            text_history_window: 10,
            voice_history_window: 6,
            recognition_locale: "fr-FR".to_string(),
            voice_on_start: false,
        }
    }
}

/// The collaborators a session is built from.
pub struct SessionParts {
    pub llm: Arc<dyn LLMClient>,
    pub prompts: PhasePrompts,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub audio: Arc<dyn AudioOutput>,
    pub presenter: Arc<dyn Presenter>,
}

/// Every change a presentation layer needs to mirror.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended(Message),
    HistoryReplaced(Vec<Message>),
    StateChanged(ExerciseState),
    ScoresChanged(DescScores),
    /// A turn is in flight (or no longer is).
    Typing(bool),
    Transcription { text: String, is_final: bool },
    ListeningChanged(bool),
    SpeakingStarted { speaker: Speaker, emotion: Emotion },
    SpeakingEnded { speaker: Speaker, emotion: Emotion },
    VoiceModeChanged(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("message is empty")]
    Empty,
    #[error("a turn is already in flight")]
    TurnInFlight,
}

/// How a call to [`Session::submit_user_message`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing was appended and no request was made.
    Rejected(RejectReason),
    /// The exercise was ended or reset while the model was answering.
    Discarded,
    Replied(Message),
    /// The turn failed; this status message was appended instead.
    Failed(Message),
}

/// A point-in-time copy of the session, for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub state: ExerciseState,
    pub scores: DescScores,
    pub messages: Vec<Message>,
    pub voice_mode: bool,
    pub typing: bool,
}

struct Inner {
    state: ExerciseState,
    messages: MessageLog,
    scores: DescScores,
    in_flight: bool,
    generation: u64,
    voice_mode: bool,
    voice_engaged_once: bool,
}

#[derive(Default)]
struct Tasks {
    timer: Option<JoinHandle<()>>,
    follow_up: Option<JoinHandle<()>>,
    voice_pump: Option<JoinHandle<()>>,
    speech: Option<JoinHandle<()>>,
}

struct Shared {
    id: Uuid,
    config: SessionConfig,
    llm: Arc<dyn LLMClient>,
    prompts: PhasePrompts,
    voice: VoiceBridge,
    presenter: Arc<dyn Presenter>,
    events: mpsc::UnboundedSender<SessionEvent>,
    inner: Mutex<Inner>,
    tasks: std::sync::Mutex<Tasks>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for handle in [
            tasks.timer.take(),
            tasks.follow_up.take(),
            tasks.voice_pump.take(),
            tasks.speech.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// The reply of a successful turn, before it is applied to the session.
struct PreparedReply {
    message: Message,
    /// The user text feeds the score tracker and the phase message count.
    scored: bool,
    speech: Option<(Speaker, Emotion)>,
}

impl PreparedReply {
    fn unscored(message: Message) -> Self {
        Self {
            message,
            scored: false,
            speech: None,
        }
    }
}

/// Handle to one live exercise. Cloning is cheap and shares the session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Creates a session in the brief phase. Must be called within a Tokio
    /// runtime; events are delivered on the returned receiver.
    pub fn new(
        parts: SessionParts,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (voice_events, voice_receiver) = mpsc::unbounded_channel();
        let voice = VoiceBridge::new(
            parts.recognizer,
            parts.synthesizer,
            parts.audio,
            config.recognition_locale.clone(),
            voice_events,
        );

        let mut messages = MessageLog::new(config.max_messages);
        messages.push(Message::system(prompts::BRIEF_WELCOME));

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            config,
            llm: parts.llm,
            prompts: parts.prompts,
            voice,
            presenter: parts.presenter,
            events,
            inner: Mutex::new(Inner {
                state: ExerciseState::new(),
                messages,
                scores: DescScores::new(),
                in_flight: false,
                generation: 0,
                voice_mode: false,
                voice_engaged_once: false,
            }),
            tasks: std::sync::Mutex::new(Tasks::default()),
        });

        let pump = tokio::spawn(pump_voice_events(Arc::downgrade(&shared), voice_receiver));
        shared.tasks().voice_pump = Some(pump);

        (Self { shared }, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub async fn phase(&self) -> Phase {
        self.shared.inner.lock().await.state.phase()
    }

    pub async fn is_typing(&self) -> bool {
        self.shared.inner.lock().await.in_flight
    }

    pub async fn voice_mode(&self) -> bool {
        self.shared.inner.lock().await.voice_mode
    }

    /// What the attached speech providers can do.
    pub fn voice_support(&self) -> VoiceSupport {
        self.shared.voice.support()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock().await;
        SessionSnapshot {
            id: self.shared.id,
            state: inner.state.clone(),
            scores: inner.scores,
            messages: inner.messages.as_slice().to_vec(),
            voice_mode: inner.voice_mode,
            typing: inner.in_flight,
        }
    }

    /// brief -> roleplay: starts the clock and posts Thomas's opening line.
    pub async fn start_exercise(&self) -> Result<(), PhaseError> {
        let shared = &self.shared;
        let (engage_voice, voice_active, opening, generation) = {
            let mut inner = shared.inner.lock().await;
            inner.state.start()?;
            inner.generation += 1;
            release_turn(shared, &mut inner);

            let opening = Message::system(prompts::THOMAS_OPENING).from_thomas();
            inner.messages.push(opening.clone());
            shared.emit(SessionEvent::MessageAppended(opening.clone()));
            shared.emit(SessionEvent::StateChanged(inner.state.clone()));
            (
                shared.config.voice_on_start && !inner.voice_engaged_once,
                inner.voice_mode,
                opening,
                inner.generation,
            )
        };

        let timer = self.spawn_timer();
        if let Some(previous) = shared.tasks().timer.replace(timer) {
            previous.abort();
        }
        info!(session_id = %shared.id, phase = %Phase::Roleplay, "Exercise started");

        let voice_active = if engage_voice {
            self.enable_voice_mode().await
        } else {
            voice_active
        };
        if voice_active {
            self.speak_in_background(generation, opening.content, Speaker::Thomas, Emotion::Casual);
        }
        Ok(())
    }

    /// roleplay -> debrief: stops the clock and voice mode, posts the summary
    /// and schedules the reflection prompt.
    pub async fn end_exercise(&self) -> Result<(), PhaseError> {
        let shared = &self.shared;
        let generation = {
            let mut inner = shared.inner.lock().await;
            let exchanges = inner.state.message_count();
            inner.state.end()?;
            if let Some(timer) = shared.tasks().timer.take() {
                timer.abort();
            }
            inner.generation += 1;
            release_turn(shared, &mut inner);

            let summary = Message::system(prompts::debrief_summary(
                &inner.scores,
                inner.state.elapsed_seconds(),
                exchanges,
            ));
            inner.messages.push(summary.clone());
            shared.emit(SessionEvent::MessageAppended(summary));
            shared.emit(SessionEvent::StateChanged(inner.state.clone()));
            info!(
                session_id = %shared.id,
                elapsed_seconds = inner.state.elapsed_seconds(),
                exchanges,
                average = inner.scores.average(),
                "Exercise ended"
            );
            inner.generation
        };

        self.disable_voice_mode().await;

        let follow_up = self.spawn_follow_up(generation);
        if let Some(previous) = shared.tasks().follow_up.replace(follow_up) {
            previous.abort();
        }
        Ok(())
    }

    /// Back to a fresh brief phase from anywhere.
    pub async fn reset_exercise(&self) {
        let shared = &self.shared;
        {
            let mut tasks = shared.tasks();
            for handle in [tasks.timer.take(), tasks.follow_up.take()].into_iter().flatten() {
                handle.abort();
            }
        }
        {
            let mut inner = shared.inner.lock().await;
            inner.state.reset();
            inner.scores.reset();
            inner.messages.replace_with(Message::system(prompts::BRIEF_WELCOME));
            inner.generation += 1;
            release_turn(shared, &mut inner);

            shared.emit(SessionEvent::HistoryReplaced(inner.messages.as_slice().to_vec()));
            shared.emit(SessionEvent::StateChanged(inner.state.clone()));
            shared.emit(SessionEvent::ScoresChanged(inner.scores));
        }
        self.disable_voice_mode().await;
        info!(session_id = %shared.id, "Exercise reset");
    }

    /// Resets only once the user confirmed. Returns whether a reset happened.
    pub async fn request_reset(&self) -> bool {
        let confirmed = self
            .shared
            .presenter
            .confirm(
                "Recommencer l'exercice",
                "Voulez-vous vraiment recommencer ? La conversation et les scores seront effacés.",
            )
            .await;
        if confirmed {
            self.reset_exercise().await;
        }
        confirmed
    }

    /// Engages voice mode when both recognition and synthesis are available.
    pub async fn enable_voice_mode(&self) -> bool {
        let shared = &self.shared;
        if shared.inner.lock().await.voice_mode {
            return true;
        }

        let support = shared.voice.support();
        if !support.full() {
            warn!(stt = support.stt, tts = support.tts, "Voice mode unavailable");
            shared.presenter.show_notice(Notice::voice_unavailable(support));
            return false;
        }
        if let Err(e) = shared.voice.start_listening().await {
            error!(error = %e, "Could not start listening");
            shared.presenter.show_notice(Notice::voice_error(&e));
            return false;
        }

        let mut inner = shared.inner.lock().await;
        inner.voice_mode = true;
        inner.voice_engaged_once = true;
        shared.emit(SessionEvent::VoiceModeChanged(true));
        info!(session_id = %shared.id, "Voice mode enabled");
        true
    }

    /// Stops listening and speaking. Safe to call when voice mode is off.
    pub async fn disable_voice_mode(&self) {
        let shared = &self.shared;
        let was_active = std::mem::replace(&mut shared.inner.lock().await.voice_mode, false);
        if let Some(speech) = shared.tasks().speech.take() {
            speech.abort();
        }
        shared.voice.stop_listening().await;
        shared.voice.stop_speaking().await;
        if was_active {
            shared.emit(SessionEvent::VoiceModeChanged(false));
            info!(session_id = %shared.id, "Voice mode disabled");
        }
    }

    /// Returns whether voice mode is on afterwards.
    pub async fn toggle_voice_mode(&self) -> bool {
        if self.voice_mode().await {
            self.disable_voice_mode().await;
            false
        } else {
            self.enable_voice_mode().await
        }
    }

    /// Runs one user turn. Never fails: errors end up as a status message in
    /// the conversation.
    pub async fn submit_user_message(&self, text: &str) -> TurnOutcome {
        let shared = &self.shared;
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Rejected(RejectReason::Empty);
        }

        let (request, phase, voice, generation) = {
            let mut inner = shared.inner.lock().await;
            if inner.in_flight {
                debug!("Turn already in flight, ignoring message");
                return TurnOutcome::Rejected(RejectReason::TurnInFlight);
            }
            let request = self.build_request(&inner, text);

            let user_message = Message::user(text);
            inner.messages.push(user_message.clone());
            shared.emit(SessionEvent::MessageAppended(user_message));
            inner.in_flight = true;
            shared.emit(SessionEvent::Typing(true));
            (request, inner.state.phase(), inner.voice_mode, inner.generation)
        };

        debug!(
            session_id = %shared.id,
            %phase,
            voice,
            max_tokens = request.max_tokens,
            history = request.history.len(),
            "Dispatching turn"
        );
        let result = match (phase, voice) {
            (Phase::Roleplay, false) => self.validated_turn(request, text).await,
            (Phase::Roleplay, true) => self.streamed_turn(request).await,
            (_, voice) => self.plain_turn(request, phase, voice).await,
        };

        let mut inner = shared.inner.lock().await;
        if inner.generation != generation {
            info!(session_id = %shared.id, "Discarding reply to a turn from an earlier exercise");
            return TurnOutcome::Discarded;
        }
        inner.in_flight = false;
        shared.emit(SessionEvent::Typing(false));

        match result {
            Ok(prepared) => {
                inner.messages.push(prepared.message.clone());
                shared.emit(SessionEvent::MessageAppended(prepared.message.clone()));
                if prepared.scored {
                    if phase == Phase::Roleplay {
                        let matched: Vec<Dimension> = inner.scores.analyze(text);
                        if !matched.is_empty() {
                            debug!(?matched, "DESC dimensions matched");
                            shared.emit(SessionEvent::ScoresChanged(inner.scores));
                        }
                    }
                    inner.state.record_message();
                    shared.emit(SessionEvent::StateChanged(inner.state.clone()));
                }
                let speak = inner.voice_mode;
                drop(inner);

                if let (true, Some((speaker, emotion))) = (speak, prepared.speech) {
                    self.speak_in_background(
                        generation,
                        prepared.message.content.clone(),
                        speaker,
                        emotion,
                    );
                }
                TurnOutcome::Replied(prepared.message)
            }
            Err(e) => {
                let content = match &e {
                    TurnError::Transport(cause) => {
                        error!(session_id = %shared.id, error = ?cause, "Model service unavailable");
                        prompts::UNAVAILABLE_MESSAGE.to_string()
                    }
                    TurnError::InvalidReply { attempts } => {
                        error!(session_id = %shared.id, attempts = attempts.len(), "Model reply stayed invalid");
                        format!("{}\n\n{}", prompts::INVALID_REPLY_MESSAGE, e)
                    }
                };
                let message = Message::system(content);
                inner.messages.push(message.clone());
                shared.emit(SessionEvent::MessageAppended(message.clone()));
                TurnOutcome::Failed(message)
            }
        }
    }

    /// Re-surfaces the coach feedback stored on a message.
    pub async fn show_coach_feedback(&self, message_id: Uuid) -> bool {
        let feedback = {
            let inner = self.shared.inner.lock().await;
            inner
                .messages
                .find(message_id)
                .and_then(|m| m.coach_feedback.clone())
        };
        match feedback {
            Some(feedback) => {
                self.shared.presenter.show_coach_feedback(&feedback);
                true
            }
            None => false,
        }
    }

    /// The conversation as plain text, headed by the current scores.
    pub async fn transcript(&self) -> String {
        let inner = self.shared.inner.lock().await;
        let scores = Dimension::ALL
            .iter()
            .map(|d| format!("{} {:.1}/5", d, inner.scores.get(*d)))
            .collect::<Vec<_>>()
            .join(" | ");
        let mut out = format!(
            "Exercice DESC ({}), scores : {}\n\n",
            inner.state.phase(),
            scores
        );
        for message in inner.messages.as_slice() {
            let author = match message.role {
                MessageRole::User => "Vous",
                MessageRole::Assistant if message.is_thomas => "Thomas",
                MessageRole::Assistant => "Assistant",
            };
            out.push_str(&format!(
                "[{}] {}: {}\n",
                message.timestamp.format("%H:%M:%S"),
                author,
                message.content
            ));
        }
        out
    }

    fn build_request(&self, inner: &Inner, text: &str) -> CompletionRequest {
        let config = &self.shared.config;
        let phase = inner.state.phase();
        let profile = phase.profile(inner.voice_mode);
        let window = if inner.voice_mode {
            config.voice_history_window
        } else {
            config.text_history_window
        };
        CompletionRequest {
            system_prompt: self.shared.prompts.for_phase(phase).to_string(),
            history: inner.messages.recent(window).iter().map(ChatTurn::from).collect(),
            user_text: text.to_string(),
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
        }
    }

    async fn validated_turn(
        &self,
        request: CompletionRequest,
        user_text: &str,
    ) -> Result<PreparedReply, TurnError> {
        let shared = &self.shared;
        let raw = shared.llm.complete(request.clone()).await?;
        let validator = ResponseValidator::new(shared.llm.as_ref(), &shared.config.expected_language);

        let prepared = match validator.validate(raw, user_text, &request).await? {
            ValidatedReply::Accepted(reply) => {
                let feedback = Some(reply.coach_feedback);
                match reply.off_topic_warning.filter(|w| !w.trim().is_empty()) {
                    Some(warning) => {
                        info!(session_id = %shared.id, "Off-topic message");
                        PreparedReply::unscored(
                            Message::ai(warning).off_topic().with_coach_feedback(feedback),
                        )
                    }
                    None => PreparedReply {
                        message: Message::ai(reply.thomas_response)
                            .from_thomas()
                            .with_coach_feedback(feedback),
                        scored: true,
                        speech: None,
                    },
                }
            }
            ValidatedReply::WrongLanguage { language, .. } => {
                warn!(session_id = %shared.id, %language, "Reply flagged another language");
                PreparedReply::unscored(Message::system(prompts::LANGUAGE_NOTICE).language_warning())
            }
        };
        Ok(prepared)
    }

    async fn streamed_turn(&self, request: CompletionRequest) -> Result<PreparedReply, TurnError> {
        let turn = stream::assemble(self.shared.llm.stream(request).await?).await;
        if turn.skipped_chunks > 0 {
            debug!(skipped = turn.skipped_chunks, "Skipped malformed stream chunks");
        }
        if turn.text.trim().is_empty() {
            return Err(TurnError::Transport(anyhow::anyhow!(
                "model stream ended without any text"
            )));
        }

        let prepared = match turn.reply {
            Some(reply) => match reply.off_topic_warning {
                Some(warning) => PreparedReply::unscored(
                    Message::ai(warning)
                        .off_topic()
                        .with_coach_feedback(reply.coach_feedback),
                ),
                None => {
                    let emotion =
                        detect_emotion(&reply.thomas_response, Speaker::Thomas, Phase::Roleplay);
                    PreparedReply {
                        message: Message::ai(reply.thomas_response)
                            .from_thomas()
                            .with_coach_feedback(reply.coach_feedback),
                        scored: true,
                        speech: Some((Speaker::Thomas, emotion)),
                    }
                }
            },
            None => {
                debug!("No structured payload in streamed reply, keeping the raw text");
                PreparedReply {
                    message: Message::ai(turn.text),
                    scored: true,
                    speech: None,
                }
            }
        };
        Ok(prepared)
    }

    async fn plain_turn(
        &self,
        request: CompletionRequest,
        phase: Phase,
        voice: bool,
    ) -> Result<PreparedReply, TurnError> {
        let raw = self.shared.llm.complete(request).await?;
        let content = normalize_plain_text(&raw);
        let speech = voice.then(|| (Speaker::Coach, detect_emotion(&content, Speaker::Coach, phase)));
        Ok(PreparedReply {
            message: Message::ai(content),
            scored: true,
            speech,
        })
    }

    /// Speaks a line of the turn started under `generation`. The line is
    /// dropped if voice mode went off or the exercise moved on meanwhile.
    fn speak_in_background(&self, generation: u64, text: String, speaker: Speaker, emotion: Emotion) {
        let shared = self.shared.clone();
        let speech = tokio::spawn(async move {
            {
                let inner = shared.inner.lock().await;
                if !inner.voice_mode || inner.generation != generation {
                    debug!(?speaker, "Dropping speech of a superseded turn");
                    return;
                }
            }
            match shared.voice.speak_text(&text, speaker, emotion).await {
                Ok(outcome) => debug!(?outcome, ?speaker, "Utterance finished"),
                Err(e) => {
                    warn!(error = %e, ?speaker, "Could not speak reply");
                    shared.presenter.show_notice(Notice::voice_error(&e));
                }
            }
        });
        if let Some(previous) = self.shared.tasks().speech.replace(speech) {
            previous.abort();
        }
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let warning_after = self.shared.config.time_warning_after_seconds;
        tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let tick = {
                    let mut inner = shared.inner.lock().await;
                    let tick = inner.state.tick(warning_after);
                    if tick != Tick::Idle {
                        shared.emit(SessionEvent::StateChanged(inner.state.clone()));
                    }
                    tick
                };
                match tick {
                    Tick::Idle => break,
                    Tick::Counted => {}
                    Tick::TimeWarning => {
                        warn!(session_id = %shared.id, elapsed_seconds = warning_after, "Exercise time is up");
                        shared.presenter.show_notice(Notice::time_warning());
                    }
                }
            }
        })
    }

    fn spawn_follow_up(&self, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.config.follow_up_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut inner = shared.inner.lock().await;
            if inner.generation != generation || inner.state.phase() != Phase::Debrief {
                return;
            }
            let follow_up = Message::system(prompts::DEBRIEF_FOLLOW_UP);
            inner.messages.push(follow_up.clone());
            shared.emit(SessionEvent::MessageAppended(follow_up));
        })
    }

    async fn handle_voice_event(&self, event: VoiceEvent) {
        let shared = &self.shared;
        match event {
            VoiceEvent::Transcript { text, is_final } => {
                if !is_final && !text.trim().is_empty() && shared.voice.is_speaking() {
                    debug!("User spoke over the reply");
                    shared.voice.handle_user_interruption().await;
                }
                shared.emit(SessionEvent::Transcription { text, is_final });
            }
            VoiceEvent::FinalTranscript(text) => {
                if !self.voice_mode().await {
                    return;
                }
                let session = self.clone();
                tokio::spawn(async move {
                    session.submit_user_message(&text).await;
                });
            }
            VoiceEvent::ListeningChanged(listening) => {
                shared.emit(SessionEvent::ListeningChanged(listening));
            }
            VoiceEvent::SpeakingStarted { speaker, emotion } => {
                shared.emit(SessionEvent::SpeakingStarted { speaker, emotion });
            }
            VoiceEvent::SpeakingEnded { speaker, emotion } => {
                shared.emit(SessionEvent::SpeakingEnded { speaker, emotion });
            }
            VoiceEvent::Error(e) => {
                error!(session_id = %shared.id, error = %e, "Voice device error");
                shared.presenter.show_notice(Notice::voice_error(&e));
                if matches!(e, VoiceError::Recognition(_)) {
                    self.disable_voice_mode().await;
                }
            }
        }
    }
}

/// Clears the in-flight flag of a turn that will be discarded.
fn release_turn(shared: &Shared, inner: &mut Inner) {
    if inner.in_flight {
        inner.in_flight = false;
        shared.emit(SessionEvent::Typing(false));
    }
}

async fn pump_voice_events(weak: Weak<Shared>, mut events: mpsc::UnboundedReceiver<VoiceEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        Session { shared }.handle_voice_event(event).await;
    }
}
