//! Voice Bridge
//!
//! Wraps a speech-recognition provider, a speech-synthesis provider and an
//! audio output behind one adapter. Provider callbacks are normalised into
//! [`VoiceEvent`]s delivered on a channel: each final transcript and each end
//! of playback is delivered exactly once.
//!
//! At most one utterance plays at a time. Starting a new one, or calling
//! [`VoiceBridge::stop_speaking`], cancels the current one; the cancelled
//! playback future is dropped, which releases its audio.

use crate::tts::SynthesisError;
use crate::voices::{Emotion, Speaker, VoicePreset};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay before the recognizer is restarted after it ended on its own.
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Error conditions reported by a speech-recognition provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("microphone permission denied")]
    NotAllowed,
    #[error("no microphone available")]
    AudioCapture,
    #[error("recognition network failure")]
    Network,
    #[error("recognition aborted")]
    Aborted,
    #[error("recognition error: {0}")]
    Other(String),
}

impl RecognitionError {
    /// Maps a Web Speech API error code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => RecognitionError::NoSpeech,
            "not-allowed" | "service-not-allowed" => RecognitionError::NotAllowed,
            "audio-capture" => RecognitionError::AudioCapture,
            "network" => RecognitionError::Network,
            "aborted" => RecognitionError::Aborted,
            other => RecognitionError::Other(other.to_string()),
        }
    }

    /// Transient conditions keep the recognizer running.
    pub fn is_transient(&self) -> bool {
        matches!(self, RecognitionError::NoSpeech)
    }
}

/// Raw events emitted by a recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Started,
    Transcript { text: String, is_final: bool },
    Error(RecognitionError),
    /// The provider stopped on its own.
    Ended,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Starts continuous recognition with interim results in `locale`.
    async fn start(
        &self,
        locale: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> anyhow::Result<()>;

    async fn stop(&self);
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn is_available(&self) -> bool;

    async fn synthesize(&self, text: &str, preset: &VoicePreset) -> Result<Bytes, SynthesisError>;
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Plays a clip and resolves once it ended on its own. Dropping the
    /// returned future must stop the clip.
    async fn play(&self, audio: Bytes) -> anyhow::Result<()>;

    /// Immediately silences the device.
    async fn halt(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("voice features unavailable (recognition: {stt}, synthesis: {tts})")]
    Unsupported { stt: bool, tts: bool },
    #[error(transparent)]
    Recognition(RecognitionError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("audio playback failed: {0}")]
    Playback(String),
}

/// Normalised events published by the bridge.
#[derive(Debug)]
pub enum VoiceEvent {
    /// Interim or final text, for live display.
    Transcript { text: String, is_final: bool },
    /// A trimmed, non-empty final utterance, ready to be submitted.
    FinalTranscript(String),
    ListeningChanged(bool),
    SpeakingStarted { speaker: Speaker, emotion: Emotion },
    SpeakingEnded { speaker: Speaker, emotion: Emotion },
    Error(VoiceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Playback reached its natural end.
    Completed,
    Interrupted,
    /// Nothing to say.
    Skipped,
}

/// Which voice capabilities the environment offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSupport {
    pub stt: bool,
    pub tts: bool,
}

impl VoiceSupport {
    pub fn full(&self) -> bool {
        self.stt && self.tts
    }
}

struct ActivePlayback {
    id: u64,
    cancel: oneshot::Sender<()>,
    speaker: Speaker,
    emotion: Emotion,
}

#[derive(Default)]
struct BridgeState {
    listening: bool,
    pump: Option<JoinHandle<()>>,
    playback: Option<ActivePlayback>,
}

pub struct VoiceBridge {
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    locale: String,
    events: mpsc::UnboundedSender<VoiceEvent>,
    state: Arc<Mutex<BridgeState>>,
    next_playback: AtomicU64,
}

impl VoiceBridge {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        locale: impl Into<String>,
        events: mpsc::UnboundedSender<VoiceEvent>,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            output,
            locale: locale.into(),
            events,
            state: Arc::new(Mutex::new(BridgeState::default())),
            next_playback: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        lock_state(&self.state)
    }

    fn emit(&self, event: VoiceEvent) {
        let _ = self.events.send(event);
    }

    pub fn support(&self) -> VoiceSupport {
        VoiceSupport {
            stt: self.recognizer.is_available(),
            tts: self.synthesizer.is_available(),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock().listening
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().playback.is_some()
    }

    /// Starts continuous recognition. Returns `Ok(false)` when already listening.
    pub async fn start_listening(&self) -> Result<bool, VoiceError> {
        if !self.recognizer.is_available() {
            return Err(VoiceError::Unsupported {
                stt: false,
                tts: self.synthesizer.is_available(),
            });
        }
        {
            let mut state = self.lock();
            if state.listening {
                return Ok(false);
            }
            state.listening = true;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.recognizer.start(&self.locale, tx.clone()).await {
            error!(error = ?e, "Failed to start speech recognition");
            self.lock().listening = false;
            return Err(VoiceError::Recognition(RecognitionError::Other(e.to_string())));
        }

        let pump = tokio::spawn(pump_recognition(
            rx,
            tx,
            self.recognizer.clone(),
            self.locale.clone(),
            self.state.clone(),
            self.events.clone(),
        ));
        {
            let mut state = self.lock();
            if let Some(previous) = state.pump.replace(pump) {
                previous.abort();
            }
        }
        info!(locale = %self.locale, "Listening started");
        self.emit(VoiceEvent::ListeningChanged(true));
        Ok(true)
    }

    /// Stops recognition. Safe to call when not listening.
    pub async fn stop_listening(&self) {
        let pump = {
            let mut state = self.lock();
            if !state.listening && state.pump.is_none() {
                return;
            }
            state.listening = false;
            state.pump.take()
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        self.recognizer.stop().await;
        info!("Listening stopped");
        self.emit(VoiceEvent::ListeningChanged(false));
    }

    /// Speaks `text` with the voice of `speaker`, cancelling whatever was playing.
    ///
    /// Resolves with [`SpeakOutcome::Interrupted`] when stopped before the end.
    pub async fn speak_text(
        &self,
        text: &str,
        speaker: Speaker,
        emotion: Emotion,
    ) -> Result<SpeakOutcome, VoiceError> {
        if text.trim().is_empty() {
            return Ok(SpeakOutcome::Skipped);
        }
        self.stop_speaking().await;

        let preset = speaker.preset(emotion);
        let id = self.next_playback.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.lock().playback = Some(ActivePlayback {
            id,
            cancel: cancel_tx,
            speaker,
            emotion: preset.emotion,
        });
        debug!(?speaker, emotion = ?preset.emotion, "Speaking");
        self.emit(VoiceEvent::SpeakingStarted {
            speaker,
            emotion: preset.emotion,
        });
        // Releases the slot even when this future is dropped mid-playback.
        let _slot = PlaybackSlot { bridge: self, id };

        let playback = async {
            let audio = self.synthesizer.synthesize(text, &preset).await?;
            self.output
                .play(audio)
                .await
                .map_err(|e| VoiceError::Playback(e.to_string()))
        };
        let result = tokio::select! {
            biased;
            _ = cancel_rx => Ok(SpeakOutcome::Interrupted),
            played = playback => played.map(|_| SpeakOutcome::Completed),
        };

        if let Err(e) = &result {
            warn!(error = %e, "Speech playback failed");
        }
        result
    }

    /// Halts the current utterance, if any.
    pub async fn stop_speaking(&self) {
        let active = self.lock().playback.take();
        if let Some(active) = active {
            let _ = active.cancel.send(());
            self.output.halt().await;
            debug!("Speech interrupted");
            self.emit(VoiceEvent::SpeakingEnded {
                speaker: active.speaker,
                emotion: active.emotion,
            });
        }
    }

    /// The user started talking over the system: stop the utterance and make
    /// sure recognition is running again. Returns whether anything was playing.
    pub async fn handle_user_interruption(&self) -> bool {
        if !self.is_speaking() {
            return false;
        }
        self.stop_speaking().await;
        if !self.is_listening() {
            if let Err(e) = self.start_listening().await {
                warn!(error = %e, "Could not resume listening after interruption");
            }
        }
        true
    }
}

impl Drop for VoiceBridge {
    fn drop(&mut self) {
        if let Some(pump) = self.lock().pump.take() {
            pump.abort();
        }
    }
}

/// Owned by `speak_text`. `SpeakingEnded` is emitted by whoever clears the
/// slot, so a superseded utterance never ends after its successor started.
struct PlaybackSlot<'a> {
    bridge: &'a VoiceBridge,
    id: u64,
}

impl Drop for PlaybackSlot<'_> {
    fn drop(&mut self) {
        let finished = {
            let mut state = self.bridge.lock();
            match &state.playback {
                Some(active) if active.id == self.id => state.playback.take(),
                _ => None,
            }
        };
        if let Some(active) = finished {
            self.bridge.emit(VoiceEvent::SpeakingEnded {
                speaker: active.speaker,
                emotion: active.emotion,
            });
        }
    }
}

fn lock_state(state: &Mutex<BridgeState>) -> MutexGuard<'_, BridgeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turns raw recognizer events into bridge events until listening stops.
async fn pump_recognition(
    mut rx: mpsc::UnboundedReceiver<RecognitionEvent>,
    tx: mpsc::UnboundedSender<RecognitionEvent>,
    recognizer: Arc<dyn SpeechRecognizer>,
    locale: String,
    state: Arc<Mutex<BridgeState>>,
    events: mpsc::UnboundedSender<VoiceEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            RecognitionEvent::Started => debug!("Recognizer started"),
            RecognitionEvent::Transcript { text, is_final } => {
                let _ = events.send(VoiceEvent::Transcript {
                    text: text.clone(),
                    is_final,
                });
                let trimmed = text.trim();
                if is_final && !trimmed.is_empty() {
                    let _ = events.send(VoiceEvent::FinalTranscript(trimmed.to_string()));
                }
            }
            RecognitionEvent::Error(e) if e.is_transient() => {
                warn!(error = %e, "No speech detected, still listening");
            }
            RecognitionEvent::Error(e) => {
                error!(error = %e, "Speech recognition failed");
                {
                    let mut guard = lock_state(&state);
                    guard.listening = false;
                    guard.pump = None;
                }
                recognizer.stop().await;
                let _ = events.send(VoiceEvent::ListeningChanged(false));
                let _ = events.send(VoiceEvent::Error(VoiceError::Recognition(e)));
                return;
            }
            RecognitionEvent::Ended => {
                tokio::time::sleep(RESTART_DELAY).await;
                if !lock_state(&state).listening {
                    return;
                }
                debug!("Recognizer ended on its own, restarting");
                if let Err(e) = recognizer.start(&locale, tx.clone()).await {
                    error!(error = ?e, "Failed to restart speech recognition");
                    {
                        let mut guard = lock_state(&state);
                        guard.listening = false;
                        guard.pump = None;
                    }
                    let _ = events.send(VoiceEvent::ListeningChanged(false));
                    let _ = events.send(VoiceEvent::Error(VoiceError::Recognition(
                        RecognitionError::Other(e.to_string()),
                    )));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory providers shared by the voice and session tests.

    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    pub struct FakeRecognizer {
        pub unavailable: bool,
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        sender: Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
    }

    impl FakeRecognizer {
        pub fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Default::default()
            }
        }

        pub fn emit(&self, event: RecognitionEvent) {
            if let Some(tx) = self.sender.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    #[async_trait]
    impl SpeechRecognizer for FakeRecognizer {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        async fn start(
            &self,
            _locale: &str,
            events: mpsc::UnboundedSender<RecognitionEvent>,
        ) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.sender.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Plays instantly, or blocks until halted when `blocking` is set.
    #[derive(Default)]
    pub struct FakeOutput {
        pub blocking: bool,
        pub plays: AtomicUsize,
        pub halts: AtomicUsize,
        pub started: Notify,
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        async fn play(&self, _audio: Bytes) -> anyhow::Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if self.blocking {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn halt(&self) {
            self.halts.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Synthesizer that returns a tiny clip and counts its calls.
    #[derive(Default)]
    pub struct FakeSynthesizer {
        pub unavailable: bool,
        pub calls: Mutex<Vec<(String, Speaker, Emotion)>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        async fn synthesize(
            &self,
            text: &str,
            preset: &VoicePreset,
        ) -> Result<Bytes, SynthesisError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), preset.speaker, preset.emotion));
            Ok(Bytes::from_static(b"ID3"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeOutput, FakeRecognizer, FakeSynthesizer};
    use super::*;
    use tokio::time::timeout;

    struct Harness {
        bridge: Arc<VoiceBridge>,
        recognizer: Arc<FakeRecognizer>,
        output: Arc<FakeOutput>,
        events: mpsc::UnboundedReceiver<VoiceEvent>,
    }

    fn harness(output: FakeOutput) -> Harness {
        harness_with(FakeRecognizer::default(), Arc::new(FakeSynthesizer::default()), output)
    }

    fn harness_with(
        recognizer: FakeRecognizer,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: FakeOutput,
    ) -> Harness {
        let recognizer = Arc::new(recognizer);
        let output = Arc::new(output);
        let (tx, events) = mpsc::unbounded_channel();
        let bridge = Arc::new(VoiceBridge::new(
            recognizer.clone(),
            synthesizer,
            output.clone(),
            "fr-FR",
            tx,
        ));
        Harness {
            bridge,
            recognizer,
            output,
            events,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<VoiceEvent>) -> VoiceEvent {
        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event should arrive")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_start_listening_is_idempotent() {
        let mut h = harness(FakeOutput::default());

        assert!(h.bridge.start_listening().await.unwrap());
        assert!(!h.bridge.start_listening().await.unwrap());
        assert!(h.bridge.is_listening());
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::ListeningChanged(true)
        ));
    }

    #[tokio::test]
    async fn test_stop_listening_is_idempotent() {
        let h = harness(FakeOutput::default());
        h.bridge.stop_listening().await;
        assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 0);

        h.bridge.start_listening().await.unwrap();
        h.bridge.stop_listening().await;
        h.bridge.stop_listening().await;
        assert!(!h.bridge.is_listening());
        assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_final_transcript_is_trimmed_and_delivered_once() {
        let mut h = harness(FakeOutput::default());
        h.bridge.start_listening().await.unwrap();
        next_event(&mut h.events).await;

        h.recognizer.emit(RecognitionEvent::Transcript {
            text: "Tu es".to_string(),
            is_final: false,
        });
        h.recognizer.emit(RecognitionEvent::Transcript {
            text: "  Tu es en retard  ".to_string(),
            is_final: true,
        });

        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::Transcript { is_final: false, .. }
        ));
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::Transcript { is_final: true, .. }
        ));
        match next_event(&mut h.events).await {
            VoiceEvent::FinalTranscript(text) => assert_eq!(text, "Tu es en retard"),
            other => panic!("Expected FinalTranscript, got {:?}", other),
        }
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_speech_keeps_listening() {
        let mut h = harness(FakeOutput::default());
        h.bridge.start_listening().await.unwrap();
        next_event(&mut h.events).await;

        h.recognizer
            .emit(RecognitionEvent::Error(RecognitionError::from_code("no-speech")));
        h.recognizer.emit(RecognitionEvent::Transcript {
            text: "encore là".to_string(),
            is_final: true,
        });

        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::Transcript { .. }
        ));
        assert!(h.bridge.is_listening());
    }

    #[tokio::test]
    async fn test_permission_error_stops_and_surfaces() {
        let mut h = harness(FakeOutput::default());
        h.bridge.start_listening().await.unwrap();
        next_event(&mut h.events).await;

        h.recognizer
            .emit(RecognitionEvent::Error(RecognitionError::from_code("not-allowed")));

        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::ListeningChanged(false)
        ));
        match next_event(&mut h.events).await {
            VoiceEvent::Error(VoiceError::Recognition(e)) => {
                assert_eq!(e, RecognitionError::NotAllowed)
            }
            other => panic!("Expected recognition error, got {:?}", other),
        }
        assert!(!h.bridge.is_listening());
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognizer_restarts_after_spontaneous_end() {
        let h = harness(FakeOutput::default());
        h.bridge.start_listening().await.unwrap();

        h.recognizer.emit(RecognitionEvent::Ended);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
        assert!(h.bridge.is_listening());
    }

    #[tokio::test]
    async fn test_speak_text_completes() {
        let mut h = harness(FakeOutput::default());
        let outcome = h
            .bridge
            .speak_text("Salut", Speaker::Thomas, Emotion::Casual)
            .await
            .unwrap();

        assert_eq!(outcome, SpeakOutcome::Completed);
        assert!(!h.bridge.is_speaking());
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::SpeakingStarted { speaker: Speaker::Thomas, .. }
        ));
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::SpeakingEnded { speaker: Speaker::Thomas, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_text_is_skipped() {
        let h = harness(FakeOutput::default());
        let outcome = h
            .bridge
            .speak_text("   ", Speaker::Coach, Emotion::Supportive)
            .await
            .unwrap();
        assert_eq!(outcome, SpeakOutcome::Skipped);
        assert_eq!(h.output.plays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_speaking_interrupts_playback() {
        let h = harness(FakeOutput {
            blocking: true,
            ..Default::default()
        });

        let bridge = h.bridge.clone();
        let speaking = tokio::spawn(async move {
            bridge
                .speak_text("Je t'explique", Speaker::Thomas, Emotion::Defensive)
                .await
        });
        h.output.started.notified().await;
        assert!(h.bridge.is_speaking());

        h.bridge.stop_speaking().await;
        let outcome = speaking.await.unwrap().unwrap();
        assert_eq!(outcome, SpeakOutcome::Interrupted);
        assert!(!h.bridge.is_speaking());
        assert_eq!(h.output.halts.load(Ordering::SeqCst), 1);

        // Nothing playing any more: stopping again is a no-op.
        h.bridge.stop_speaking().await;
        assert_eq!(h.output.halts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_utterance_cancels_previous_one() {
        let h = harness(FakeOutput {
            blocking: true,
            ..Default::default()
        });

        let bridge = h.bridge.clone();
        let first = tokio::spawn(async move {
            bridge
                .speak_text("Première", Speaker::Thomas, Emotion::Casual)
                .await
        });
        h.output.started.notified().await;

        let bridge = h.bridge.clone();
        let second = tokio::spawn(async move {
            bridge
                .speak_text("Seconde", Speaker::Thomas, Emotion::Casual)
                .await
        });
        assert_eq!(first.await.unwrap().unwrap(), SpeakOutcome::Interrupted);

        h.output.started.notified().await;
        assert!(h.bridge.is_speaking());
        h.bridge.stop_speaking().await;
        assert_eq!(second.await.unwrap().unwrap(), SpeakOutcome::Interrupted);
    }

    #[tokio::test]
    async fn test_superseded_utterance_ends_before_successor_starts() {
        let mut h = harness(FakeOutput {
            blocking: true,
            ..Default::default()
        });

        let bridge = h.bridge.clone();
        let first = tokio::spawn(async move {
            bridge
                .speak_text("Première", Speaker::Thomas, Emotion::Casual)
                .await
        });
        h.output.started.notified().await;
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::SpeakingStarted { emotion: Emotion::Casual, .. }
        ));

        let bridge = h.bridge.clone();
        let second = tokio::spawn(async move {
            bridge
                .speak_text("Pardon", Speaker::Thomas, Emotion::Apologetic)
                .await
        });
        assert_eq!(first.await.unwrap().unwrap(), SpeakOutcome::Interrupted);
        h.output.started.notified().await;

        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::SpeakingEnded { emotion: Emotion::Casual, .. }
        ));
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::SpeakingStarted { emotion: Emotion::Apologetic, .. }
        ));

        h.bridge.stop_speaking().await;
        assert_eq!(second.await.unwrap().unwrap(), SpeakOutcome::Interrupted);
        assert!(matches!(
            next_event(&mut h.events).await,
            VoiceEvent::SpeakingEnded { emotion: Emotion::Apologetic, .. }
        ));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_user_interruption_resumes_listening() {
        let h = harness(FakeOutput {
            blocking: true,
            ..Default::default()
        });
        assert!(!h.bridge.handle_user_interruption().await);

        let bridge = h.bridge.clone();
        let speaking = tokio::spawn(async move {
            bridge
                .speak_text("Attends", Speaker::Thomas, Emotion::Casual)
                .await
        });
        h.output.started.notified().await;

        assert!(h.bridge.handle_user_interruption().await);
        assert_eq!(speaking.await.unwrap().unwrap(), SpeakOutcome::Interrupted);
        assert!(h.bridge.is_listening());
    }

    #[tokio::test]
    async fn test_synthesis_error_is_reported() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer.expect_is_available().return_const(true);
        synthesizer
            .expect_synthesize()
            .times(1)
            .returning(|_, _| Err(SynthesisError::RateLimited));
        let h = harness_with(
            FakeRecognizer::default(),
            Arc::new(synthesizer),
            FakeOutput::default(),
        );

        let err = h
            .bridge
            .speak_text("Salut", Speaker::Thomas, Emotion::Casual)
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Synthesis(SynthesisError::RateLimited)));
        assert!(!h.bridge.is_speaking());
        assert_eq!(h.output.plays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capability_detection() {
        let h = harness_with(
            FakeRecognizer::unavailable(),
            Arc::new(FakeSynthesizer::default()),
            FakeOutput::default(),
        );
        let support = h.bridge.support();
        assert!(!support.stt);
        assert!(support.tts);
        assert!(!support.full());
        assert!(matches!(
            h.bridge.start_listening().await,
            Err(VoiceError::Unsupported { stt: false, tts: true })
        ));
    }
}
