//! Browser-backed implementations of the session's voice and presentation seams.
//!
//! Recognition and playback run in the browser; these adapters translate the
//! core traits into `ServerMessage`s and resolve them from the client's replies.

use super::protocol::ServerMessage;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use desc_core::{
    presenter::{Notice, Presenter},
    voice::{AudioOutput, RecognitionEvent, SpeechRecognizer},
};
use std::collections::HashMap;
use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

fn send(outbound: &Outbound, msg: ServerMessage) -> bool {
    outbound.send(msg).is_ok()
}

/// Speech recognition performed by the browser's Web Speech API.
pub struct ClientRecognizer {
    outbound: Outbound,
    supported: bool,
    sink: Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
}

impl ClientRecognizer {
    pub fn new(outbound: Outbound, supported: bool) -> Self {
        Self {
            outbound,
            supported,
            sink: Mutex::new(None),
        }
    }

    /// Forwards a recognition event reported by the client.
    pub fn deliver(&self, event: RecognitionEvent) {
        let sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        match sink.as_ref() {
            Some(tx) if tx.send(event.clone()).is_ok() => {}
            _ => debug!(?event, "Dropping recognition event, recognizer not started"),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ClientRecognizer {
    fn is_available(&self) -> bool {
        self.supported
    }

    async fn start(
        &self,
        locale: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<()> {
        if !self.supported {
            return Err(anyhow!("Speech recognition is not supported by this client"));
        }
        *self.sink.lock().unwrap_or_else(|p| p.into_inner()) = Some(events);
        if !send(
            &self.outbound,
            ServerMessage::StartRecognition {
                locale: locale.to_string(),
            },
        ) {
            return Err(anyhow!("Client connection is closed"));
        }
        Ok(())
    }

    async fn stop(&self) {
        send(&self.outbound, ServerMessage::StopRecognition);
    }
}

/// Plays synthesized clips in the browser, one `audio_chunk` per clip.
pub struct ClientAudioOutput {
    outbound: Outbound,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

/// Forgets the pending playback when `play` resolves or is dropped.
struct PendingGuard<'a> {
    output: &'a ClientAudioOutput,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.output.pending().remove(&self.id);
    }
}

impl ClientAudioOutput {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The client finished playing `playback_id`.
    pub fn playback_ended(&self, playback_id: u64) {
        match self.pending().remove(&playback_id) {
            Some(done) => {
                let _ = done.send(());
            }
            None => debug!(playback_id, "Ignoring end of unknown playback"),
        }
    }
}

#[async_trait]
impl AudioOutput for ClientAudioOutput {
    async fn play(&self, audio: Bytes) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        self.pending().insert(id, done_tx);
        let _guard = PendingGuard { output: self, id };

        let data = base64::engine::general_purpose::STANDARD.encode(&audio);
        if !send(
            &self.outbound,
            ServerMessage::AudioChunk {
                playback_id: id,
                data,
            },
        ) {
            return Err(anyhow!("Client connection is closed"));
        }

        // A halted clip drops its sender, which also counts as the end.
        let _ = done_rx.await;
        Ok(())
    }

    async fn halt(&self) {
        self.pending().clear();
        send(&self.outbound, ServerMessage::StopAudio);
    }
}

/// Shows notices and asks questions through the client.
pub struct WsPresenter {
    outbound: Outbound,
    next_id: AtomicU64,
    confirmations: Mutex<HashMap<u64, oneshot::Sender<bool>>>,
}

impl WsPresenter {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            next_id: AtomicU64::new(1),
            confirmations: Mutex::new(HashMap::new()),
        }
    }

    /// Answers every open question with "no". Called when the client leaves.
    pub fn cancel_pending(&self) {
        let pending: Vec<_> = self
            .confirmations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Cancelling unanswered confirmations");
        }
        for (_, tx) in pending {
            let _ = tx.send(false);
        }
    }

    /// Resolves the question `request_id`. Returns false if nobody is waiting.
    pub fn resolve(&self, request_id: u64, confirmed: bool) -> bool {
        let waiter = self
            .confirmations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&request_id);
        match waiter {
            Some(tx) => tx.send(confirmed).is_ok(),
            None => {
                warn!(request_id, "Confirmation response for unknown request");
                false
            }
        }
    }
}

#[async_trait]
impl Presenter for WsPresenter {
    fn show_notice(&self, notice: Notice) {
        send(
            &self.outbound,
            ServerMessage::Notice {
                title: notice.title,
                message: notice.message,
                icon: notice.icon,
            },
        );
    }

    fn show_coach_feedback(&self, feedback: &str) {
        send(
            &self.outbound,
            ServerMessage::CoachFeedback {
                feedback: feedback.to_string(),
            },
        );
    }

    async fn confirm(&self, title: &str, message: &str) -> bool {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.confirmations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request_id, tx);

        if !send(
            &self.outbound,
            ServerMessage::Confirm {
                request_id,
                title: title.to_string(),
                message: message.to_string(),
            },
        ) {
            self.confirmations
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&request_id);
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn outbound() -> (Outbound, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_recognizer_forwards_events_after_start() {
        let (tx, mut rx) = outbound();
        let recognizer = ClientRecognizer::new(tx, true);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        recognizer.start("fr-FR", events_tx).await.unwrap();
        match rx.recv().await.unwrap() {
            ServerMessage::StartRecognition { locale } => assert_eq!(locale, "fr-FR"),
            other => panic!("unexpected message: {other:?}"),
        }

        recognizer.deliver(RecognitionEvent::Ended);
        assert_eq!(events_rx.recv().await.unwrap(), RecognitionEvent::Ended);

        recognizer.stop().await;
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::StopRecognition));
    }

    #[tokio::test]
    async fn test_unsupported_recognizer_refuses_to_start() {
        let (tx, mut rx) = outbound();
        let recognizer = ClientRecognizer::new(tx, false);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        assert!(!recognizer.is_available());
        assert!(recognizer.start("fr-FR", events_tx).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_play_resolves_when_client_reports_end() {
        let (tx, mut rx) = outbound();
        let output = Arc::new(ClientAudioOutput::new(tx));

        let player = output.clone();
        let playing = tokio::spawn(async move { player.play(Bytes::from_static(b"ID3")).await });

        let playback_id = match rx.recv().await.unwrap() {
            ServerMessage::AudioChunk { playback_id, data } => {
                assert_eq!(data, "SUQz");
                playback_id
            }
            other => panic!("unexpected message: {other:?}"),
        };
        output.playback_ended(playback_id);

        tokio::time::timeout(Duration::from_secs(1), playing)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(output.pending().is_empty());
    }

    #[tokio::test]
    async fn test_halt_releases_pending_playback() {
        let (tx, mut rx) = outbound();
        let output = Arc::new(ClientAudioOutput::new(tx));

        let player = output.clone();
        let playing = tokio::spawn(async move { player.play(Bytes::from_static(b"mp3")).await });
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::AudioChunk { .. }));

        output.halt().await;
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::StopAudio));
        tokio::time::timeout(Duration::from_secs(1), playing)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_play_forgets_pending_entry() {
        let (tx, _rx) = outbound();
        let output = ClientAudioOutput::new(tx);

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            output.play(Bytes::from_static(b"mp3")),
        )
        .await;
        assert!(result.is_err());
        assert!(output.pending().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_round_trip() {
        let (tx, mut rx) = outbound();
        let presenter = Arc::new(WsPresenter::new(tx));

        let asker = presenter.clone();
        let answer = tokio::spawn(async move { asker.confirm("Recommencer", "Sûr ?").await });

        let request_id = match rx.recv().await.unwrap() {
            ServerMessage::Confirm {
                request_id, title, ..
            } => {
                assert_eq!(title, "Recommencer");
                request_id
            }
            other => panic!("unexpected message: {other:?}"),
        };
        assert!(presenter.resolve(request_id, true));
        assert!(answer.await.unwrap());
        assert!(!presenter.resolve(request_id, true));
    }

    #[tokio::test]
    async fn test_cancel_pending_answers_open_questions() {
        let (tx, mut rx) = outbound();
        let presenter = Arc::new(WsPresenter::new(tx));

        let asker = presenter.clone();
        let answer = tokio::spawn(async move { asker.confirm("Recommencer", "Sûr ?").await });
        let request_id = match rx.recv().await.unwrap() {
            ServerMessage::Confirm { request_id, .. } => request_id,
            other => panic!("unexpected message: {other:?}"),
        };

        presenter.cancel_pending();
        let confirmed = tokio::time::timeout(Duration::from_secs(1), answer)
            .await
            .unwrap()
            .unwrap();
        assert!(!confirmed);
        assert!(!presenter.resolve(request_id, true));
    }

    #[tokio::test]
    async fn test_confirm_is_false_when_client_is_gone() {
        let (tx, rx) = outbound();
        drop(rx);
        let presenter = WsPresenter::new(tx);
        assert!(!presenter.confirm("Recommencer", "Sûr ?").await);
    }

    #[test]
    fn test_notice_is_forwarded() {
        let (tx, mut rx) = outbound();
        let presenter = WsPresenter::new(tx);
        presenter.show_notice(Notice::time_warning());
        match rx.try_recv().unwrap() {
            ServerMessage::Notice { title, .. } => assert_eq!(title, "Temps écoulé"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
