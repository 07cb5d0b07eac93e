//! Manages the WebSocket connection lifecycle of a DESC exercise session.

use super::{
    bridge::{ClientAudioOutput, ClientRecognizer, Outbound, WsPresenter},
    protocol::{ClientMessage, ServerMessage},
};
use crate::state::AppState;
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use desc_core::{
    Session, SessionParts, TurnOutcome,
    voice::{RecognitionError, RecognitionEvent},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Client capabilities announced by the `init` message.
struct InitOptions {
    stt_supported: bool,
    voice_on_start: bool,
}

/// The browser-side collaborators of one session.
struct ClientAdapters {
    recognizer: Arc<ClientRecognizer>,
    audio: Arc<ClientAudioOutput>,
    presenter: Arc<WsPresenter>,
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake, builds the session around browser-backed
/// adapters and then runs the session loop until the client leaves.
#[instrument(name = "ws_connection", skip_all)]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting initialization...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be an `init` message.
    let options = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let options = match options {
        Ok(options) => options,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let adapters = ClientAdapters {
        recognizer: Arc::new(ClientRecognizer::new(outbound.clone(), options.stt_supported)),
        audio: Arc::new(ClientAudioOutput::new(outbound.clone())),
        presenter: Arc::new(WsPresenter::new(outbound.clone())),
    };
    let parts = SessionParts {
        llm: state.llm_client.clone(),
        prompts: state.prompts.as_ref().clone(),
        recognizer: adapters.recognizer.clone(),
        synthesizer: state.synthesizer.clone(),
        audio: adapters.audio.clone(),
        presenter: adapters.presenter.clone(),
    };
    let mut session_config = state.session_config();
    session_config.voice_on_start = options.voice_on_start;
    let (session, events) = Session::new(parts, session_config);
    let session_id = session.id();

    // Send the `Initialized` message to the client to confirm success.
    let snapshot = session.snapshot().await;
    let initialized = ServerMessage::initialized(
        session_id,
        snapshot.state,
        snapshot.scores,
        snapshot.messages,
        session.voice_support(),
    );
    if send_msg(&mut socket_tx, initialized).await.is_err() {
        error!("Failed to send Initialized message to client.");
        return;
    }

    state.sessions.insert(session.clone()).await;

    let session_span = tracing::info_span!("desc_session", %session_id);
    async move {
        info!(
            stt_supported = options.stt_supported,
            voice_on_start = options.voice_on_start,
            "Session initialized"
        );
        if let Err(e) = run_session(
            &session,
            &adapters,
            outbound,
            outbound_rx,
            events,
            socket_tx,
            socket_rx,
        )
        .await
        {
            error!(error = ?e, "Session terminated with error.");
        }
        adapters.presenter.cancel_pending();
        session.disable_voice_mode().await;
        state.sessions.remove(session_id).await;
        info!("Session finished.");
    }
    .instrument(session_span)
    .await;
}

fn parse_init(text: &str) -> Result<InitOptions> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Init {
            stt_supported,
            voice_on_start,
        } => Ok(InitOptions {
            stt_supported,
            voice_on_start,
        }),
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// The main event loop for an active WebSocket session.
///
/// A writer task owns the socket sink and a forwarder task turns session
/// events into server messages, so the read loop below only dispatches.
async fn run_session(
    session: &Session,
    adapters: &ClientAdapters,
    outbound: Outbound,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut events: mpsc::UnboundedReceiver<desc_core::SessionEvent>,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    let writer = tokio::spawn(
        async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = send_msg(&mut socket_tx, msg).await {
                    warn!(error = %e, "Failed to write to client WebSocket");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let forward_tx = outbound.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if forward_tx.send(ServerMessage::from(event)).is_err() {
                break;
            }
        }
    });

    let result = read_loop(session, adapters, &outbound, &mut socket_rx).await;

    // Clean up background tasks on exit.
    forwarder.abort();
    writer.abort();
    info!("WebSocket connection closed.");
    result
}

async fn read_loop(
    session: &Session,
    adapters: &ClientAdapters,
    outbound: &Outbound,
    socket_rx: &mut SplitStream<WebSocket>,
) -> Result<()> {
    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(session, adapters, outbound, msg).await,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed client message");
                    let _ = outbound.send(ServerMessage::Error {
                        message: format!("Invalid message: {e}"),
                    });
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Ok(Message::Binary(_)) => warn!("Ignoring unexpected binary message."),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                return Err(anyhow!("Error receiving from client WebSocket: {e}"));
            }
        }
    }
    Ok(())
}

/// Dispatches one client command. Anything that may wait on a later client
/// message (model turns, confirmations) runs in its own task.
async fn handle_client_message(
    session: &Session,
    adapters: &ClientAdapters,
    outbound: &Outbound,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Init { .. } => warn!("Ignoring repeated `init` message."),
        ClientMessage::UserMessage { text } => {
            let session = session.clone();
            tokio::spawn(
                async move {
                    match session.submit_user_message(&text).await {
                        TurnOutcome::Rejected(reason) => debug!(%reason, "User message rejected"),
                        TurnOutcome::Discarded => debug!("Stale reply discarded"),
                        TurnOutcome::Replied(_) | TurnOutcome::Failed(_) => {}
                    }
                }
                .in_current_span(),
            );
        }
        ClientMessage::StartExercise => {
            if let Err(e) = session.start_exercise().await {
                warn!(error = %e, "Cannot start exercise");
                let _ = outbound.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
        ClientMessage::EndExercise => {
            if let Err(e) = session.end_exercise().await {
                warn!(error = %e, "Cannot end exercise");
                let _ = outbound.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
        ClientMessage::ResetExercise { confirm: false } => session.reset_exercise().await,
        ClientMessage::ResetExercise { confirm: true } => {
            let session = session.clone();
            tokio::spawn(
                async move {
                    session.request_reset().await;
                }
                .in_current_span(),
            );
        }
        ClientMessage::SetVoiceEnabled { enabled: true } => {
            session.enable_voice_mode().await;
        }
        ClientMessage::SetVoiceEnabled { enabled: false } => session.disable_voice_mode().await,
        ClientMessage::Transcript { text, is_final } => adapters
            .recognizer
            .deliver(RecognitionEvent::Transcript { text, is_final }),
        ClientMessage::RecognitionError { code } => adapters
            .recognizer
            .deliver(RecognitionEvent::Error(RecognitionError::from_code(&code))),
        ClientMessage::RecognitionEnded => adapters.recognizer.deliver(RecognitionEvent::Ended),
        ClientMessage::PlaybackEnded { playback_id } => {
            adapters.audio.playback_ended(playback_id)
        }
        ClientMessage::ConfirmResponse {
            request_id,
            confirmed,
        } => {
            adapters.presenter.resolve(request_id, confirmed);
        }
        ClientMessage::ShowCoachFeedback { message_id } => {
            if !session.show_coach_feedback(message_id).await {
                debug!(%message_id, "No coach feedback for message");
            }
        }
        ClientMessage::RequestTranscript => {
            let text = session.transcript().await;
            let _ = outbound.send(ServerMessage::Transcript { text });
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_init_reads_capabilities() {
        let options =
            parse_init(r#"{"type": "init", "stt_supported": true, "voice_on_start": true}"#)
                .unwrap();
        assert!(options.stt_supported);
        assert!(options.voice_on_start);
    }

    #[test]
    fn test_parse_init_rejects_other_messages() {
        let err = parse_init(r#"{"type": "start_exercise"}"#).err().unwrap();
        assert_eq!(err.to_string(), "First message must be `init`");
        assert!(parse_init("not json").is_err());
    }
}
