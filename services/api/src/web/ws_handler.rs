//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a dictation WebSocket.
//! It manages the session's state machine and delegates generation to a task.

use crate::web::{
    generation_task::{generation_process, GenerationRequest},
    protocol::{send_message, ClientMessage, ServerMessage, WsSender},
    state::{AppState, SessionMode, SessionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use dictanote_core::domain::{AuthContext, Dictation, DraftState, DraftStep};
use futures::StreamExt;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, auth))
}

async fn report(ws_sender: &WsSender, message: &str) {
    let msg = ServerMessage::Error {
        message: message.to_string(),
    };
    if let Err(e) = send_message(ws_sender, &msg).await {
        warn!("Failed to send error message: {}", e);
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, auth: AuthContext) {
    let account_id = auth.account_id;
    info!(account_id = %account_id, "New WebSocket connection established");

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let subject_id = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => {
            match serde_json::from_str::<ClientMessage>(&init_json) {
                Ok(ClientMessage::Init { subject_id }) => subject_id,
                _ => {
                    error!("First message was not a valid Init message.");
                    report(&ws_sender, "The session must start with an init message.").await;
                    return;
                }
            }
        }
        _ => {
            info!("Client disconnected before sending Init message.");
            return;
        }
    };

    let session_state_lock = match SessionState::new(&app_state, auth, subject_id).await {
        Ok(state) => Arc::new(Mutex::new(state)),
        Err(e) => {
            warn!(subject_id = %subject_id, error = %e, "Failed to open dictation session");
            report(&ws_sender, "This person could not be loaded.").await;
            return;
        }
    };

    if send_message(&ws_sender, &ServerMessage::SessionInitialized { subject_id })
        .await
        .is_err()
    {
        error!("Failed to send session initialized message.");
        return;
    }

    let drafts = session_state_lock.lock().await.drafts.clone();
    if let Some(draft) = drafts.load().await {
        let msg = ServerMessage::DraftAvailable {
            saved_at: draft.saved_at,
            draft: draft.state,
        };
        if send_message(&ws_sender, &msg).await.is_err() {
            return;
        }
    }

    // --- 2. Main Message Loop ---
    let mut generation_task_handle: Option<JoinHandle<()>> = None;
    let max_audio_bytes = app_state.config.max_audio_bytes;

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                handle_text_message(
                    text.as_str(),
                    &app_state,
                    &session_state_lock,
                    &ws_sender,
                    &mut generation_task_handle,
                )
                .await;
            }
            Some(Ok(Message::Binary(data))) => {
                let mut session = session_state_lock.lock().await;
                if session.current_mode == SessionMode::Recording {
                    session.push_audio(&data, max_audio_bytes);
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    // Disconnecting mid-generation counts as a cancel: nothing more is written.
    session_state_lock.lock().await.cancellation_token.cancel();
    if let Some(handle) = generation_task_handle {
        handle.abort();
    }
    drafts.flush().await;
    info!(account_id = %account_id, "WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<SessionState>>,
    ws_sender: &WsSender,
    generation_task_handle: &mut Option<JoinHandle<()>>,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            report(ws_sender, "Unrecognized message.").await;
            return;
        }
    };

    match client_msg {
        ClientMessage::DictationStarted => {
            let mut session = session_state_lock.lock().await;
            if session.current_mode == SessionMode::Generating {
                drop(session);
                report(ws_sender, "A note is already being generated.").await;
                return;
            }
            session.current_mode = SessionMode::Recording;
            session.audio_buffer.clear();
            let state = DraftState {
                subject_id: Some(session.subject.id),
                transcript: None,
                generated_text: None,
                step: DraftStep::Recording,
            };
            let drafts = session.drafts.clone();
            drop(session);
            drafts.save(state).await;
        }
        ClientMessage::DictationEnded { template, examples } => {
            let data = {
                let mut session = session_state_lock.lock().await;
                if session.current_mode != SessionMode::Recording {
                    drop(session);
                    report(ws_sender, "No dictation is being recorded.").await;
                    return;
                }
                std::mem::take(&mut session.audio_buffer)
            };
            start_generation(
                app_state,
                session_state_lock,
                ws_sender,
                generation_task_handle,
                GenerationRequest {
                    dictation: Dictation::Audio { data },
                    template,
                    examples,
                },
            )
            .await;
        }
        ClientMessage::SubmitText {
            transcript,
            template,
            examples,
        } => {
            if session_state_lock.lock().await.current_mode == SessionMode::Generating {
                report(ws_sender, "A note is already being generated.").await;
                return;
            }
            start_generation(
                app_state,
                session_state_lock,
                ws_sender,
                generation_task_handle,
                GenerationRequest {
                    dictation: Dictation::Text(transcript),
                    template,
                    examples,
                },
            )
            .await;
        }
        ClientMessage::Cancel => {
            info!("Cancel message received.");
            let previous = {
                let mut session = session_state_lock.lock().await;
                session.cancellation_token.cancel();
                session.audio_buffer.clear();
                std::mem::replace(&mut session.current_mode, SessionMode::Idle)
            };
            // A running generation reports its own cancellation.
            if previous != SessionMode::Generating {
                if let Err(e) = send_message(ws_sender, &ServerMessage::Cancelled).await {
                    warn!("Failed to send Cancelled message: {}", e);
                }
            }
        }
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
        }
    }
}

async fn start_generation(
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<SessionState>>,
    ws_sender: &WsSender,
    generation_task_handle: &mut Option<JoinHandle<()>>,
    request: GenerationRequest,
) {
    let token = {
        let mut session = session_state_lock.lock().await;
        session.current_mode = SessionMode::Generating;
        session.cancellation_token = CancellationToken::new();
        session.cancellation_token.clone()
    };

    let task = {
        let app_state = app_state.clone();
        let session_state_lock = session_state_lock.clone();
        let ws_sender = ws_sender.clone();
        tokio::spawn(async move {
            if let Err(e) =
                generation_process(app_state, session_state_lock, ws_sender, request, token).await
            {
                error!("Generation process failed: {}", e);
            }
        })
    };
    *generation_task_handle = Some(task);
}
