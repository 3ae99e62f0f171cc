//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for a dictation session.

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use dictanote_core::{
    domain::{BackendTier, DraftState},
    pipeline::PipelineState,
};
use futures::{stream::SplitSink, SinkExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ApiError;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================
// NOTE: Dictation audio is sent as raw Binary frames (16-bit mono PCM), not as
// part of this enum.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a dictation about one subject. This must be the first message sent on the connection.
    Init { subject_id: Uuid },

    /// The professional started recording; binary frames follow.
    DictationStarted,

    /// Recording finished: transcribe the buffered audio and generate a note.
    DictationEnded {
        #[serde(default)]
        template: Option<String>,
        #[serde(default)]
        examples: Vec<String>,
    },

    /// Typed dictation: generate a note from this text directly.
    SubmitText {
        transcript: String,
        #[serde(default)]
        template: Option<String>,
        #[serde(default)]
        examples: Vec<String>,
    },

    /// Abort the recording or the generation in progress.
    Cancel,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms successful session initialization.
    SessionInitialized { subject_id: Uuid },

    /// An unfinished draft from this login session can be restored.
    DraftAvailable {
        saved_at: DateTime<Utc>,
        draft: DraftState,
    },

    /// The generation pipeline moved to a new state.
    StateChanged { state: PipelineState },

    /// The finished note, with the subject's name restored.
    AnnotationReady {
        transcript: String,
        annotation: String,
        backend: BackendTier,
        degraded: bool,
    },

    /// The generation was cancelled and nothing was kept.
    Cancelled,

    /// Reports an error the client should display as-is.
    Error { message: String },
}

/// The write half of a WebSocket, shared between the connection loop and its tasks.
pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Serializes and sends one server message.
pub async fn send_message(sender: &WsSender, message: &ServerMessage) -> Result<(), ApiError> {
    let json = serde_json::to_string(message).map_err(|e| ApiError::Internal(e.to_string()))?;
    sender.lock().await.send(Message::Text(json.into())).await?;
    Ok(())
}
