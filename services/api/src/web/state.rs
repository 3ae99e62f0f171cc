//! services/api/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::Config;
use dictanote_core::{
    crypto::KeyDeriver,
    domain::{AuthContext, Subject},
    drafts::DraftGuard,
    pipeline::GenerationOrchestrator,
    ports::{DatabaseService, DraftStorage, PortError},
    subjects::{SubjectVault, VaultError},
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub draft_storage: Arc<dyn DraftStorage>,
    pub config: Arc<Config>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub vault: Arc<SubjectVault>,
    pub keys: KeyDeriver,
}

impl AppState {
    /// A draft guard scoped to the caller's account and login session.
    pub fn draft_guard(&self, auth: &AuthContext) -> DraftGuard {
        DraftGuard::new(
            self.draft_storage.clone(),
            self.keys.clone(),
            auth.identity.clone(),
            auth.account_id,
            session_tag(&auth.auth_session_id),
        )
        .with_ttl(self.config.draft_ttl)
    }
}

/// A stable, non-secret stand-in for the login session id, safe to use in storage keys.
pub fn session_tag(auth_session_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(auth_session_id.as_bytes()));
    digest[..16].to_string()
}

//=========================================================================================
// SessionState (Specific to One WebSocket Connection)
//=========================================================================================

/// An enum representing the current mode of the dictation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Recording,
    Generating,
}

/// The state for a single, active WebSocket connection.
pub struct SessionState {
    pub auth: AuthContext,
    /// The subject being dictated about, with PII decrypted. Never logged.
    pub subject: Subject,
    pub current_mode: SessionMode,
    pub audio_buffer: Vec<u8>,
    /// Cancels the generation task currently running, if any.
    pub cancellation_token: CancellationToken,
    pub drafts: Arc<DraftGuard>,
}

impl SessionState {
    /// Loads and decrypts the subject for this session.
    pub async fn new(
        app_state: &AppState,
        auth: AuthContext,
        subject_id: Uuid,
    ) -> Result<Self, VaultError> {
        let subject = app_state
            .vault
            .fetch(&auth.identity, auth.account_id, subject_id)
            .await?;
        if subject.archived_at.is_some() {
            return Err(VaultError::Port(PortError::NotFound(format!(
                "Subject {} is archived",
                subject_id
            ))));
        }

        let drafts = Arc::new(app_state.draft_guard(&auth));
        Ok(Self {
            auth,
            subject,
            current_mode: SessionMode::Idle,
            audio_buffer: Vec::new(),
            cancellation_token: CancellationToken::new(),
            drafts,
        })
    }

    /// Appends a PCM frame, keeping at most one byte beyond `max` so an
    /// oversized recording is still recognizable as such.
    pub fn push_audio(&mut self, frame: &[u8], max: usize) {
        append_capped(&mut self.audio_buffer, frame, max);
    }
}

fn append_capped(buffer: &mut Vec<u8>, frame: &[u8], max: usize) {
    let room = max.saturating_add(1).saturating_sub(buffer.len());
    let take = frame.len().min(room);
    buffer.extend_from_slice(&frame[..take]);
}
