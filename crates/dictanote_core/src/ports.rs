//! crates/dictanote_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Account, AccountCredentials, AuthContext, StoredSubject};
use crate::pseudonym::AnnotationRequest;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("The request timed out")]
    Timeout,
    #[error("Upstream returned status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether the same call is worth repeating: timeouts, throttling, server-side
    /// failures and transport errors are; client-side rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PortError::Timeout | PortError::Unexpected(_) => true,
            PortError::Status { code, .. } => *code == 408 || *code == 429 || *code >= 500,
            PortError::NotFound(_)
            | PortError::Unauthorized
            | PortError::PayloadTooLarge { .. } => false,
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Account / Auth Methods ---
    async fn create_account_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        identity_key: &str,
    ) -> PortResult<Account>;

    async fn get_account_by_email(&self, email: &str) -> PortResult<AccountCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        account_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a live auth session to its account and identity.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<AuthContext>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Subject Management ---
    // PII columns arrive here already encrypted; the store never sees clear names.
    async fn insert_subject(&self, subject: StoredSubject) -> PortResult<()>;

    /// Only returns the subject if it belongs to `account_id`.
    async fn get_subject(&self, account_id: Uuid, subject_id: Uuid) -> PortResult<StoredSubject>;

    async fn update_subject(&self, subject: StoredSubject) -> PortResult<()>;

    async fn archive_subject(&self, account_id: Uuid, subject_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes a slice of audio data into text.
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String>;
}

/// The raw text returned by a text-generation backend, pseudonym still in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationResponse {
    pub annotation: String,
    /// The placeholder the backend reports having used, if it reports one.
    pub pseudonym: Option<String>,
}

#[async_trait]
pub trait AnnotationService: Send + Sync {
    /// Drafts a structured note. Only ever receives pseudonymized requests.
    async fn generate_annotation(&self, request: &AnnotationRequest)
        -> PortResult<AnnotationResponse>;

    /// A short label for logs.
    fn name(&self) -> &str;
}

/// A string-keyed, expiring key/value store for draft state.
#[async_trait]
pub trait DraftStorage: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> PortResult<()>;

    async fn remove(&self, key: &str) -> PortResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        for code in [408u16, 429, 500, 502, 503] {
            let err = PortError::Status {
                code,
                message: String::new(),
            };
            assert!(err.is_retryable(), "status {} should be retryable", code);
        }
        assert!(PortError::Timeout.is_retryable());
        assert!(PortError::Unexpected("connection reset".into()).is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for code in [400u16, 401, 403, 404, 422] {
            let err = PortError::Status {
                code,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "status {} should not be retryable", code);
        }
        assert!(!PortError::PayloadTooLarge { size: 2, max: 1 }.is_retryable());
    }
}
