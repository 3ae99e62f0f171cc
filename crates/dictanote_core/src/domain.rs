//! crates/dictanote_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format,
//! except for `Draft`, which is persisted as JSON by the draft guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Identity
//=========================================================================================

/// The stable, confidential per-account identifier handed out by the
/// authentication collaborator. Only ever used as key-derivation and pseudonym input.
#[derive(Clone, PartialEq, Eq)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Wraps an identifier, returning `None` when it is blank.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UserIdentity([REDACTED])")
    }
}

//=========================================================================================
// Accounts and authentication
//=========================================================================================

// Represents an account - used throughout app
#[derive(Debug, Clone)]
pub struct Account {
    pub account_id: Uuid,
    pub email: String,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub account_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// The account behind a validated browser login session.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account_id: Uuid,
    pub identity: UserIdentity,
    pub auth_session_id: String,
}

//=========================================================================================
// Subjects
//=========================================================================================

/// The identifying and contextual fields of a subject, in clear text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectFields {
    pub first_name: String,
    pub last_name: String,
    pub address_line: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    /// Pathology / care context. Not identifying on its own and stored as-is.
    pub context: Option<String>,
}

impl SubjectFields {
    /// The single identity field that is pseudonymized before any AI call.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// A subject as seen by the application, with every PII field decrypted.
#[derive(Debug, Clone)]
pub struct Subject {
    pub id: Uuid,
    pub account_id: Uuid,
    pub fields: SubjectFields,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// A subject exactly as it sits in the shared data store: PII columns hold
/// `EncryptedField` strings (ciphertext, or plaintext for legacy rows).
#[derive(Debug, Clone)]
pub struct StoredSubject {
    pub id: Uuid,
    pub account_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub address_line: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Generation
//=========================================================================================

/// What the professional dictated: raw audio still to be transcribed, or text typed directly.
#[derive(Debug, Clone)]
pub enum Dictation {
    Audio { data: Vec<u8> },
    Text(String),
}

/// Everything the orchestrator needs for one generation attempt, on the trusted side.
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub dictation: Dictation,
    pub subject_name: String,
    pub subject_context: Option<String>,
    pub template: Option<String>,
    pub examples: Vec<String>,
}

/// Which text-generation backend produced the annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTier {
    Primary,
    Fallback,
}

//=========================================================================================
// Drafts
//=========================================================================================

/// Where the user was in the dictation flow when the draft was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStep {
    SubjectSelected,
    Recording,
    Transcribed,
    Generated,
}

/// The in-progress flow state worth restoring after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftState {
    pub subject_id: Option<Uuid>,
    pub transcript: Option<String>,
    pub generated_text: Option<String>,
    pub step: DraftStep,
}

/// A persisted draft: the state plus who it belongs to and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub account_id: Uuid,
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub state: DraftState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identity_is_rejected() {
        assert!(UserIdentity::new("").is_none());
        assert!(UserIdentity::new("   ").is_none());
        assert!(UserIdentity::new("u-42").is_some());
    }

    #[test]
    fn identity_debug_is_redacted() {
        let identity = UserIdentity::new("u-42").unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("u-42"));
    }

    #[test]
    fn full_name_joins_trimmed_parts() {
        let fields = SubjectFields {
            first_name: " Marie ".into(),
            last_name: "Dupont".into(),
            ..Default::default()
        };
        assert_eq!(fields.full_name(), "Marie Dupont");

        let last_only = SubjectFields {
            last_name: "Dupont".into(),
            ..Default::default()
        };
        assert_eq!(last_only.full_name(), "Dupont");
    }
}
