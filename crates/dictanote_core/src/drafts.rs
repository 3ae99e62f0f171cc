//! crates/dictanote_core/src/drafts.rs
//!
//! Keeps in-progress dictation state across reloads.
//!
//! Drafts hold transcripts and generated notes with real names in them, so they
//! are serialized to JSON and encrypted before reaching `DraftStorage`. Storage
//! problems never reach the caller: they are logged and a missing draft is assumed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{encrypt_field, read_field, FieldSource, KeyDeriver};
use crate::domain::{Draft, DraftState, UserIdentity};
use crate::ports::{DraftStorage, PortError, PortResult};

pub const DEFAULT_DRAFT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Storage key of the draft for an account.
pub fn draft_key(account_id: Uuid) -> String {
    format!("draft:{}", account_id)
}

/// Storage key of the "already handled" flag for one login session.
pub fn handled_key(account_id: Uuid, session_id: &str) -> String {
    format!("draft-handled:{}:{}", account_id, session_id)
}

/// The parts of a guard that the debounced writer task needs.
struct DraftStore {
    storage: Arc<dyn DraftStorage>,
    keys: KeyDeriver,
    identity: UserIdentity,
    account_id: Uuid,
    session_id: String,
    ttl: Duration,
}

impl DraftStore {
    async fn write(&self, state: DraftState, saved_at: DateTime<Utc>) {
        let draft = Draft {
            account_id: self.account_id,
            session_id: self.session_id.clone(),
            saved_at,
            state,
        };

        let sealed = match self.seal(&draft) {
            Ok(sealed) => sealed,
            Err(reason) => {
                // Nothing is written rather than writing the draft in the clear.
                warn!(
                    event = "draft_storage_failure",
                    account_id = %self.account_id,
                    %reason,
                    "Draft not saved"
                );
                return;
            }
        };

        let key = draft_key(self.account_id);
        if let Err(e) = self.storage.set(&key, &sealed, self.ttl).await {
            warn!(
                event = "draft_storage_failure",
                account_id = %self.account_id,
                error = %e,
                "Draft not saved"
            );
            return;
        }
        self.swallow(
            self.storage
                .remove(&handled_key(self.account_id, &self.session_id))
                .await,
        );
        debug!(account_id = %self.account_id, "Draft saved");
    }

    fn seal(&self, draft: &Draft) -> Result<String, String> {
        let json = serde_json::to_string(draft).map_err(|e| e.to_string())?;
        let key = self
            .keys
            .derive_key(self.identity.as_str(), None)
            .map_err(|e| e.to_string())?;
        encrypt_field(&json, &key).map_err(|e| e.to_string())
    }

    fn open(&self, stored: &str) -> Option<Draft> {
        let key = match self.keys.derive_key(self.identity.as_str(), None) {
            Ok(key) => key,
            Err(e) => {
                warn!(event = "draft_storage_failure", error = %e, "Draft key unavailable");
                return None;
            }
        };
        let read = read_field(stored, &key);
        if read.source == FieldSource::Fallback {
            return None;
        }
        match serde_json::from_str(&read.value) {
            Ok(draft) => Some(draft),
            Err(e) => {
                warn!(event = "draft_storage_failure", error = %e, "Stored draft is unreadable");
                None
            }
        }
    }

    fn swallow<T>(&self, result: PortResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    event = "draft_storage_failure",
                    account_id = %self.account_id,
                    error = %e,
                    "Draft storage call failed"
                );
                None
            }
        }
    }
}

/// Saves, restores and clears the draft of one account within one login session.
pub struct DraftGuard {
    store: Arc<DraftStore>,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DraftGuard {
    pub fn new(
        storage: Arc<dyn DraftStorage>,
        keys: KeyDeriver,
        identity: UserIdentity,
        account_id: Uuid,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            store: Arc::new(DraftStore {
                storage,
                keys,
                identity,
                account_id,
                session_id: session_id.into(),
                ttl: DEFAULT_DRAFT_TTL,
            }),
            debounce: DEFAULT_SAVE_DEBOUNCE,
            pending: Mutex::new(None),
        }
    }

    /// Sets the TTL. Must be called before the guard is shared.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        if let Some(store) = Arc::get_mut(&mut self.store) {
            store.ttl = ttl;
        }
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Schedules a write of `state`. A later call within the debounce window replaces it.
    pub async fn save(&self, state: DraftState) {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let store = self.store.clone();
        let debounce = self.debounce;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            store.write(state, Utc::now()).await;
        }));
    }

    /// Writes `state` immediately, dropping any scheduled write.
    pub async fn save_now(&self, state: DraftState) {
        self.cancel_pending().await;
        self.store.write(state, Utc::now()).await;
    }

    /// Waits for a scheduled write to land.
    pub async fn flush(&self) {
        let handle = self.pending.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub async fn load(&self) -> Option<Draft> {
        self.load_at(Utc::now()).await
    }

    /// Loads the draft as of `now`.
    ///
    /// Returns `None` once the session has been marked handled. Expired drafts and
    /// drafts from another account or login session are removed.
    pub async fn load_at(&self, now: DateTime<Utc>) -> Option<Draft> {
        let store = &self.store;
        let handled = store.swallow(
            store
                .storage
                .get(&handled_key(store.account_id, &store.session_id))
                .await,
        )?;
        if handled.is_some() {
            return None;
        }

        let key = draft_key(store.account_id);
        let stored = store.swallow(store.storage.get(&key).await)??;

        let draft = store.open(&stored);
        let usable = draft.filter(|d| {
            let age = now.signed_duration_since(d.saved_at);
            let fresh = age
                .to_std()
                .map(|age| age <= store.ttl)
                .unwrap_or(true);
            fresh && d.account_id == store.account_id && d.session_id == store.session_id
        });

        if usable.is_none() {
            debug!(account_id = %store.account_id, "Discarding stale draft");
            store.swallow(store.storage.remove(&key).await);
        }
        usable
    }

    /// Removes the draft and marks the session handled so it is not offered again.
    pub async fn clear(&self) {
        self.cancel_pending().await;
        let store = &self.store;
        store.swallow(
            store
                .storage
                .set(
                    &handled_key(store.account_id, &store.session_id),
                    "1",
                    store.ttl,
                )
                .await,
        );
        store.swallow(store.storage.remove(&draft_key(store.account_id)).await);
    }

    /// Aborts the scheduled write and waits until it can no longer land.
    async fn cancel_pending(&self) {
        let handle = self.pending.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// An in-process `DraftStorage` with per-entry expiry.
#[derive(Default)]
pub struct MemoryDraftStorage {
    entries: Mutex<HashMap<String, (String, tokio::time::Instant)>>,
}

impl MemoryDraftStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw stored value, ignoring expiry.
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).map(|(v, _)| v.clone())
    }
}

#[async_trait]
impl DraftStorage for MemoryDraftStorage {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= tokio::time::Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> PortResult<()> {
        let expires_at = tokio::time::Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| PortError::Unexpected(format!("ttl {:?} is out of range", ttl)))?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
