//! crates/dictanote_core/src/subjects.rs
//!
//! The only path by which subject PII reaches or leaves the data store.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{decrypt_field, encrypt_field, CryptoError, KeyDeriver, SymmetricKey};
use crate::domain::{StoredSubject, Subject, SubjectFields, UserIdentity};
use crate::ports::{DatabaseService, PortError};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type VaultResult<T> = Result<T, VaultError>;

pub struct SubjectVault {
    db: Arc<dyn DatabaseService>,
    keys: KeyDeriver,
}

impl SubjectVault {
    pub fn new(db: Arc<dyn DatabaseService>, keys: KeyDeriver) -> Self {
        Self { db, keys }
    }

    pub async fn create(
        &self,
        identity: &UserIdentity,
        account_id: Uuid,
        fields: SubjectFields,
    ) -> VaultResult<Subject> {
        let key = self.keys.derive_key(identity.as_str(), None)?;
        let now = Utc::now();
        let stored = seal(Uuid::new_v4(), account_id, &fields, &key, now)?;
        self.db.insert_subject(stored.clone()).await?;

        Ok(Subject {
            id: stored.id,
            account_id,
            fields,
            created_at: now,
            archived_at: None,
        })
    }

    pub async fn fetch(
        &self,
        identity: &UserIdentity,
        account_id: Uuid,
        subject_id: Uuid,
    ) -> VaultResult<Subject> {
        let stored = self.db.get_subject(account_id, subject_id).await?;
        let key = self.keys.derive_key(identity.as_str(), None)?;
        Ok(open(stored, &key))
    }

    /// Replaces the subject's fields. Every PII field is re-encrypted with a fresh salt and IV.
    pub async fn update(
        &self,
        identity: &UserIdentity,
        account_id: Uuid,
        subject_id: Uuid,
        fields: SubjectFields,
    ) -> VaultResult<Subject> {
        let existing = self.db.get_subject(account_id, subject_id).await?;
        let key = self.keys.derive_key(identity.as_str(), None)?;
        let mut stored = seal(subject_id, account_id, &fields, &key, existing.created_at)?;
        stored.archived_at = existing.archived_at;
        self.db.update_subject(stored.clone()).await?;

        Ok(Subject {
            id: subject_id,
            account_id,
            fields,
            created_at: stored.created_at,
            archived_at: stored.archived_at,
        })
    }

    pub async fn archive(&self, account_id: Uuid, subject_id: Uuid) -> VaultResult<()> {
        self.db.archive_subject(account_id, subject_id).await?;
        Ok(())
    }
}

fn seal(
    id: Uuid,
    account_id: Uuid,
    fields: &SubjectFields,
    key: &SymmetricKey,
    created_at: chrono::DateTime<Utc>,
) -> Result<StoredSubject, CryptoError> {
    let seal_opt = |value: &Option<String>| -> Result<Option<String>, CryptoError> {
        value.as_deref().map(|v| encrypt_field(v, key)).transpose()
    };

    Ok(StoredSubject {
        id,
        account_id,
        first_name: encrypt_field(&fields.first_name, key)?,
        last_name: encrypt_field(&fields.last_name, key)?,
        address_line: seal_opt(&fields.address_line)?,
        postal_code: seal_opt(&fields.postal_code)?,
        city: seal_opt(&fields.city)?,
        context: fields.context.clone(),
        created_at,
        archived_at: None,
    })
}

fn open(stored: StoredSubject, key: &SymmetricKey) -> Subject {
    let open_opt = |value: Option<String>| value.map(|v| decrypt_field(&v, key));

    Subject {
        id: stored.id,
        account_id: stored.account_id,
        fields: SubjectFields {
            first_name: decrypt_field(&stored.first_name, key),
            last_name: decrypt_field(&stored.last_name, key),
            address_line: open_opt(stored.address_line),
            postal_code: open_opt(stored.postal_code),
            city: open_opt(stored.city),
            context: stored.context,
        },
        created_at: stored.created_at,
        archived_at: stored.archived_at,
    }
}
