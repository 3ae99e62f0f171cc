//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` and `DraftStorage` ports from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.
//!
//! Subject PII columns are written and read exactly as handed over: encryption
//! happens in the core's `SubjectVault` before anything reaches this adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dictanote_core::domain::{
    Account, AccountCredentials, AuthContext, StoredSubject, UserIdentity,
};
use dictanote_core::ports::{DatabaseService, DraftStorage, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn not_found_or(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AccountRecord {
    account_id: Uuid,
    email: String,
    hashed_password: String,
}

#[derive(FromRow)]
struct AuthSessionRecord {
    account_id: Uuid,
    identity_key: String,
}

#[derive(FromRow)]
struct SubjectRecord {
    id: Uuid,
    account_id: Uuid,
    first_name: String,
    last_name: String,
    address_line: Option<String>,
    postal_code: Option<String>,
    city: Option<String>,
    context: Option<String>,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl SubjectRecord {
    fn to_domain(self) -> StoredSubject {
        StoredSubject {
            id: self.id,
            account_id: self.account_id,
            first_name: self.first_name,
            last_name: self.last_name,
            address_line: self.address_line,
            postal_code: self.postal_code,
            city: self.city,
            context: self.context,
            created_at: self.created_at,
            archived_at: self.archived_at,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_account_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        identity_key: &str,
    ) -> PortResult<Account> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "INSERT INTO accounts (account_id, email, hashed_password, identity_key) \
             VALUES ($1, $2, $3, $4) \
             RETURNING account_id, email, hashed_password",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .bind(identity_key)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(Account {
            account_id: record.account_id,
            email: record.email,
        })
    }

    async fn get_account_by_email(&self, email: &str) -> PortResult<AccountCredentials> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "SELECT account_id, email, hashed_password FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or(e, || "Account not found".to_string()))?;

        Ok(AccountCredentials {
            account_id: record.account_id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        account_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, account_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(account_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<AuthContext> {
        let record = sqlx::query_as::<_, AuthSessionRecord>(
            "SELECT s.account_id, a.identity_key \
             FROM auth_sessions s JOIN accounts a ON a.account_id = s.account_id \
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)?;

        let identity = UserIdentity::new(record.identity_key).ok_or_else(|| {
            PortError::Unexpected(format!("Account {} has no identity key", record.account_id))
        })?;

        Ok(AuthContext {
            account_id: record.account_id,
            identity,
            auth_session_id: session_id.to_string(),
        })
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn insert_subject(&self, subject: StoredSubject) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO subjects \
             (id, account_id, first_name, last_name, address_line, postal_code, city, context, \
             created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(subject.id)
        .bind(subject.account_id)
        .bind(subject.first_name)
        .bind(subject.last_name)
        .bind(subject.address_line)
        .bind(subject.postal_code)
        .bind(subject.city)
        .bind(subject.context)
        .bind(subject.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_subject(&self, account_id: Uuid, subject_id: Uuid) -> PortResult<StoredSubject> {
        let record = sqlx::query_as::<_, SubjectRecord>(
            "SELECT id, account_id, first_name, last_name, address_line, postal_code, city, \
             context, created_at, archived_at \
             FROM subjects WHERE id = $1 AND account_id = $2",
        )
        .bind(subject_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or(e, || format!("Subject {} not found", subject_id)))?;
        Ok(record.to_domain())
    }

    async fn update_subject(&self, subject: StoredSubject) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE subjects SET first_name = $1, last_name = $2, address_line = $3, \
             postal_code = $4, city = $5, context = $6 \
             WHERE id = $7 AND account_id = $8",
        )
        .bind(subject.first_name)
        .bind(subject.last_name)
        .bind(subject.address_line)
        .bind(subject.postal_code)
        .bind(subject.city)
        .bind(subject.context)
        .bind(subject.id)
        .bind(subject.account_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subject {} not found", subject.id)));
        }
        Ok(())
    }

    async fn archive_subject(&self, account_id: Uuid, subject_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE subjects SET archived_at = COALESCE(archived_at, now()) \
             WHERE id = $1 AND account_id = $2",
        )
        .bind(subject_id)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subject {} not found", subject_id)));
        }
        Ok(())
    }
}

//=========================================================================================
// `DraftStorage` Trait Implementation
//=========================================================================================

#[async_trait]
impl DraftStorage for DbAdapter {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM draft_entries WHERE key = $1 AND expires_at > now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> PortResult<()> {
        let ttl =
            chrono::Duration::from_std(ttl).map_err(|e| PortError::Unexpected(e.to_string()))?;
        sqlx::query(
            "INSERT INTO draft_entries (key, value, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE \
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM draft_entries WHERE key = $1 OR expires_at <= now()")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
