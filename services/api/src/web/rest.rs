//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::{
    auth::{self, AuthResponse, LoginRequest, SignupRequest},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use dictanote_core::domain::{AuthContext, DraftStep, Subject, SubjectFields};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        create_subject_handler,
        get_subject_handler,
        update_subject_handler,
        archive_subject_handler,
        get_draft_handler,
        clear_draft_handler,
    ),
    components(
        schemas(
            SignupRequest,
            LoginRequest,
            AuthResponse,
            SubjectPayload,
            SubjectResponse,
            DraftResponse,
        )
    ),
    tags(
        (name = "Auth", description = "Account signup, login and logout."),
        (
            name = "Subjects",
            description = "People the notes are about. Identifying fields are encrypted at rest."
        ),
        (name = "Drafts", description = "Unfinished dictation state for the current login session.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The editable fields of a subject.
#[derive(Deserialize, ToSchema)]
pub struct SubjectPayload {
    pub first_name: String,
    pub last_name: String,
    pub address_line: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    /// Pathology or care context, used to ground generated notes.
    pub context: Option<String>,
}

impl SubjectPayload {
    fn into_fields(self) -> Result<SubjectFields, ApiError> {
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let fields = SubjectFields {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            address_line: blank_to_none(self.address_line),
            postal_code: blank_to_none(self.postal_code),
            city: blank_to_none(self.city),
            context: blank_to_none(self.context),
        };
        if fields.full_name().is_empty() {
            return Err(ApiError::BadRequest("A subject needs a name".to_string()));
        }
        Ok(fields)
    }
}

#[derive(Serialize, ToSchema)]
pub struct SubjectResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub address_line: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl From<Subject> for SubjectResponse {
    fn from(subject: Subject) -> Self {
        let f = subject.fields;
        Self {
            id: subject.id,
            first_name: f.first_name,
            last_name: f.last_name,
            address_line: f.address_line,
            postal_code: f.postal_code,
            city: f.city,
            context: f.context,
            created_at: subject.created_at,
            archived_at: subject.archived_at,
        }
    }
}

/// A restorable draft for the current login session.
#[derive(Serialize, ToSchema)]
pub struct DraftResponse {
    pub saved_at: DateTime<Utc>,
    pub subject_id: Option<Uuid>,
    pub transcript: Option<String>,
    pub generated_text: Option<String>,
    /// One of `subject_selected`, `recording`, `transcribed`, `generated`.
    #[schema(value_type = String)]
    pub step: DraftStep,
}

//=========================================================================================
// Subject Handlers
//=========================================================================================

/// Create a subject.
#[utoipa::path(
    post,
    path = "/subjects",
    request_body = SubjectPayload,
    responses(
        (status = 201, description = "Subject created", body = SubjectResponse),
        (status = 400, description = "Missing name"),
        (status = 401, description = "Not logged in"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Subjects"
)]
pub async fn create_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SubjectPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = payload.into_fields()?;
    let subject = app_state
        .vault
        .create(&auth.identity, auth.account_id, fields)
        .await?;

    info!(subject_id = %subject.id, account_id = %auth.account_id, "Subject created");
    Ok((StatusCode::CREATED, Json(SubjectResponse::from(subject))))
}

/// Fetch one subject, decrypted.
#[utoipa::path(
    get,
    path = "/subjects/{id}",
    params(("id" = Uuid, Path, description = "The subject id")),
    responses(
        (status = 200, description = "The subject", body = SubjectResponse),
        (status = 404, description = "No such subject for this account")
    ),
    tag = "Subjects"
)]
pub async fn get_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(subject_id): Path<Uuid>,
) -> Result<Json<SubjectResponse>, ApiError> {
    let subject = app_state
        .vault
        .fetch(&auth.identity, auth.account_id, subject_id)
        .await?;
    Ok(Json(subject.into()))
}

/// Replace a subject's fields.
#[utoipa::path(
    put,
    path = "/subjects/{id}",
    params(("id" = Uuid, Path, description = "The subject id")),
    request_body = SubjectPayload,
    responses(
        (status = 200, description = "Subject updated", body = SubjectResponse),
        (status = 400, description = "Missing name"),
        (status = 404, description = "No such subject for this account")
    ),
    tag = "Subjects"
)]
pub async fn update_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(subject_id): Path<Uuid>,
    Json(payload): Json<SubjectPayload>,
) -> Result<Json<SubjectResponse>, ApiError> {
    let fields = payload.into_fields()?;
    let subject = app_state
        .vault
        .update(&auth.identity, auth.account_id, subject_id, fields)
        .await?;
    Ok(Json(subject.into()))
}

/// Archive a subject. Archived subjects can no longer be dictated about.
#[utoipa::path(
    delete,
    path = "/subjects/{id}",
    params(("id" = Uuid, Path, description = "The subject id")),
    responses(
        (status = 204, description = "Subject archived"),
        (status = 404, description = "No such subject for this account")
    ),
    tag = "Subjects"
)]
pub async fn archive_subject_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(subject_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app_state.vault.archive(auth.account_id, subject_id).await?;
    info!(subject_id = %subject_id, account_id = %auth.account_id, "Subject archived");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Draft Handlers
//=========================================================================================

/// Load the draft for the current login session, if one can be restored.
#[utoipa::path(
    get,
    path = "/drafts",
    responses(
        (status = 200, description = "A restorable draft", body = DraftResponse),
        (status = 204, description = "Nothing to restore")
    ),
    tag = "Drafts"
)]
pub async fn get_draft_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    match app_state.draft_guard(&auth).load().await {
        Some(draft) => Json(DraftResponse {
            saved_at: draft.saved_at,
            subject_id: draft.state.subject_id,
            transcript: draft.state.transcript,
            generated_text: draft.state.generated_text,
            step: draft.state.step,
        })
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Discard the draft. It will not be offered again in this login session.
#[utoipa::path(
    delete,
    path = "/drafts",
    responses(
        (status = 204, description = "Draft cleared")
    ),
    tag = "Drafts"
)]
pub async fn clear_draft_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> StatusCode {
    app_state.draft_guard(&auth).clear().await;
    StatusCode::NO_CONTENT
}
