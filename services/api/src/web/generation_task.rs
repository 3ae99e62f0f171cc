//! services/api/src/web/generation_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! turning one dictation into a note: it drives the orchestrator, streams its
//! state changes to the client and records the result as a draft.

use crate::error::ApiError;
use crate::web::{
    protocol::{send_message, ServerMessage, WsSender},
    state::{AppState, SessionMode, SessionState},
};
use dictanote_core::{
    domain::{Dictation, DraftState, DraftStep, GenerationInput},
    drafts::DraftGuard,
    pipeline::{GenerationOutcome, PipelineError},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// What the client asked to turn into a note.
#[derive(Debug)]
pub struct GenerationRequest {
    pub dictation: Dictation,
    pub template: Option<String>,
    pub examples: Vec<String>,
}

/// Saves a finished note as the draft. Returns whether anything was written.
///
/// Only a completed, uncancelled run touches the draft.
pub(crate) async fn record_outcome(
    drafts: &DraftGuard,
    subject_id: Uuid,
    result: &Result<GenerationOutcome, PipelineError>,
    token: &CancellationToken,
) -> bool {
    let outcome = match result {
        Ok(outcome) if !token.is_cancelled() => outcome,
        _ => return false,
    };
    drafts
        .save_now(DraftState {
            subject_id: Some(subject_id),
            transcript: Some(outcome.transcript.clone()),
            generated_text: Some(outcome.annotation.clone()),
            step: DraftStep::Generated,
        })
        .await;
    true
}

/// Runs one generation to completion or cancellation.
pub async fn generation_process(
    app_state: Arc<AppState>,
    session_state_lock: Arc<Mutex<SessionState>>,
    ws_sender: WsSender,
    request: GenerationRequest,
    token: CancellationToken,
) -> Result<(), ApiError> {
    let started = Instant::now();

    let (input, identity, subject_id, drafts) = {
        let session = session_state_lock.lock().await;
        let input = GenerationInput {
            dictation: request.dictation,
            subject_name: session.subject.fields.full_name(),
            subject_context: session.subject.fields.context.clone(),
            template: request.template,
            examples: request.examples,
        };
        (
            input,
            session.auth.identity.clone(),
            session.subject.id,
            session.drafts.clone(),
        )
    };

    // The orchestrator reports states synchronously; forward them in order.
    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    let forwarder = {
        let ws_sender = ws_sender.clone();
        tokio::spawn(async move {
            while let Some(state) = state_rx.recv().await {
                if send_message(&ws_sender, &ServerMessage::StateChanged { state })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    };

    let result = app_state
        .orchestrator
        .run(&input, &identity, &token, move |state| {
            let _ = state_tx.send(state);
        })
        .await;
    let _ = forwarder.await;

    // A cancelled run has already been reset by whoever cancelled it.
    if !token.is_cancelled() {
        session_state_lock.lock().await.current_mode = SessionMode::Idle;
    }

    let saved = record_outcome(&drafts, subject_id, &result, &token).await;

    match result {
        Ok(outcome) if saved => {
            info!(
                subject_id = %subject_id,
                backend = ?outcome.backend,
                degraded = outcome.degraded,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Annotation ready"
            );

            send_message(
                &ws_sender,
                &ServerMessage::AnnotationReady {
                    transcript: outcome.transcript,
                    annotation: outcome.annotation,
                    backend: outcome.backend,
                    degraded: outcome.degraded,
                },
            )
            .await?;
        }
        Ok(_) | Err(PipelineError::Cancelled) => {
            info!(subject_id = %subject_id, "Generation cancelled");
            send_message(&ws_sender, &ServerMessage::Cancelled).await?;
        }
        Err(e) => {
            warn!(subject_id = %subject_id, error = %e, "Generation failed");
            send_message(
                &ws_sender,
                &ServerMessage::Error {
                    message: e.user_message().to_string(),
                },
            )
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dictanote_core::{
        domain::UserIdentity,
        drafts::{draft_key, MemoryDraftStorage},
        pipeline::{GenerationOrchestrator, PipelinePolicy},
        ports::{
            AnnotationResponse, AnnotationService, PortError, PortResult, SpeechToTextService,
        },
        pseudonym::{AnnotationRequest, Pseudonymizer},
        KeyDeriver,
    };
    use std::time::Duration;

    struct NoSpeech;

    #[async_trait]
    impl SpeechToTextService for NoSpeech {
        async fn transcribe_audio(&self, _audio_data: &[u8]) -> PortResult<String> {
            Err(PortError::Unexpected("no audio in these tests".into()))
        }
    }

    /// Answers after `delay`, using the placeholder it was given.
    struct SlowBackend {
        delay: Duration,
    }

    #[async_trait]
    impl AnnotationService for SlowBackend {
        async fn generate_annotation(
            &self,
            request: &AnnotationRequest,
        ) -> PortResult<AnnotationResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(AnnotationResponse {
                annotation: format!("Visite de {}. RAS.", request.pseudonym().as_str()),
                pseudonym: None,
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn orchestrator(delay: Duration) -> GenerationOrchestrator {
        GenerationOrchestrator::new(
            Arc::new(NoSpeech),
            Arc::new(SlowBackend { delay }),
            Arc::new(SlowBackend { delay }),
            Pseudonymizer::default(),
            PipelinePolicy::default(),
        )
    }

    fn input() -> GenerationInput {
        GenerationInput {
            dictation: Dictation::Text("Visite ce matin, rien a signaler.".into()),
            subject_name: "Marie Dupont".into(),
            subject_context: None,
            template: None,
            examples: Vec::new(),
        }
    }

    fn drafts(storage: Arc<MemoryDraftStorage>, account_id: Uuid) -> DraftGuard {
        DraftGuard::new(
            storage,
            KeyDeriver::default(),
            UserIdentity::new("u-42").unwrap(),
            account_id,
            "tag",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_generation_leaves_no_draft() {
        let storage = Arc::new(MemoryDraftStorage::new());
        let account_id = Uuid::new_v4();
        let guard = drafts(storage.clone(), account_id);
        let token = CancellationToken::new();

        let run = {
            let token = token.clone();
            tokio::spawn(async move {
                let identity = UserIdentity::new("u-42").unwrap();
                orchestrator(Duration::from_secs(5))
                    .run(&input(), &identity, &token, |_| {})
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let result = run.await.unwrap();

        assert!(!record_outcome(&guard, Uuid::nil(), &result, &token).await);
        assert!(storage.raw(&draft_key(account_id)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_finished_after_cancel_is_not_saved() {
        let storage = Arc::new(MemoryDraftStorage::new());
        let account_id = Uuid::new_v4();
        let guard = drafts(storage.clone(), account_id);
        let token = CancellationToken::new();

        let identity = UserIdentity::new("u-42").unwrap();
        let result = orchestrator(Duration::ZERO)
            .run(&input(), &identity, &token, |_| {})
            .await;
        assert!(result.is_ok());
        token.cancel();

        assert!(!record_outcome(&guard, Uuid::nil(), &result, &token).await);
        assert!(storage.raw(&draft_key(account_id)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_generation_is_saved_with_the_name_restored() {
        let storage = Arc::new(MemoryDraftStorage::new());
        let account_id = Uuid::new_v4();
        let guard = drafts(storage.clone(), account_id);
        let token = CancellationToken::new();
        let subject_id = Uuid::new_v4();

        let identity = UserIdentity::new("u-42").unwrap();
        let result = orchestrator(Duration::from_millis(10))
            .run(&input(), &identity, &token, |_| {})
            .await;

        assert!(record_outcome(&guard, subject_id, &result, &token).await);
        let draft = guard.load().await.unwrap();
        assert_eq!(draft.state.subject_id, Some(subject_id));
        assert_eq!(draft.state.step, DraftStep::Generated);
        assert_eq!(
            draft.state.generated_text.as_deref(),
            Some("Visite de Marie Dupont. RAS.")
        );
    }
}
