//! crates/dictanote_core/src/pipeline.rs
//!
//! The dictation-to-note pipeline: transcription, pseudonymization, primary
//! generation with bounded retries, fallback generation, and substitution of
//! the real name back into the result.
//!
//! Every outbound call is bounded by a timeout and raced against the caller's
//! `CancellationToken`; dropping the losing future aborts the in-flight request.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{BackendTier, Dictation, GenerationInput, UserIdentity};
use crate::ports::{
    AnnotationResponse, AnnotationService, PortError, PortResult, SpeechToTextService,
};
use crate::pseudonym::{AnnotationRequest, Pseudonymizer, RequestParts};

/// Where a generation run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Transcribing,
    Pseudonymizing,
    GeneratingPrimary,
    GeneratingFallback,
    Substituting,
    Done,
    Failed,
}

/// Timeouts and limits for one run.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    pub transcription_timeout: Duration,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    /// Total primary attempts, including the first.
    pub primary_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_audio_bytes: usize,
    /// Transcripts shorter than this (in characters, after trimming) count as empty.
    pub min_transcript_chars: usize,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            transcription_timeout: Duration::from_secs(90),
            primary_timeout: Duration::from_secs(25),
            fallback_timeout: Duration::from_secs(10),
            primary_max_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(2),
            max_audio_bytes: 25 * 1024 * 1024,
            min_transcript_chars: 10,
        }
    }
}

impl PipelinePolicy {
    /// Delay before primary attempt `attempt + 1`, doubling each time up to the cap.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Why both generation backends gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableCause {
    /// The last backend timed out: worth trying again shortly.
    Timeout,
    /// The backends answered with errors.
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Audio payload of {size} bytes exceeds the {max} byte limit")]
    AudioTooLarge { size: usize, max: usize },
    #[error("Transcription timed out")]
    TranscriptionTimeout,
    #[error("Transcription failed: {0}")]
    Transcription(PortError),
    #[error("Transcription is empty or too short")]
    EmptyTranscription,
    #[error("The subject has no name to pseudonymize")]
    MissingSubjectName,
    #[error("No generation backend is available ({cause:?})")]
    GenerationUnavailable { cause: UnavailableCause },
    #[error("Generation was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// A message that can be shown to the professional as-is.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::AudioTooLarge { .. } => {
                "The recording is too long. Split it into shorter dictations."
            }
            PipelineError::TranscriptionTimeout => {
                "Transcription took too long. Check your connection and try again."
            }
            PipelineError::Transcription(_) => {
                "The recording could not be transcribed. Please try again."
            }
            PipelineError::EmptyTranscription => {
                "Nothing usable was heard. Dictate a little more and try again."
            }
            PipelineError::MissingSubjectName => {
                "This client has no name on file. Complete the client record first."
            }
            PipelineError::GenerationUnavailable {
                cause: UnavailableCause::Timeout,
            } => "Note generation is slow right now. Please try again in a moment.",
            PipelineError::GenerationUnavailable {
                cause: UnavailableCause::Unavailable,
            } => "Note generation is temporarily unavailable. Your dictation has been kept.",
            PipelineError::Cancelled => "Generation cancelled.",
        }
    }
}

/// The result of a successful run, with the real name restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub transcript: String,
    pub annotation: String,
    pub backend: BackendTier,
    /// The backend dropped the pseudonym, so the name could not be restored.
    pub degraded: bool,
}

enum CallError {
    Cancelled,
    Port(PortError),
}

/// Races `call` against `limit` and `cancel`.
async fn bounded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    call: impl Future<Output = PortResult<T>>,
) -> Result<T, CallError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallError::Cancelled),
        result = tokio::time::timeout(limit, call) => match result {
            Ok(inner) => inner.map_err(CallError::Port),
            Err(_) => Err(CallError::Port(PortError::Timeout)),
        },
    }
}

fn contains_pseudonym(text: &str, pseudonym: &str) -> bool {
    text.to_ascii_uppercase()
        .contains(&pseudonym.to_ascii_uppercase())
}

pub struct GenerationOrchestrator {
    stt: Arc<dyn SpeechToTextService>,
    primary: Arc<dyn AnnotationService>,
    fallback: Arc<dyn AnnotationService>,
    pseudonymizer: Pseudonymizer,
    policy: PipelinePolicy,
}

impl GenerationOrchestrator {
    pub fn new(
        stt: Arc<dyn SpeechToTextService>,
        primary: Arc<dyn AnnotationService>,
        fallback: Arc<dyn AnnotationService>,
        pseudonymizer: Pseudonymizer,
        policy: PipelinePolicy,
    ) -> Self {
        Self {
            stt,
            primary,
            fallback,
            pseudonymizer,
            policy,
        }
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    /// Runs one dictation through to a finished annotation.
    ///
    /// `on_state` is called on every transition. A cancelled run ends in `Idle`,
    /// any other error in `Failed`.
    pub async fn run<F>(
        &self,
        input: &GenerationInput,
        identity: &UserIdentity,
        cancel: &CancellationToken,
        on_state: F,
    ) -> Result<GenerationOutcome, PipelineError>
    where
        F: Fn(PipelineState) + Send + Sync,
    {
        let result = self.execute(input, identity, cancel, &on_state).await;
        match &result {
            Ok(_) => on_state(PipelineState::Done),
            Err(PipelineError::Cancelled) => on_state(PipelineState::Idle),
            Err(e) => {
                info!(error = %e, "Generation run failed");
                on_state(PipelineState::Failed);
            }
        }
        result
    }

    async fn execute<F>(
        &self,
        input: &GenerationInput,
        identity: &UserIdentity,
        cancel: &CancellationToken,
        on_state: &F,
    ) -> Result<GenerationOutcome, PipelineError>
    where
        F: Fn(PipelineState) + Send + Sync,
    {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let transcript = match &input.dictation {
            Dictation::Audio { data } => {
                if data.len() > self.policy.max_audio_bytes {
                    return Err(PipelineError::AudioTooLarge {
                        size: data.len(),
                        max: self.policy.max_audio_bytes,
                    });
                }
                on_state(PipelineState::Transcribing);
                self.transcribe(data, cancel).await?
            }
            Dictation::Text(text) => text.clone(),
        };

        let transcript = transcript.trim().to_string();
        if transcript.chars().count() < self.policy.min_transcript_chars {
            return Err(PipelineError::EmptyTranscription);
        }

        on_state(PipelineState::Pseudonymizing);
        let parts = RequestParts {
            transcript: &transcript,
            subject_context: input.subject_context.as_deref(),
            template: input.template.as_deref(),
            examples: &input.examples,
        };
        let request = self
            .pseudonymizer
            .prepare_request(parts, &input.subject_name, identity)
            .ok_or(PipelineError::MissingSubjectName)?;

        let (raw, backend) = self.generate(&request, cancel, on_state).await?;

        on_state(PipelineState::Substituting);
        let pseudonym = request.pseudonym();
        if let Some(echoed) = raw.pseudonym.as_deref() {
            if !echoed.eq_ignore_ascii_case(pseudonym.as_str()) {
                warn!(
                    event = "pseudonym_mismatch",
                    backend = ?backend,
                    "Backend reported a different placeholder than the one sent"
                );
            }
        }

        let present = contains_pseudonym(&raw.annotation, pseudonym.as_str());
        let annotation =
            self.pseudonymizer
                .substitute_in(&raw.annotation, pseudonym, &input.subject_name);
        let degraded = !present || contains_pseudonym(&annotation, pseudonym.as_str());
        if degraded {
            warn!(
                event = "quality_degraded",
                backend = ?backend,
                "Annotation did not carry the placeholder cleanly"
            );
        }

        Ok(GenerationOutcome {
            transcript,
            annotation,
            backend,
            degraded,
        })
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let started = tokio::time::Instant::now();
        let result = bounded(
            cancel,
            self.policy.transcription_timeout,
            self.stt.transcribe_audio(audio),
        )
        .await;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcription finished"
        );

        match result {
            Ok(text) => Ok(text),
            Err(CallError::Cancelled) => Err(PipelineError::Cancelled),
            Err(CallError::Port(PortError::Timeout)) => Err(PipelineError::TranscriptionTimeout),
            Err(CallError::Port(e)) => Err(PipelineError::Transcription(e)),
        }
    }

    async fn generate<F>(
        &self,
        request: &AnnotationRequest,
        cancel: &CancellationToken,
        on_state: &F,
    ) -> Result<(AnnotationResponse, BackendTier), PipelineError>
    where
        F: Fn(PipelineState) + Send + Sync,
    {
        on_state(PipelineState::GeneratingPrimary);
        let attempts = self.policy.primary_max_attempts.max(1);

        for attempt in 1..=attempts {
            let started = tokio::time::Instant::now();
            match bounded(
                cancel,
                self.policy.primary_timeout,
                self.primary.generate_annotation(request),
            )
            .await
            {
                Ok(response) => {
                    info!(
                        backend = self.primary.name(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Primary generation succeeded"
                    );
                    return Ok((response, BackendTier::Primary));
                }
                Err(CallError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(CallError::Port(e)) => {
                    warn!(
                        event = "primary_generation_failed",
                        backend = self.primary.name(),
                        attempt,
                        error = %e,
                        "Primary generation attempt failed"
                    );
                    if !e.is_retryable() || attempt == attempts {
                        break;
                    }
                    let delay = self.policy.retry_delay(attempt);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        on_state(PipelineState::GeneratingFallback);
        let started = tokio::time::Instant::now();
        match bounded(
            cancel,
            self.policy.fallback_timeout,
            self.fallback.generate_annotation(request),
        )
        .await
        {
            Ok(response) => {
                info!(
                    backend = self.fallback.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fallback generation succeeded"
                );
                Ok((response, BackendTier::Fallback))
            }
            Err(CallError::Cancelled) => Err(PipelineError::Cancelled),
            Err(CallError::Port(e)) => {
                warn!(backend = self.fallback.name(), error = %e, "Fallback generation failed");
                let cause = match e {
                    PortError::Timeout => UnavailableCause::Timeout,
                    _ => UnavailableCause::Unavailable,
                };
                Err(PipelineError::GenerationUnavailable { cause })
            }
        }
    }
}
