//! services/api/src/adapters/annotation_llm.rs
//!
//! This module contains the chat-completion adapter for note generation.
//! It implements the `AnnotationService` port from the `core` crate, and is
//! wired as the fallback backend (and as the primary one when no dedicated
//! annotation service is configured).

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use dictanote_core::ports::{AnnotationResponse, AnnotationService, PortError, PortResult};
use dictanote_core::pseudonym::AnnotationRequest;

use super::map_openai_error;

const SYSTEM_INSTRUCTIONS: &str = r#"You are an assistant that turns a care professional's dictation into a structured visit note.

Rules:
- The person the note is about is referred to by a placeholder of the form SUBJ_XXXXXXXXXXXX. Copy that placeholder exactly wherever the person is named. Never invent a name.
- Text shown as [REDACTED] was removed on purpose. Do not guess what it was.
- Write in the language of the dictation.
- Keep to the facts dictated. Do not add diagnoses or treatments that were not mentioned.
- If a template is given, follow its structure. If previous notes are given, match their tone and length."#;

/// Lays the pseudonymized request out as the user turn of the conversation.
pub(crate) fn build_user_prompt(request: &AnnotationRequest) -> String {
    let mut prompt = format!("PERSON: {}\n", request.pseudonym());

    if let Some(context) = request.subject_context() {
        prompt.push_str(&format!("\nCONTEXT:\n{}\n", context));
    }
    if let Some(template) = request.template() {
        prompt.push_str(&format!("\nTEMPLATE:\n{}\n", template));
    }
    for (i, example) in request.examples().iter().enumerate() {
        prompt.push_str(&format!("\nPREVIOUS NOTE {}:\n{}\n", i + 1, example));
    }
    prompt.push_str(&format!("\nDICTATION:\n{}\n", request.transcript()));
    prompt
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AnnotationService` using an OpenAI-compatible chat model.
#[derive(Clone)]
pub struct OpenAiAnnotationAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    label: String,
}

impl OpenAiAnnotationAdapter {
    /// Creates a new `OpenAiAnnotationAdapter`. `label` names the backend in logs.
    pub fn new(client: Client<OpenAIConfig>, model: String, label: impl Into<String>) -> Self {
        Self {
            client,
            model,
            label: label.into(),
        }
    }
}

//=========================================================================================
// `AnnotationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AnnotationService for OpenAiAnnotationAdapter {
    async fn generate_annotation(
        &self,
        request: &AnnotationRequest,
    ) -> PortResult<AnnotationResponse> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(build_user_prompt(request))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                PortError::Unexpected("Annotation model returned no choices.".to_string())
            })?
            .message
            .content
            .ok_or_else(|| {
                PortError::Unexpected("Annotation model returned no text content.".to_string())
            })?;

        Ok(AnnotationResponse {
            annotation: content.trim().to_string(),
            pseudonym: None,
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}
