//! services/api/src/adapters/annotation_http.rs
//!
//! Adapter for a dedicated annotation service reached over HTTP. The
//! pseudonymized request is POSTed as JSON with a bearer token; the service
//! answers `{ "annotation": "...", "pseudonym": "..." }`.

use async_trait::async_trait;
use dictanote_core::ports::{AnnotationResponse, AnnotationService, PortError, PortResult};
use dictanote_core::pseudonym::AnnotationRequest;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct AnnotationBody {
    annotation: String,
    #[serde(default)]
    pseudonym: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

pub struct HttpAnnotationAdapter {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpAnnotationAdapter {
    /// `timeout` is a transport-level ceiling; the orchestrator applies its own per-attempt bound.
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token,
            timeout,
        }
    }
}

#[async_trait]
impl AnnotationService for HttpAnnotationAdapter {
    async fn generate_annotation(
        &self,
        request: &AnnotationRequest,
    ) -> PortResult<AnnotationResponse> {
        let mut builder = self
            .client
            .post(&self.url)
            .json(request)
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PortError::Timeout
            } else {
                PortError::Unexpected(format!("Annotation request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(match status.as_u16() {
                401 | 403 => PortError::Unauthorized,
                code => PortError::Status { code, message },
            });
        }

        let body: AnnotationBody = response.json().await.map_err(|e| {
            PortError::Unexpected(format!("Failed to parse annotation response: {}", e))
        })?;

        Ok(AnnotationResponse {
            annotation: body.annotation,
            pseudonym: body.pseudonym,
        })
    }

    fn name(&self) -> &str {
        "annotation-http"
    }
}
