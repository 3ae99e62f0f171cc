//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the core's ports.

pub mod annotation_http;
pub mod annotation_llm;
pub mod db;
pub mod stt;

pub use annotation_http::HttpAnnotationAdapter;
pub use annotation_llm::OpenAiAnnotationAdapter;
pub use db::DbAdapter;
pub use stt::OpenAiSttAdapter;

use async_openai::error::OpenAIError;
use dictanote_core::ports::PortError;

/// Maps client errors onto the port taxonomy so the orchestrator can tell
/// timeouts and upstream failures apart.
pub(crate) fn map_openai_error(e: OpenAIError) -> PortError {
    match e {
        OpenAIError::Reqwest(inner) if inner.is_timeout() => PortError::Timeout,
        OpenAIError::Reqwest(inner) => match inner.status() {
            Some(status) => PortError::Status {
                code: status.as_u16(),
                message: inner.to_string(),
            },
            None => PortError::Unexpected(inner.to_string()),
        },
        // The API error body carries no HTTP status.
        OpenAIError::ApiError(api) => PortError::Status {
            code: 502,
            message: api.message,
        },
        other => PortError::Unexpected(other.to_string()),
    }
}
