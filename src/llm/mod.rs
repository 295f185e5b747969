//! Completion provider capability and its OpenAI-compatible adapter.

pub mod openai;
#[cfg(test)]
pub mod scripted;
pub mod sse;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

use crate::core::errors::{ChatError, DEFAULT_UPSTREAM_STATUS};

pub use openai::{OpenAiCompatibleProvider, OpenAiConfig};
pub use types::{
    ChunkChoice, ChunkDelta, CompletionChunk, CompletionRequest, CompletionResponse, Credential,
    PromptMessage,
};

/// Boxed future type for provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sequential chunk stream. Dropping it cancels the upstream call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, ProviderError>> + Send>>;

/// Errors produced by a completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure talking to the provider.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with an error.
    #[error("api error ({status}): {message}")]
    Api {
        /// Provider status code.
        status: u16,
        /// Provider message.
        message: String,
        /// Provider error type.
        kind: Option<String>,
    },
    /// The provider answered with something that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<ProviderError> for ChatError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Api {
                status,
                message,
                kind,
            } => Self::Upstream {
                status,
                message,
                kind,
            },
            ProviderError::Http(err) => Self::Upstream {
                status: err
                    .status()
                    .map_or(DEFAULT_UPSTREAM_STATUS, |status| status.as_u16()),
                message: err.to_string(),
                kind: None,
            },
            ProviderError::Decode(message) => Self::Upstream {
                status: DEFAULT_UPSTREAM_STATUS,
                message,
                kind: None,
            },
        }
    }
}

/// Capability that reaches the upstream model.
///
/// Implementations never retry on their own behalf; retry policy belongs to
/// the client configuration behind the implementation.
pub trait CompletionProvider: Send + Sync {
    /// Run a completion and wait for the whole answer.
    ///
    /// # Errors
    /// Returns the provider status and message on failure.
    fn complete(
        &self,
        request: CompletionRequest,
        credential: Credential,
    ) -> ProviderFuture<'_, Result<CompletionResponse, ProviderError>>;

    /// Open a streaming completion.
    ///
    /// # Errors
    /// Returns the provider status and message if the stream cannot be opened.
    fn complete_stream(
        &self,
        request: CompletionRequest,
        credential: Credential,
    ) -> ProviderFuture<'_, Result<ChunkStream, ProviderError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_keeps_status() {
        let err: ChatError = ProviderError::Api {
            status: 401,
            message: "bad key".to_string(),
            kind: Some("invalid_request_error".to_string()),
        }
        .into();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.kind(), "invalid_request_error");
    }

    #[test]
    fn test_decode_error_defaults_to_500() {
        let err: ChatError = ProviderError::Decode("garbage".to_string()).into();
        assert_eq!(err.status_code(), DEFAULT_UPSTREAM_STATUS);
    }
}
