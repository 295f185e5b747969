//! OpenAI-compatible `/chat/completions` adapter.
//!
//! Behaviour:
//! - Whole responses are decoded into [`CompletionResponse`], keeping unknown fields.
//! - Streams are decoded line by line; `data: [DONE]` or end-of-body ends the stream.
//! - Non-success statuses become [`ProviderError::Api`] with the provider's
//!   `{"error":{"message","type"}}` payload, or the raw body when it has another shape.
//! - A stream payload with a top-level `error` member ends the stream as a failure,
//!   whatever the member's shape.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt, stream};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::core::errors::{ChatError, ChatResult, DEFAULT_UPSTREAM_STATUS};
use crate::llm::sse::{SseDecoder, SseEvent};
use crate::llm::types::{CompletionChunk, CompletionRequest, CompletionResponse, Credential};
use crate::llm::{ChunkStream, CompletionProvider, ProviderError, ProviderFuture};

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default idle read timeout; long streams stay open as long as bytes keep flowing.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: Url,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Maximum wait between two reads of the response body.
    pub read_timeout: Duration,
}

impl OpenAiConfig {
    /// Settings for `base_url` with default timeouts.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Full `/chat/completions` endpoint.
    ///
    /// # Errors
    /// Returns an error if the joined URL is invalid.
    pub fn endpoint(&self) -> ChatResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/chat/completions"))?)
    }
}

/// Async client for an OpenAI-compatible provider.
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    endpoint: Url,
}

impl OpenAiCompatibleProvider {
    /// Build the HTTP client.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the endpoint or the client cannot be built.
    pub fn new(config: &OpenAiConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|err| ChatError::InvalidConfig(format!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint()?,
        })
    }

    fn post(&self, request: &CompletionRequest, credential: &Credential) -> RequestBuilder {
        self.client
            .post(self.endpoint.clone())
            .bearer_auth(credential.expose())
            .json(request)
    }
}

impl CompletionProvider for OpenAiCompatibleProvider {
    fn complete(
        &self,
        mut request: CompletionRequest,
        credential: Credential,
    ) -> ProviderFuture<'_, Result<CompletionResponse, ProviderError>> {
        Box::pin(async move {
            request.stream = false;
            let response = self.post(&request, &credential).send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(api_error(status.as_u16(), &body));
            }
            debug!(model = %request.model, bytes = body.len(), "Completion received");
            Ok(serde_json::from_str(&body)?)
        })
    }

    fn complete_stream(
        &self,
        mut request: CompletionRequest,
        credential: Credential,
    ) -> ProviderFuture<'_, Result<ChunkStream, ProviderError>> {
        Box::pin(async move {
            request.stream = true;
            let response = self
                .post(&request, &credential)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(api_error(status.as_u16(), &body));
            }
            debug!(model = %request.model, "Completion stream opened");
            Ok(decode_stream(response.bytes_stream()))
        })
    }
}

/// Message and type carried by a non-null `error` member, whatever its shape.
fn error_member(payload: &Value) -> Option<(String, Option<String>)> {
    let error = payload.get("error").filter(|error| !error.is_null())?;
    let kind = error.get("type").and_then(Value::as_str).map(str::to_string);
    let message = match error {
        Value::String(text) => text.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    };
    Some((message, kind))
}

fn api_error(status: u16, body: &str) -> ProviderError {
    let member = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(error_member);
    match member {
        Some((message, kind)) => ProviderError::Api {
            status,
            message,
            kind,
        },
        None if body.trim().is_empty() => ProviderError::Api {
            status,
            message: format!("upstream returned status {status}"),
            kind: None,
        },
        None => ProviderError::Api {
            status,
            message: body.trim().to_string(),
            kind: None,
        },
    }
}

fn parse_payload(payload: &str) -> Result<CompletionChunk, ProviderError> {
    let value: Value = serde_json::from_str(payload)?;
    if let Some((message, kind)) = error_member(&value) {
        return Err(ProviderError::Api {
            status: DEFAULT_UPSTREAM_STATUS,
            message,
            kind,
        });
    }
    Ok(serde_json::from_value(value)?)
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    exhausted: bool,
}

/// Turn a raw SSE byte stream into completion chunks.
///
/// The stream ends after `[DONE]`, at end of body, or right after the first error.
fn decode_stream<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                let SseEvent::Data(payload) = event else {
                    return None;
                };
                let item = parse_payload(&payload);
                if item.is_err() {
                    state.pending.clear();
                    state.exhausted = true;
                }
                return Some((item, state));
            }
            if state.exhausted {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.exhausted = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.exhausted = true;
                    let tail = state.decoder.finish();
                    state.pending.extend(tail);
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, ProviderError>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, ProviderError>> =
            parts.iter().map(|part| Ok(part.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(stream: ChunkStream) -> Vec<Result<CompletionChunk, ProviderError>> {
        stream.collect().await
    }

    #[test]
    fn test_endpoint_joins_base_path() {
        let config = OpenAiConfig::new(Url::parse("https://api.example.com/v1/").unwrap());
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_api_error_reads_openai_shape() {
        let err = api_error(
            429,
            r#"{"error":{"message":"Rate limit reached","type":"rate_limit_exceeded","code":null}}"#,
        );
        match err {
            ProviderError::Api {
                status,
                message,
                kind,
            } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
                assert_eq!(kind.as_deref(), Some("rate_limit_exceeded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_error_falls_back_to_raw_body() {
        let ProviderError::Api { message, kind, .. } = api_error(502, " Bad Gateway ") else {
            panic!("expected api error");
        };
        assert_eq!(message, "Bad Gateway");
        assert!(kind.is_none());

        let ProviderError::Api { message, .. } = api_error(503, "") else {
            panic!("expected api error");
        };
        assert_eq!(message, "upstream returned status 503");
    }

    #[tokio::test]
    async fn test_stream_decodes_chunks_until_done() {
        let stream = decode_stream(body(&[
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n",
            "\ndata: [DONE]\n\ndata: {\"id\":\"late\",\"choices\":[]}\n\n",
        ]));
        let items = collect(stream).await;
        let texts: Vec<String> = items
            .into_iter()
            .map(|item| item.unwrap().text().to_string())
            .collect();
        assert_eq!(texts, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_stream_without_done_ends_at_eof() {
        let stream = decode_stream(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}",
        ]));
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_stream_error_payload_ends_stream() {
        let stream = decode_stream(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\",\"type\":\"server_error\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
        ]));
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            &items[1],
            Err(ProviderError::Api { message, .. }) if message == "overloaded"
        ));
    }

    #[test]
    fn test_any_error_member_is_a_failure() {
        assert!(matches!(
            parse_payload(r#"{"error":"quota exhausted"}"#),
            Err(ProviderError::Api { message, .. }) if message == "quota exhausted"
        ));
        assert!(matches!(
            parse_payload(r#"{"error":{"code":503}}"#),
            Err(ProviderError::Api { message, .. }) if message == r#"{"code":503}"#
        ));
        assert!(matches!(parse_payload(r#"{"error":42}"#), Err(ProviderError::Api { .. })));

        let chunk = parse_payload(r#"{"error":null,"choices":[{"delta":{"content":"ok"}}]}"#).unwrap();
        assert_eq!(chunk.text(), "ok");
    }

    #[tokio::test]
    async fn test_stream_transport_error_is_forwarded() {
        let parts: Vec<Result<Vec<u8>, ProviderError>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(ProviderError::Decode("connection reset".to_string())),
            Ok(b"data: {\"choices\":[]}\n\n".to_vec()),
        ];
        let items = collect(decode_stream(stream::iter(parts))).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ProviderError::Decode(_))));
    }
}
