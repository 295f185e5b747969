//! Completion relay: drives the provider, forwards chunks, accumulates the answer.
//!
//! A streaming exchange is one producer task writing frames into a bounded
//! channel whose receiver is the HTTP response body. The producer watches the
//! receiver side and releases the upstream stream as soon as the caller is gone.

pub mod frames;

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::errors::ChatResult;
use crate::core::ids::MessageId;
use crate::core::types::{GenerationParams, PathMessage};
use crate::llm::{ChunkStream, CompletionProvider, CompletionRequest, CompletionResponse, Credential};

pub use frames::{SaveReport, data_frame, done_frame, save_frame};

/// How a relayed stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Upstream finished and `[DONE]` reached the caller.
    Completed,
    /// Upstream failed mid-stream; no terminal marker was sent.
    UpstreamFailed(String),
    /// The caller went away.
    Disconnected,
}

/// Result of relaying one stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Id stamped on every forwarded chunk.
    pub answer_id: MessageId,
    /// Concatenated delta text.
    pub text: String,
    /// How the stream ended.
    pub termination: Termination,
}

impl StreamOutcome {
    /// Whether the full answer was delivered.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.termination, Termination::Completed)
    }
}

/// Relay between callers and a [`CompletionProvider`]. Never retries.
#[derive(Clone)]
pub struct CompletionRelay {
    provider: Arc<dyn CompletionProvider>,
}

impl CompletionRelay {
    /// Create a relay over a provider.
    #[must_use]
    pub const fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Whole-response completion.
    ///
    /// # Errors
    /// Returns `Upstream` with the provider status and message.
    pub async fn complete(
        &self,
        path: &[PathMessage],
        params: &GenerationParams,
        credential: Credential,
    ) -> ChatResult<CompletionResponse> {
        let request = CompletionRequest::new(path, params, false);
        let response = self.provider.complete(request, credential).await?;
        debug!(model = %params.model, "Completion relayed");
        Ok(response)
    }

    /// Open an upstream stream. Nothing has been sent to the caller yet.
    ///
    /// # Errors
    /// Returns `Upstream` with the provider status and message.
    pub async fn open_stream(
        &self,
        path: &[PathMessage],
        params: &GenerationParams,
        credential: Credential,
    ) -> ChatResult<ChunkStream> {
        let request = CompletionRequest::new(path, params, true);
        Ok(self.provider.complete_stream(request, credential).await?)
    }

    /// Forward every upstream chunk to `sink`, stamped with `answer_id`.
    ///
    /// Chunks go out in upstream order. The upstream stream is dropped before
    /// this returns, whatever the termination.
    pub async fn forward(
        answer_id: MessageId,
        mut upstream: ChunkStream,
        sink: &mpsc::Sender<String>,
    ) -> StreamOutcome {
        let mut text = String::new();
        let mut chunks = 0_usize;
        let termination = loop {
            let next = tokio::select! {
                biased;
                () = sink.closed() => break Termination::Disconnected,
                next = upstream.next() => next,
            };
            let Some(item) = next else {
                if sink.send(done_frame()).await.is_err() {
                    break Termination::Disconnected;
                }
                break Termination::Completed;
            };
            let mut chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(answer = %answer_id, chunks, error = %err, "Upstream stream failed, truncating");
                    break Termination::UpstreamFailed(err.to_string());
                }
            };
            chunk.id = answer_id.to_string();
            let frame = match data_frame(&chunk) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(answer = %answer_id, error = %err, "Chunk could not be framed");
                    break Termination::UpstreamFailed(err.to_string());
                }
            };
            text.push_str(chunk.text());
            chunks += 1;
            if sink.send(frame).await.is_err() {
                break Termination::Disconnected;
            }
        };
        drop(upstream);

        match &termination {
            Termination::Completed => {
                info!(answer = %answer_id, chunks, chars = text.chars().count(), "Stream completed");
            }
            Termination::Disconnected => {
                info!(answer = %answer_id, chunks, "Caller disconnected, upstream released");
            }
            Termination::UpstreamFailed(_) => {}
        }
        StreamOutcome {
            answer_id,
            text,
            termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ChatError;
    use crate::core::types::Role;
    use crate::llm::scripted::{ScriptedProvider, Step};

    fn path() -> Vec<PathMessage> {
        vec![PathMessage::new(Role::User, "hi").with_id("u1")]
    }

    fn params() -> GenerationParams {
        GenerationParams {
            model: "gpt-4o-mini".to_string(),
            max_tokens: Some(64),
            temperature: None,
        }
    }

    fn credential() -> Credential {
        Credential::new("sk-test")
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_forward_stamps_answer_id_and_ends_with_done() {
        let provider = Arc::new(ScriptedProvider::replying(&["Hel", "lo", "!"]));
        let relay = CompletionRelay::new(provider.clone());
        let upstream = relay.open_stream(&path(), &params(), credential()).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let answer = MessageId::from("answer-1");
        let outcome = CompletionRelay::forward(answer.clone(), upstream, &tx).await;
        drop(tx);
        let frames = drain(rx).await;

        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.text, "Hello!");
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.last().map(String::as_str), Some("data: [DONE]\n\n"));
        let texts: Vec<String> = frames[..3]
            .iter()
            .map(|frame| {
                let json: serde_json::Value =
                    serde_json::from_str(frame.trim_start_matches("data: ").trim_end()).unwrap();
                assert_eq!(json["id"], "answer-1");
                json["choices"][0]["delta"]["content"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(texts, ["Hel", "lo", "!"]);
        assert!(provider.requests()[0].stream);
    }

    #[tokio::test]
    async fn test_upstream_failure_truncates_without_done() {
        let provider = Arc::new(ScriptedProvider::with_steps(vec![
            Step::Text("par".to_string()),
            Step::Fail(502, "upstream reset".to_string()),
            Step::Text("never".to_string()),
        ]));
        let relay = CompletionRelay::new(provider);
        let upstream = relay.open_stream(&path(), &params(), credential()).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let outcome = CompletionRelay::forward(MessageId::from("a"), upstream, &tx).await;
        drop(tx);
        let frames = drain(rx).await;

        assert!(matches!(outcome.termination, Termination::UpstreamFailed(_)));
        assert!(!outcome.is_completed());
        assert_eq!(outcome.text, "par");
        assert_eq!(frames.len(), 1);
        assert!(frames.iter().all(|frame| !frame.contains("[DONE]")));
    }

    #[tokio::test]
    async fn test_disconnect_releases_upstream() {
        let provider = Arc::new(ScriptedProvider::with_steps(vec![
            Step::Text("first".to_string()),
            Step::Stall,
        ]));
        let relay = CompletionRelay::new(provider.clone());
        let upstream = relay.open_stream(&path(), &params(), credential()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            CompletionRelay::forward(MessageId::from("a"), upstream, &tx).await
        });
        let first = rx.recv().await.unwrap();
        assert!(first.contains("first"));
        drop(rx);

        let outcome = task.await.unwrap();
        assert_eq!(outcome.termination, Termination::Disconnected);
        assert_eq!(provider.pulled(), 1);
        assert!(provider.stream_dropped());
    }

    #[tokio::test]
    async fn test_open_errors_surface_before_streaming() {
        let relay = CompletionRelay::new(Arc::new(ScriptedProvider::refusing(429, "slow down")));
        let Err(err) = relay.open_stream(&path(), &params(), credential()).await else {
            panic!("expected an upstream error");
        };
        assert_eq!(err.status_code(), 429);

        let err = relay.complete(&path(), &params(), credential()).await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_complete_returns_whole_answer() {
        let provider = Arc::new(ScriptedProvider::replying(&["Hi", " there"]));
        let relay = CompletionRelay::new(provider.clone());
        let response = relay.complete(&path(), &params(), credential()).await.unwrap();
        assert_eq!(response.answer_text(), "Hi there");
        let sent = provider.requests();
        assert!(!sent[0].stream);
        assert_eq!(sent[0].max_tokens, Some(64));
    }
}
