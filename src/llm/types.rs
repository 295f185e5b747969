//! Wire types exchanged with an OpenAI-compatible completion provider.
//!
//! Unknown fields are kept in `extra` maps so responses and chunks can be
//! relayed to the browser verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::{GenerationParams, PathMessage};

/// Bearer credential for the upstream provider. Passed through, never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse an `Authorization` header value of the form `Bearer <token>`.
    #[must_use]
    pub fn from_bearer(header: &str) -> Option<Self> {
        let token = header.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    /// Raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One prompt turn as sent upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Author role.
    pub role: String,
    /// Text payload.
    pub content: String,
}

/// Body of a `/chat/completions` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Target model.
    pub model: String,
    /// Root→tip prompt.
    pub messages: Vec<PromptMessage>,
    /// Token budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Whether the provider should stream chunks.
    pub stream: bool,
}

impl CompletionRequest {
    /// Build a request for a path. Ids and parents stay server-side.
    #[must_use]
    pub fn new(path: &[PathMessage], params: &GenerationParams, stream: bool) -> Self {
        Self {
            model: params.model.clone(),
            messages: path
                .iter()
                .map(|message| PromptMessage {
                    role: message.role.to_string(),
                    content: message.content.clone(),
                })
                .collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream,
        }
    }
}

/// Incremental content of a streamed choice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, usually only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One choice of a streamed chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// Incremental content.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Set on the last chunk of the choice.
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One streamed `chat.completion.chunk`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Chunk id; overwritten with the answer id before relaying.
    #[serde(default)]
    pub id: String,
    /// Choices carried by this chunk.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompletionChunk {
    /// Text of the first choice, empty when absent.
    #[must_use]
    pub fn text(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .unwrap_or_default()
    }

    /// Build a single-choice text chunk.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: Some(text.into()),
                    ..ChunkDelta::default()
                },
                ..ChunkChoice::default()
            }],
            ..Self::default()
        }
    }
}

/// Message of a whole-response choice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Author role.
    #[serde(default)]
    pub role: String,
    /// Answer text.
    #[serde(default)]
    pub content: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One choice of a whole response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChoice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// Generated message.
    #[serde(default)]
    pub message: ResponseMessage,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A whole `chat.completion` response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response id.
    #[serde(default)]
    pub id: String,
    /// Generated choices.
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
    /// Fields this crate does not interpret (usage, model, created...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompletionResponse {
    /// Text of the first choice, empty when absent.
    #[must_use]
    pub fn answer_text(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default()
    }

    /// Build a single-choice assistant response.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ResponseChoice {
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: Some(text.into()),
                    ..ResponseMessage::default()
                },
                ..ResponseChoice::default()
            }],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(
            Credential::from_bearer("Bearer sk-123").map(|c| c.expose().to_string()),
            Some("sk-123".to_string())
        );
        assert!(Credential::from_bearer("Basic abc").is_none());
        assert!(Credential::from_bearer("Bearer   ").is_none());
        assert_eq!(format!("{:?}", Credential::new("secret")), "Credential(***)");
    }

    #[test]
    fn test_request_omits_unset_params() {
        let path = vec![PathMessage::new(Role::User, "hi").with_id("u1")];
        let params = GenerationParams {
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: Some(0.5),
        };
        let json = serde_json::to_value(CompletionRequest::new(&path, &params, true)).unwrap();
        assert_eq!(json["messages"][0], serde_json::json!({"role": "user", "content": "hi"}));
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_chunk_keeps_unknown_fields() {
        let raw = r#"{"id":"up-1","object":"chat.completion.chunk","created":1,"model":"m",
            "choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null,"logprobs":null}]}"#;
        let mut chunk: CompletionChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.text(), "Hel");
        chunk.id = "answer".to_string();
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["id"], "answer");
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["model"], "m");
        assert!(json["choices"][0].get("logprobs").is_some());
    }

    #[test]
    fn test_response_answer_text() {
        let raw = r#"{"id":"r","choices":[{"index":0,"message":{"role":"assistant","content":"Hi!"},
            "finish_reason":"stop"}],"usage":{"total_tokens":3}}"#;
        let response: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.answer_text(), "Hi!");
        assert_eq!(response.extra["usage"]["total_tokens"], 3);
        assert_eq!(CompletionResponse::default().answer_text(), "");
    }
}
