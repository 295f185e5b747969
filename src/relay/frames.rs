//! Server-sent event framing for the browser-facing stream.

use serde::Serialize;

use crate::core::errors::ChatResult;
use crate::core::ids::{ConversationId, MessageId};
use crate::llm::sse::DONE_MARKER;
use crate::llm::types::CompletionChunk;

/// Name of the event carrying the save status.
pub const SAVE_EVENT: &str = "save";

/// Outcome of the save that follows a stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Whether the exchange was committed.
    pub saved: bool,
    /// Conversation holding the exchange, when saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Ids of the saved branch, root first, ending with the answer.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<MessageId>,
    /// Failure message, when not saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveReport {
    /// Successful save.
    #[must_use]
    pub const fn saved(conversation_id: ConversationId, message_ids: Vec<MessageId>) -> Self {
        Self {
            saved: true,
            conversation_id: Some(conversation_id),
            message_ids,
            error: None,
        }
    }

    /// Failed save.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            saved: false,
            conversation_id: None,
            message_ids: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// `data: <json>\n\n`
///
/// # Errors
/// Returns an error if the chunk cannot be serialized.
pub fn data_frame(chunk: &CompletionChunk) -> ChatResult<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(chunk)?))
}

/// `data: [DONE]\n\n`
#[must_use]
pub fn done_frame() -> String {
    format!("data: {DONE_MARKER}\n\n")
}

/// `event: save\ndata: <json>\n\n`
///
/// # Errors
/// Returns an error if the report cannot be serialized.
pub fn save_frame(report: &SaveReport) -> ChatResult<String> {
    Ok(format!(
        "event: {SAVE_EVENT}\ndata: {}\n\n",
        serde_json::to_string(report)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames() {
        let mut chunk = CompletionChunk::from_text("hi");
        chunk.id = "a1".to_string();
        let frame = data_frame(&chunk).unwrap();
        assert!(frame.starts_with("data: {\"id\":\"a1\""));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(done_frame(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_save_frame_omits_absent_fields() {
        let report = SaveReport::saved(
            ConversationId::from("c1"),
            vec![MessageId::from("u1"), MessageId::from("c1")],
        );
        assert_eq!(
            save_frame(&report).unwrap(),
            "event: save\ndata: {\"saved\":true,\"conversation_id\":\"c1\",\"message_ids\":[\"u1\",\"c1\"]}\n\n"
        );
        let failed = save_frame(&SaveReport::failed("disk full")).unwrap();
        assert_eq!(
            failed,
            "event: save\ndata: {\"saved\":false,\"error\":\"disk full\"}\n\n"
        );
    }
}
