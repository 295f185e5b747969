//! Conversation and message models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::core::ids::{ConversationId, MessageId, blank_as_none};

/// Maximum stored title length, in characters.
pub const MAX_TITLE_CHARS: usize = 64;

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Model answer.
    Assistant,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|bad: String| FromSqlError::Other(format!("invalid role: {bad}").into()))
    }
}

/// A stored message node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Node id.
    pub id: MessageId,
    /// Preceding node, `None` for a root.
    pub parent: Option<MessageId>,
    /// Author.
    pub role: Role,
    /// Text payload.
    pub content: String,
    /// Creation time; non-decreasing within a conversation.
    pub created_at: DateTime<Utc>,
}

/// A message as submitted by the caller, one element of a root→tip path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathMessage {
    /// Node id; absent for turns that were never stored.
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Preceding node id.
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub parent: Option<MessageId>,
    /// Author.
    pub role: Role,
    /// Text payload.
    pub content: String,
}

impl PathMessage {
    /// Build an un-stored turn.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            parent: None,
            role,
            content: content.into(),
        }
    }

    /// Attach an id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a parent id.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<MessageId>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Generation parameters forwarded to the provider and remembered on the conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Target model identifier.
    pub model: String,
    /// Token budget for the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Conversation metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    /// Conversation id.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Model used by the latest exchange.
    pub model: String,
    /// Token budget used by the latest exchange.
    pub max_tokens: Option<u32>,
    /// Temperature used by the latest exchange.
    pub temperature: Option<f64>,
    /// Leaf the UI is currently viewing.
    pub current_node_id: Option<MessageId>,
    /// Creation time, serialized as Unix milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Last activity time, serialized as Unix milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// What the caller knows about the conversation an exchange belongs to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeMeta {
    /// Existing conversation, or `None` for a first save.
    pub conversation_id: Option<ConversationId>,
    /// Parameters used for the exchange.
    pub params: GenerationParams,
}

/// Collapse whitespace and clamp a title to [`MAX_TITLE_CHARS`].
#[must_use]
pub fn normalize_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_path_message_from_client_json() {
        let raw = r#"{"id":"","parent":"","role":"user","content":"hi"}"#;
        let message: PathMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message, PathMessage::new(Role::User, "hi"));
    }

    #[test]
    fn test_meta_timestamps_are_millis() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let meta = ConversationMeta {
            id: ConversationId::from("c"),
            title: String::new(),
            model: "gpt".to_string(),
            max_tokens: None,
            temperature: None,
            current_node_id: None,
            created_at: at,
            updated_at: at,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["created_at"], 1_700_000_000_123_i64);
        assert_eq!(json["updated_at"], 1_700_000_000_123_i64);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  hello \n  world "), "hello world");
        let long = "x".repeat(100);
        assert_eq!(normalize_title(&long).chars().count(), MAX_TITLE_CHARS);
    }
}
