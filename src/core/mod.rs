//! Core types, identifiers and errors.

pub mod errors;
pub mod ids;
pub mod types;

pub use errors::{ChatError, ChatResult, DEFAULT_UPSTREAM_STATUS};
pub use ids::{ConversationId, MessageId, UserId};
pub use types::{
    ConversationMeta, ExchangeMeta, GenerationParams, MAX_TITLE_CHARS, Message, PathMessage, Role,
    normalize_title,
};
