//! Conversation graph service.
//!
//! Messages are stored flat; the tree is implied by `parent` links. The path a
//! completion continues is always the explicit list the caller submits, so the
//! service only validates and normalizes that list. `current_node_id` is a UI
//! cursor and never drives generation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::conversations::store::{ConversationStore, Ownership};
use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::{ConversationId, MessageId, UserId};
use crate::core::types::{ConversationMeta, Message, PathMessage, normalize_title};

/// Read-side and cursor operations over the message forest.
#[derive(Clone)]
pub struct ConversationGraph {
    store: Arc<dyn ConversationStore>,
}

impl ConversationGraph {
    /// Create a graph service over a store.
    #[must_use]
    pub const fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Load a conversation and all its messages in creation order.
    ///
    /// # Errors
    /// Returns `NotFound` if the conversation is missing or owned by someone else.
    pub async fn resolve_path(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> ChatResult<(ConversationMeta, Vec<Message>)> {
        let stored = self
            .store
            .load_conversation(uid.clone(), conversation_id.clone())
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))?;
        Ok((stored.meta, stored.messages))
    }

    /// List the caller's conversations, most recently active first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn list_conversations(&self, uid: &UserId) -> ChatResult<Vec<ConversationMeta>> {
        self.store.list_conversations(uid.clone()).await
    }

    /// Rename a conversation.
    ///
    /// # Errors
    /// Returns `Validation` for a blank title, `Forbidden` if another user owns
    /// the conversation, `NotFound` if it does not exist.
    pub async fn rename_conversation(
        &self,
        uid: &UserId,
        conversation_id: &ConversationId,
        title: &str,
    ) -> ChatResult<()> {
        let title = normalize_title(title);
        if title.is_empty() {
            return Err(ChatError::Validation("title must not be empty".to_string()));
        }
        self.store
            .update_title(uid.clone(), conversation_id.clone(), title)
            .await?;
        debug!(conversation = %conversation_id, "Renamed conversation");
        Ok(())
    }

    /// Fail unless `uid` owns a live conversation with this id.
    ///
    /// # Errors
    /// Returns `Forbidden` or `NotFound`.
    pub async fn ensure_owned(&self, uid: &UserId, conversation_id: &ConversationId) -> ChatResult<()> {
        match self
            .store
            .ownership(uid.clone(), conversation_id.clone())
            .await?
        {
            Ownership::Owned => Ok(()),
            Ownership::Foreign => Err(ChatError::Forbidden(conversation_id.to_string())),
            Ownership::Missing => Err(ChatError::NotFound(format!(
                "conversation {conversation_id}"
            ))),
        }
    }

    /// Materialize the root→leaf branch ending at `leaf`.
    ///
    /// # Errors
    /// Returns `NotFound` if the conversation or the leaf does not resolve.
    pub async fn resolve_branch(
        &self,
        uid: &UserId,
        conversation_id: &ConversationId,
        leaf: &MessageId,
    ) -> ChatResult<Vec<Message>> {
        let (_, messages) = self.resolve_path(conversation_id, uid).await?;
        branch_to(messages, leaf)
    }

    /// Point the UI cursor at an existing message.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` if the conversation or node does not resolve.
    pub async fn select_node(
        &self,
        uid: &UserId,
        conversation_id: &ConversationId,
        node: &MessageId,
    ) -> ChatResult<()> {
        self.store
            .set_current_node(uid.clone(), conversation_id.clone(), node.clone())
            .await
    }

    /// Soft-delete a conversation.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` or a storage error.
    pub async fn archive_conversation(
        &self,
        uid: &UserId,
        conversation_id: &ConversationId,
    ) -> ChatResult<()> {
        self.store
            .archive_conversation(uid.clone(), conversation_id.clone())
            .await
    }

    /// Validate a caller-supplied path and give every message an id and a parent link.
    ///
    /// Each explicit `parent` must name the preceding message of the path. Only the
    /// tail after the last id'd message may arrive without ids; those get fresh
    /// ones. Messages without a parent are chained to their predecessor.
    ///
    /// # Errors
    /// Returns `Validation` for an empty path, duplicate ids, an id'd message
    /// following an un-id'd one, or a broken chain.
    pub fn prepare_path(messages: Vec<PathMessage>) -> ChatResult<Vec<PathMessage>> {
        if messages.is_empty() {
            return Err(ChatError::Validation("messages must not be empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(messages.len());
        let mut previous: Option<MessageId> = None;
        let mut prepared = Vec::with_capacity(messages.len());
        let mut drafting = false;

        for (index, mut message) in messages.into_iter().enumerate() {
            let id = match message.id.take() {
                Some(id) if drafting => {
                    return Err(ChatError::Validation(format!(
                        "message {index} carries id {id} after a message without one"
                    )));
                }
                Some(id) => id,
                None => {
                    drafting = true;
                    MessageId::generate()
                }
            };
            if !seen.insert(id.clone()) {
                return Err(ChatError::Validation(format!(
                    "message id {id} appears twice in the path"
                )));
            }

            match (&message.parent, &previous) {
                (Some(parent), Some(expected)) if parent != expected => {
                    return Err(ChatError::Validation(format!(
                        "message {index} names parent {parent} but follows {expected}"
                    )));
                }
                (Some(parent), None) => {
                    return Err(ChatError::Validation(format!(
                        "first message cannot have parent {parent}"
                    )));
                }
                _ => {}
            }

            message.parent = previous.take();
            message.id = Some(id.clone());
            previous = Some(id);
            prepared.push(message);
        }

        Ok(prepared)
    }
}

/// Walk parent links from `leaf` back to its root and return the branch root-first.
///
/// # Errors
/// Returns `NotFound` if `leaf` is unknown, `Validation` if the links are broken
/// or cyclic.
pub fn branch_to(messages: Vec<Message>, leaf: &MessageId) -> ChatResult<Vec<Message>> {
    let mut by_id: HashMap<MessageId, Message> = messages
        .into_iter()
        .map(|message| (message.id.clone(), message))
        .collect();

    let mut branch = Vec::new();
    let mut cursor = Some(leaf.clone());
    while let Some(id) = cursor {
        let Some(message) = by_id.remove(&id) else {
            if branch.is_empty() {
                return Err(ChatError::NotFound(format!("message {id}")));
            }
            return Err(ChatError::Validation(format!(
                "branch ending at {leaf} is broken at {id}"
            )));
        };
        cursor = message.parent.clone();
        branch.push(message);
    }

    branch.reverse();
    Ok(branch)
}
