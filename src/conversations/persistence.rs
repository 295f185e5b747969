//! Atomic persistence of completed exchanges.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::conversations::store::{ConversationStore, MetaUpdate, NewMessage};
use crate::core::errors::ChatResult;
use crate::core::ids::{ConversationId, MessageId, UserId};
use crate::core::types::{ConversationMeta, ExchangeMeta, PathMessage, Role, normalize_title};

/// Where a committed exchange landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedExchange {
    /// Conversation holding the exchange (new or existing).
    pub conversation_id: ConversationId,
    /// Id of the stored assistant answer.
    pub answer_id: MessageId,
    /// Ids of the saved branch, root first, ending with the answer.
    pub message_ids: Vec<MessageId>,
    /// Whether this commit created the conversation.
    pub created: bool,
}

/// Commits a submitted path plus its generated answer as one unit.
#[derive(Clone)]
pub struct PersistenceCoordinator {
    store: Arc<dyn ConversationStore>,
}

impl PersistenceCoordinator {
    /// Create a coordinator over a store.
    #[must_use]
    pub const fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Store the answer under the last persisted path message and update the conversation.
    ///
    /// A first save (no conversation id) creates the conversation under `answer_id`.
    /// Either every row of the exchange becomes visible or none does.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` when the caller does not own the target
    /// conversation, `Validation` when a parent link dangles, or a storage error.
    pub async fn commit_exchange(
        &self,
        uid: &UserId,
        meta: &ExchangeMeta,
        path: &[PathMessage],
        answer_text: &str,
        answer_id: &MessageId,
    ) -> ChatResult<CommittedExchange> {
        let mut messages: Vec<NewMessage> = path
            .iter()
            .filter_map(|message| {
                message.id.clone().map(|id| NewMessage {
                    id,
                    parent: message.parent.clone(),
                    role: message.role,
                    content: message.content.clone(),
                })
            })
            .collect();
        messages.push(NewMessage {
            id: answer_id.clone(),
            parent: last_persisted_id(path),
            role: Role::Assistant,
            content: answer_text.to_string(),
        });
        let count = messages.len();
        let message_ids: Vec<MessageId> = messages.iter().map(|message| message.id.clone()).collect();

        let Some(conversation_id) = meta.conversation_id.clone() else {
            let conversation_id = ConversationId::from(answer_id.clone());
            let now = Utc::now();
            let created = ConversationMeta {
                id: conversation_id.clone(),
                title: default_title(path),
                model: meta.params.model.clone(),
                max_tokens: meta.params.max_tokens,
                temperature: meta.params.temperature,
                current_node_id: Some(answer_id.clone()),
                created_at: now,
                updated_at: now,
            };
            self.store
                .create_conversation(uid.clone(), created, messages)
                .await?;
            info!(conversation = %conversation_id, messages = count, "Saved new conversation");
            return Ok(CommittedExchange {
                conversation_id,
                answer_id: answer_id.clone(),
                message_ids,
                created: true,
            });
        };

        let update = MetaUpdate {
            id: conversation_id.clone(),
            params: meta.params.clone(),
            current_node_id: answer_id.clone(),
        };
        self.store
            .append_exchange(uid.clone(), update, messages)
            .await?;
        info!(conversation = %conversation_id, answer = %answer_id, "Saved exchange");
        Ok(CommittedExchange {
            conversation_id,
            answer_id: answer_id.clone(),
            message_ids,
            created: false,
        })
    }
}

/// Id of the last path message that carries one; un-id'd messages never anchor a branch.
#[must_use]
pub fn last_persisted_id(path: &[PathMessage]) -> Option<MessageId> {
    path.iter()
        .rev()
        .find_map(|message| message.id.clone().filter(|id| !id.is_blank()))
}

fn default_title(path: &[PathMessage]) -> String {
    path.iter()
        .find(|message| message.role == Role::User)
        .map(|message| normalize_title(&message.content))
        .unwrap_or_default()
}
