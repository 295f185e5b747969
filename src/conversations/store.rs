//! SQLite-backed conversation and message store.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::{ConversationId, MessageId, UserId};
use crate::core::types::{ConversationMeta, GenerationParams, Message, Role};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message about to be inserted. The store assigns `created_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    /// Node id.
    pub id: MessageId,
    /// Preceding node, `None` for a root.
    pub parent: Option<MessageId>,
    /// Author.
    pub role: Role,
    /// Text payload.
    pub content: String,
}

/// Mutable conversation fields written by an exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaUpdate {
    /// Conversation being updated.
    pub id: ConversationId,
    /// Parameters of the exchange.
    pub params: GenerationParams,
    /// New cursor, always one of the messages inserted alongside.
    pub current_node_id: MessageId,
}

/// A conversation with its live messages in creation order.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredConversation {
    /// Metadata.
    pub meta: ConversationMeta,
    /// Messages ordered by `created_at`, then insertion order.
    pub messages: Vec<Message>,
}

/// Relation between a caller and a conversation id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ownership {
    /// Live conversation owned by the caller.
    Owned,
    /// Live conversation owned by someone else.
    Foreign,
    /// No live conversation with this id.
    Missing,
}

/// Trait for conversation storage.
pub trait ConversationStore: Send + Sync {
    /// Classify `id` relative to `uid`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn ownership(&self, uid: UserId, id: ConversationId) -> StoreFuture<'_, ChatResult<Ownership>>;

    /// Load a live conversation owned by `uid`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_conversation(
        &self,
        uid: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Option<StoredConversation>>>;

    /// List live conversations of `uid`, most recently active first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_conversations(&self, uid: UserId) -> StoreFuture<'_, ChatResult<Vec<ConversationMeta>>>;

    /// Create a conversation and its first messages in one transaction.
    ///
    /// # Errors
    /// Returns a validation error on a dangling parent, or a storage error.
    /// Nothing is written on failure.
    fn create_conversation(
        &self,
        uid: UserId,
        meta: ConversationMeta,
        messages: Vec<NewMessage>,
    ) -> StoreFuture<'_, ChatResult<()>>;

    /// Insert messages, then update the conversation metadata, in one transaction.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` when the ownership predicate matches no row,
    /// a validation error on a dangling parent, or a storage error.
    /// Nothing is written on failure.
    fn append_exchange(
        &self,
        uid: UserId,
        update: MetaUpdate,
        messages: Vec<NewMessage>,
    ) -> StoreFuture<'_, ChatResult<()>>;

    /// Rename a conversation.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` or a storage error.
    fn update_title(
        &self,
        uid: UserId,
        id: ConversationId,
        title: String,
    ) -> StoreFuture<'_, ChatResult<()>>;

    /// Move the UI cursor to an existing message.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` or a storage error.
    fn set_current_node(
        &self,
        uid: UserId,
        id: ConversationId,
        node: MessageId,
    ) -> StoreFuture<'_, ChatResult<()>>;

    /// Soft-delete a conversation and its messages.
    ///
    /// # Errors
    /// Returns `Forbidden`/`NotFound` or a storage error.
    fn archive_conversation(&self, uid: UserId, id: ConversationId)
    -> StoreFuture<'_, ChatResult<()>>;
}

/// Result of a write transaction, decided inside the connection thread.
#[derive(Debug)]
enum WriteOutcome {
    Applied,
    Rejected(Ownership),
    DanglingParent { message: MessageId, parent: MessageId },
    UnknownNode(MessageId),
}

impl WriteOutcome {
    fn into_result(self, id: &ConversationId) -> ChatResult<()> {
        match self {
            Self::Applied | Self::Rejected(Ownership::Owned) => Ok(()),
            Self::Rejected(Ownership::Foreign) => Err(ChatError::Forbidden(id.to_string())),
            Self::Rejected(Ownership::Missing) => {
                Err(ChatError::NotFound(format!("conversation {id}")))
            }
            Self::DanglingParent { message, parent } => Err(ChatError::Validation(format!(
                "parent {parent} of message {message} does not exist in conversation {id}"
            ))),
            Self::UnknownNode(node) => Err(ChatError::NotFound(format!("message {node}"))),
        }
    }
}

const META_COLUMNS: &str =
    "id, title, model, max_tokens, temperature, current_node_id, created_at, updated_at";

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Open (or create) the database file and initialize the schema.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> ChatResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::new(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::new(conn).await
    }

    /// Initialize the store on an existing connection and create the tables.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Connection) -> ChatResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    uid TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    model TEXT NOT NULL DEFAULT '',
                    max_tokens INTEGER,
                    temperature REAL,
                    current_node_id TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_conversations_uid_updated
                    ON conversations (uid, deleted_at, updated_at DESC);
                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT NOT NULL,
                    conversation_id TEXT NOT NULL,
                    parent TEXT,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    PRIMARY KEY (conversation_id, id)
                );
                CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
                    ON messages (conversation_id, created_at);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

fn millis_to_datetime(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, millis))
}

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMeta> {
    Ok(ConversationMeta {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        max_tokens: row.get(3)?,
        temperature: row.get(4)?,
        current_node_id: row.get(5)?,
        created_at: millis_to_datetime(6, row.get(6)?)?,
        updated_at: millis_to_datetime(7, row.get(7)?)?,
    })
}

fn ownership_of(
    conn: &rusqlite::Connection,
    uid: &UserId,
    id: &ConversationId,
) -> rusqlite::Result<Ownership> {
    let owner: Option<UserId> = conn
        .query_row(
            "SELECT uid FROM conversations WHERE id = ?1 AND deleted_at IS NULL",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match owner {
        None => Ownership::Missing,
        Some(owner) if &owner == uid => Ownership::Owned,
        Some(_) => Ownership::Foreign,
    })
}

fn message_exists(
    conn: &rusqlite::Connection,
    conversation_id: &ConversationId,
    id: &MessageId,
) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM messages
             WHERE conversation_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            rusqlite::params![conversation_id, id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert the messages that are not stored yet, in order, checking parents.
///
/// Messages already present keep their original content: ids are immutable.
fn insert_messages(
    conn: &rusqlite::Connection,
    conversation_id: &ConversationId,
    messages: Vec<NewMessage>,
    now_ms: i64,
) -> rusqlite::Result<WriteOutcome> {
    let floor: Option<i64> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
        rusqlite::params![conversation_id],
        |row| row.get(0),
    )?;
    let created_at = floor.map_or(now_ms, |floor| floor.max(now_ms));

    let mut stmt = conn.prepare(
        "INSERT INTO messages (id, conversation_id, parent, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for message in messages {
        if message_exists(conn, conversation_id, &message.id)? {
            continue;
        }
        if let Some(parent) = &message.parent {
            if !message_exists(conn, conversation_id, parent)? {
                return Ok(WriteOutcome::DanglingParent {
                    message: message.id,
                    parent: parent.clone(),
                });
            }
        }
        stmt.execute(rusqlite::params![
            message.id,
            conversation_id,
            message.parent,
            message.role,
            message.content,
            created_at
        ])?;
    }
    Ok(WriteOutcome::Applied)
}

impl ConversationStore for SqliteConversationStore {
    fn ownership(&self, uid: UserId, id: ConversationId) -> StoreFuture<'_, ChatResult<Ownership>> {
        Box::pin(async move {
            let ownership = self
                .conn
                .call(move |conn| Ok(ownership_of(conn, &uid, &id)?))
                .await?;
            Ok(ownership)
        })
    }

    fn load_conversation(
        &self,
        uid: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Option<StoredConversation>>> {
        Box::pin(async move {
            let loaded = self
                .conn
                .call(move |conn| {
                    let meta = conn
                        .query_row(
                            &format!(
                                "SELECT {META_COLUMNS} FROM conversations
                                 WHERE id = ?1 AND uid = ?2 AND deleted_at IS NULL"
                            ),
                            rusqlite::params![id, uid],
                            meta_from_row,
                        )
                        .optional()?;
                    let Some(meta) = meta else {
                        return Ok(None);
                    };

                    let mut stmt = conn.prepare(
                        "SELECT id, parent, role, content, created_at
                         FROM messages
                         WHERE conversation_id = ?1 AND deleted_at IS NULL
                         ORDER BY created_at, rowid",
                    )?;
                    let messages = stmt
                        .query_map(rusqlite::params![id], |row| {
                            Ok(Message {
                                id: row.get(0)?,
                                parent: row.get(1)?,
                                role: row.get(2)?,
                                content: row.get(3)?,
                                created_at: millis_to_datetime(4, row.get(4)?)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;

                    Ok(Some(StoredConversation { meta, messages }))
                })
                .await?;
            Ok(loaded)
        })
    }

    fn list_conversations(&self, uid: UserId) -> StoreFuture<'_, ChatResult<Vec<ConversationMeta>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {META_COLUMNS} FROM conversations
                         WHERE uid = ?1 AND deleted_at IS NULL
                         ORDER BY updated_at DESC, id ASC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![uid], meta_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn create_conversation(
        &self,
        uid: UserId,
        meta: ConversationMeta,
        messages: Vec<NewMessage>,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let id = meta.id.clone();
            let count = messages.len();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "INSERT INTO conversations
                         (id, uid, title, model, max_tokens, temperature, current_node_id,
                          created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        rusqlite::params![
                            meta.id,
                            uid,
                            meta.title,
                            meta.model,
                            meta.max_tokens,
                            meta.temperature,
                            meta.current_node_id,
                            meta.created_at.timestamp_millis(),
                            meta.updated_at.timestamp_millis()
                        ],
                    )?;
                    let outcome = insert_messages(
                        &tx,
                        &meta.id,
                        messages,
                        meta.created_at.timestamp_millis(),
                    )?;
                    if matches!(outcome, WriteOutcome::Applied) {
                        tx.commit()?;
                    }
                    Ok(outcome)
                })
                .await?;
            outcome.into_result(&id)?;
            debug!(conversation = %id, messages = count, "Created conversation");
            Ok(())
        })
    }

    fn append_exchange(
        &self,
        uid: UserId,
        update: MetaUpdate,
        messages: Vec<NewMessage>,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let id = update.id.clone();
            let now_ms = Utc::now().timestamp_millis();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let inserted = insert_messages(&tx, &update.id, messages, now_ms)?;
                    if !matches!(inserted, WriteOutcome::Applied) {
                        return Ok(inserted);
                    }

                    let updated = tx.execute(
                        "UPDATE conversations
                         SET model = ?1, max_tokens = ?2, temperature = ?3,
                             current_node_id = ?4, updated_at = ?5
                         WHERE id = ?6 AND uid = ?7 AND deleted_at IS NULL",
                        rusqlite::params![
                            update.params.model,
                            update.params.max_tokens,
                            update.params.temperature,
                            update.current_node_id,
                            now_ms,
                            update.id,
                            uid
                        ],
                    )?;
                    if updated == 0 {
                        // Dropping `tx` rolls back the inserted messages.
                        return Ok(WriteOutcome::Rejected(ownership_of(&tx, &uid, &update.id)?));
                    }

                    tx.commit()?;
                    Ok(WriteOutcome::Applied)
                })
                .await?;
            outcome.into_result(&id)
        })
    }

    fn update_title(
        &self,
        uid: UserId,
        id: ConversationId,
        title: String,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let target = id.clone();
            let outcome = self
                .conn
                .call(move |conn| {
                    let updated = conn.execute(
                        "UPDATE conversations SET title = ?1
                         WHERE id = ?2 AND uid = ?3 AND deleted_at IS NULL",
                        rusqlite::params![title, id, uid],
                    )?;
                    if updated == 0 {
                        return Ok(WriteOutcome::Rejected(ownership_of(conn, &uid, &id)?));
                    }
                    Ok(WriteOutcome::Applied)
                })
                .await?;
            outcome.into_result(&target)
        })
    }

    fn set_current_node(
        &self,
        uid: UserId,
        id: ConversationId,
        node: MessageId,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let target = id.clone();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let ownership = ownership_of(&tx, &uid, &id)?;
                    if ownership != Ownership::Owned {
                        return Ok(WriteOutcome::Rejected(ownership));
                    }
                    if !message_exists(&tx, &id, &node)? {
                        return Ok(WriteOutcome::UnknownNode(node));
                    }
                    tx.execute(
                        "UPDATE conversations SET current_node_id = ?1 WHERE id = ?2 AND uid = ?3",
                        rusqlite::params![node, id, uid],
                    )?;
                    tx.commit()?;
                    Ok(WriteOutcome::Applied)
                })
                .await?;
            outcome.into_result(&target)
        })
    }

    fn archive_conversation(
        &self,
        uid: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let target = id.clone();
            let now_ms = Utc::now().timestamp_millis();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let updated = tx.execute(
                        "UPDATE conversations SET deleted_at = ?1
                         WHERE id = ?2 AND uid = ?3 AND deleted_at IS NULL",
                        rusqlite::params![now_ms, id, uid],
                    )?;
                    if updated == 0 {
                        return Ok(WriteOutcome::Rejected(ownership_of(&tx, &uid, &id)?));
                    }
                    tx.execute(
                        "UPDATE messages SET deleted_at = ?1
                         WHERE conversation_id = ?2 AND deleted_at IS NULL",
                        rusqlite::params![now_ms, id],
                    )?;
                    tx.commit()?;
                    Ok(WriteOutcome::Applied)
                })
                .await?;
            outcome.into_result(&target)
        })
    }
}
