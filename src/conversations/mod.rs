//! Conversation message graph: storage, graph queries and exchange persistence.
//!
//! - `store`: SQLite tables for conversations and message nodes
//! - `graph`: ownership checks, path validation and branch resolution
//! - `persistence`: the single transaction that commits an exchange

pub mod graph;
pub mod persistence;
pub mod store;

pub use graph::{ConversationGraph, branch_to};
pub use persistence::{CommittedExchange, PersistenceCoordinator, last_persisted_id};
pub use store::{
    ConversationStore, MetaUpdate, NewMessage, Ownership, SqliteConversationStore, StoreFuture,
    StoredConversation,
};
