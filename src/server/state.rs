//! Application state shared across all request handlers.

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::conversations::{
    ConversationGraph, ConversationStore, PersistenceCoordinator, SqliteConversationStore,
};
use crate::core::errors::ChatResult;
use crate::llm::{CompletionProvider, OpenAiCompatibleProvider};
use crate::relay::CompletionRelay;

/// Shared application state.
pub struct AppState {
    /// Runtime configuration.
    pub config: AppConfig,
    /// Conversation queries and ownership checks.
    pub graph: ConversationGraph,
    /// Upstream completion relay.
    pub relay: CompletionRelay,
    /// Exchange persistence.
    pub coordinator: PersistenceCoordinator,
}

impl AppState {
    /// Open the database and build the upstream client.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the client cannot be built.
    pub async fn new(config: AppConfig) -> ChatResult<Arc<Self>> {
        let store = SqliteConversationStore::open(&config.storage.db_path).await?;
        info!(path = %config.storage.db_path.display(), "Conversation store ready");
        let provider = OpenAiCompatibleProvider::new(&config.upstream.openai()?)?;
        info!(base_url = %config.upstream.base_url, "Upstream provider configured");
        Ok(Self::from_parts(config, Arc::new(store), Arc::new(provider)))
    }

    /// Assemble state from already-built collaborators.
    #[must_use]
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            graph: ConversationGraph::new(Arc::clone(&store)),
            relay: CompletionRelay::new(provider),
            coordinator: PersistenceCoordinator::new(store),
        })
    }
}
