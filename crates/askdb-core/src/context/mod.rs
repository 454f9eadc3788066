//! Context Store: durable per-user conversational state.
//!
//! Two backends share one contract. [`InMemoryContextStore`] lives for the process;
//! [`SledContextStore`] survives restarts. Both serialize updates per user behind
//! [`UserLocks`] so concurrent merges for one user are never lost.

mod lock;
mod memory;
mod sled_store;
mod types;

pub use lock::UserLocks;
pub use memory::InMemoryContextStore;
pub use sled_store::SledContextStore;
pub use types::{
    ChatMessage, ContextLimits, ContextUpdate, ConversationContext, MemoryBlock, QueryHistoryEntry,
    ResultSummary, Role, QUERY_HISTORY_LIMIT,
};

use crate::error::ContextError;
use crate::shared::CoreConfig;
use std::sync::Arc;

#[async_trait::async_trait]
pub trait ContextStore: Send + Sync {
    /// Returns the user's context, creating and persisting an empty one on first access.
    async fn get(&self, user_id: &str) -> Result<ConversationContext, ContextError>;

    /// Merges `update` into the user's context (creating it if needed) and returns the result.
    async fn update(
        &self,
        user_id: &str,
        update: ContextUpdate,
    ) -> Result<ConversationContext, ContextError>;

    /// Removes the user's context. The next `get` yields a fresh one.
    async fn clear(&self, user_id: &str) -> Result<(), ContextError>;

    /// Removes every context idle longer than the configured expiration. Returns the count removed.
    async fn sweep_expired(&self) -> Result<usize, ContextError>;

    fn limits(&self) -> &ContextLimits;

    /// Appends a long-term memory block and returns it.
    async fn add_memory(
        &self,
        user_id: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<MemoryBlock, ContextError> {
        let block = MemoryBlock::new(content, metadata);
        let update = ContextUpdate {
            memory_blocks: vec![block.clone()],
            ..ContextUpdate::default()
        };
        self.update(user_id, update).await?;
        Ok(block)
    }

    /// The most recent memory blocks, bounded by `memory_retrieval_limit`.
    async fn memories(&self, user_id: &str) -> Result<Vec<MemoryBlock>, ContextError> {
        let ctx = self.get(user_id).await?;
        Ok(ctx.recent_memories(self.limits().memory_retrieval_limit))
    }
}

/// Opens the backend named by `config.context_backend` ("memory" or "sled").
pub fn open_context_store(config: &CoreConfig) -> Result<Arc<dyn ContextStore>, ContextError> {
    let limits = ContextLimits::from_config(config);
    match config.context_backend.as_str() {
        "sled" => {
            let store = SledContextStore::open(config.context_db_path(), limits)?;
            Ok(Arc::new(store))
        }
        other => {
            if other != "memory" {
                tracing::warn!(
                    target: "askdb::context",
                    backend = %other,
                    "Unknown context backend; falling back to in-memory store"
                );
            }
            Ok(Arc::new(InMemoryContextStore::new(limits)))
        }
    }
}
