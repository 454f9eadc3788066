use super::lock::UserLocks;
use super::types::{ContextLimits, ContextUpdate, ConversationContext};
use super::ContextStore;
use crate::error::ContextError;
use crate::shared::now_ms;
use dashmap::DashMap;

/// Process-lifetime store. Contexts are lost on restart.
#[derive(Debug)]
pub struct InMemoryContextStore {
    contexts: DashMap<String, ConversationContext>,
    locks: UserLocks,
    limits: ContextLimits,
}

impl InMemoryContextStore {
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            contexts: DashMap::new(),
            locks: UserLocks::new(),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(ContextLimits::default())
    }
}

#[async_trait::async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, user_id: &str) -> Result<ConversationContext, ContextError> {
        let mut entry = self.contexts.entry(user_id.to_string()).or_insert_with(|| {
            tracing::debug!(target: "askdb::context", user_id = %user_id, "Created context");
            ConversationContext::new(user_id)
        });
        entry.touch();
        Ok(entry.clone())
    }

    async fn update(
        &self,
        user_id: &str,
        update: ContextUpdate,
    ) -> Result<ConversationContext, ContextError> {
        let guard = self.locks.acquire(user_id, self.limits.lock_timeout).await?;
        let merged = {
            let mut entry = self
                .contexts
                .entry(user_id.to_string())
                .or_insert_with(|| ConversationContext::new(user_id));
            entry.apply(update, &self.limits);
            entry.clone()
        };
        drop(guard);
        self.locks.release_idle(user_id);
        Ok(merged)
    }

    async fn clear(&self, user_id: &str) -> Result<(), ContextError> {
        let guard = self.locks.acquire(user_id, self.limits.lock_timeout).await?;
        self.contexts.remove(user_id);
        drop(guard);
        self.locks.release_idle(user_id);
        tracing::info!(target: "askdb::context", user_id = %user_id, "Context cleared");
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, ContextError> {
        let now = now_ms();
        let before = self.contexts.len();
        self.contexts
            .retain(|_, ctx| !ctx.is_expired(now, self.limits.expiration));
        Ok(before.saturating_sub(self.contexts.len()))
    }

    fn limits(&self) -> &ContextLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChatMessage;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn get_is_idempotent_for_a_new_user() {
        let store = InMemoryContextStore::default();
        let a = store.get("u1").await.unwrap();
        let b = store.get("u1").await.unwrap();
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(a.session_entities, b.session_entities);
        assert_eq!(a.message_history, b.message_history);
        assert!(b.updated_at >= a.updated_at);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let store = InMemoryContextStore::default();
        store
            .update("u1", ContextUpdate::default().with_last_query("how many orders"))
            .await
            .unwrap();
        let ctx = store.get("u1").await.unwrap();
        assert_eq!(ctx.last_query.as_deref(), Some("how many orders"));
        assert!(ctx.updated_at >= ctx.created_at);
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryContextStore::default());
        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update("u1", ContextUpdate::default().with_entity("a", serde_json::json!(1)))
                    .await
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update("u1", ContextUpdate::default().with_entity("b", serde_json::json!(2)))
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let ctx = store.get("u1").await.unwrap();
        assert_eq!(ctx.session_entities["a"], 1);
        assert_eq!(ctx.session_entities["b"], 2);
    }

    #[tokio::test]
    async fn clear_yields_fresh_context() {
        let store = InMemoryContextStore::default();
        store
            .update("u1", ContextUpdate::default().with_message(ChatMessage::user("hi")))
            .await
            .unwrap();
        store.clear("u1").await.unwrap();
        let ctx = store.get("u1").await.unwrap();
        assert!(ctx.message_history.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_contexts() {
        let store = InMemoryContextStore::new(ContextLimits {
            expiration: Duration::from_secs(60),
            ..ContextLimits::default()
        });
        store.get("fresh").await.unwrap();
        store.get("stale").await.unwrap();
        if let Some(mut ctx) = store.contexts.get_mut("stale") {
            ctx.updated_at -= 120_000;
        }
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contexts.contains_key("fresh"));
    }

    #[tokio::test]
    async fn memories_return_most_recent_k() {
        let store = InMemoryContextStore::new(ContextLimits {
            memory_retrieval_limit: 2,
            ..ContextLimits::default()
        });
        for fact in ["likes CSV", "works in finance", "prefers UTC"] {
            store.add_memory("u1", fact, None).await.unwrap();
        }
        let recent = store.memories("u1").await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["works in finance", "prefers UTC"]);
    }
}
