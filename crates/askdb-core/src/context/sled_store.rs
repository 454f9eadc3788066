use super::lock::UserLocks;
use super::types::{ContextLimits, ContextUpdate, ConversationContext};
use super::ContextStore;
use crate::error::ContextError;
use crate::shared::now_ms;
use sled::{Db, Tree};
use std::path::Path;

const CONTEXT_TREE: &str = "conversation_contexts";

/// Sled-backed store: one JSON document per user, keyed by user id.
pub struct SledContextStore {
    db: Db,
    tree: Tree,
    locks: UserLocks,
    limits: ContextLimits,
}

impl SledContextStore {
    pub fn open(path: impl AsRef<Path>, limits: ContextLimits) -> Result<Self, ContextError> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree(CONTEXT_TREE)?;
        tracing::info!(
            target: "askdb::context",
            path = %path.as_ref().display(),
            contexts = tree.len(),
            "Sled context store opened"
        );
        Ok(Self {
            db,
            tree,
            locks: UserLocks::new(),
            limits,
        })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn read(&self, user_id: &str) -> Result<Option<ConversationContext>, ContextError> {
        match self.tree.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, ctx: &ConversationContext) -> Result<(), ContextError> {
        let bytes = serde_json::to_vec(ctx)?;
        self.tree.insert(ctx.user_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Read-merge-write. Callers hold the user's lock.
    fn merge(&self, user_id: &str, update: ContextUpdate) -> Result<ConversationContext, ContextError> {
        let mut ctx = self
            .read(user_id)?
            .unwrap_or_else(|| ConversationContext::new(user_id));
        ctx.apply(update, &self.limits);
        self.write(&ctx)?;
        Ok(ctx)
    }

    pub async fn flush(&self) -> Result<(), ContextError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContextStore for SledContextStore {
    async fn get(&self, user_id: &str) -> Result<ConversationContext, ContextError> {
        let key = user_id.as_bytes();
        match self.tree.get(key)? {
            Some(current) => {
                let mut ctx: ConversationContext = serde_json::from_slice(&current)?;
                ctx.touch();
                let touched = serde_json::to_vec(&ctx)?;
                // Lock-free refresh of updated_at: if a locked update landed in between, its
                // document already carries a newer timestamp and is returned as is.
                match self.tree.compare_and_swap(key, Some(&current), Some(touched))? {
                    Ok(()) => Ok(ctx),
                    Err(_) => Ok(self.read(user_id)?.unwrap_or(ctx)),
                }
            }
            None => {
                let fresh = ConversationContext::new(user_id);
                let bytes = serde_json::to_vec(&fresh)?;
                match self.tree.compare_and_swap(key, None::<&[u8]>, Some(bytes))? {
                    Ok(()) => {
                        tracing::debug!(target: "askdb::context", user_id = %user_id, "Created context");
                        Ok(fresh)
                    }
                    Err(_) => Ok(self.read(user_id)?.unwrap_or(fresh)),
                }
            }
        }
    }

    async fn update(
        &self,
        user_id: &str,
        update: ContextUpdate,
    ) -> Result<ConversationContext, ContextError> {
        let guard = self.locks.acquire(user_id, self.limits.lock_timeout).await?;
        let result = self.merge(user_id, update);
        drop(guard);
        self.locks.release_idle(user_id);
        result
    }

    async fn clear(&self, user_id: &str) -> Result<(), ContextError> {
        let guard = self.locks.acquire(user_id, self.limits.lock_timeout).await?;
        let removed = self.tree.remove(user_id.as_bytes());
        drop(guard);
        self.locks.release_idle(user_id);
        removed?;
        tracing::info!(target: "askdb::context", user_id = %user_id, "Context cleared");
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, ContextError> {
        let now = now_ms();
        let mut removed = 0;
        for item in self.tree.iter() {
            let (key, bytes) = item?;
            let expired = match serde_json::from_slice::<ConversationContext>(&bytes) {
                Ok(ctx) => ctx.is_expired(now, self.limits.expiration),
                Err(e) => {
                    tracing::warn!(target: "askdb::context", error = %e, "Dropping unreadable context");
                    true
                }
            };
            if !expired {
                continue;
            }
            // Only remove the exact document inspected; a concurrent update keeps the context alive.
            if self
                .tree
                .compare_and_swap(&key, Some(&bytes), None::<&[u8]>)?
                .is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn limits(&self) -> &ContextLimits {
        &self.limits
    }
}
