//! Per-user conversational state and the partial update merged into it.

use crate::shared::{now_ms, CoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Entries kept in the simple most-recent-first query history.
pub const QUERY_HISTORY_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Role-tagged message in the sliding history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Unix timestamp (milliseconds). Filled in on append when absent.
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_ms(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Long-term memory entry. `metadata.timestamp` is always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub id: Uuid,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryBlock {
    pub fn new(content: impl Into<String>, metadata: Option<serde_json::Value>) -> Self {
        let mut metadata = match metadata {
            Some(serde_json::Value::Object(m)) => m,
            _ => serde_json::Map::new(),
        };
        metadata
            .entry("timestamp")
            .or_insert_with(|| serde_json::json!(now_ms()));
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            metadata,
        }
    }
}

/// Row count plus a short text, kept as short-term context for the translator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub row_count: usize,
    pub summary: String,
}

impl ResultSummary {
    /// One-line rendering handed to the translator.
    pub fn as_prompt_line(&self) -> String {
        format!("{} row(s): {}", self.row_count, self.summary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub query: String,
    pub sql: String,
    pub timestamp: i64,
}

/// Durable per-user conversational state. Exactly one per `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub user_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub session_entities: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub message_history: Vec<ChatMessage>,
    #[serde(default)]
    pub tool_state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub memory_blocks: Vec<MemoryBlock>,
    #[serde(default)]
    pub last_query: Option<String>,
    #[serde(default)]
    pub last_sql: Option<String>,
    #[serde(default)]
    pub last_result: Option<ResultSummary>,
    /// Most-recent-first, at most [`QUERY_HISTORY_LIMIT`] entries.
    #[serde(default)]
    pub query_history: Vec<QueryHistoryEntry>,
}

impl ConversationContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            session_entities: HashMap::new(),
            message_history: Vec::new(),
            tool_state: HashMap::new(),
            memory_blocks: Vec::new(),
            last_query: None,
            last_sql: None,
            last_result: None,
            query_history: Vec::new(),
        }
    }

    /// Refreshes `updated_at`, keeping `updated_at >= created_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.created_at).max(self.updated_at);
    }

    /// Shallow per-field merge: maps key-wise, histories appended then trimmed, scalars replaced when present.
    pub fn apply(&mut self, update: ContextUpdate, limits: &ContextLimits) {
        self.session_entities.extend(update.session_entities);
        self.tool_state.extend(update.tool_state);

        for mut message in update.messages {
            if message.timestamp == 0 {
                message.timestamp = now_ms();
            }
            self.message_history.push(message);
        }
        if self.message_history.len() > limits.max_message_history {
            let excess = self.message_history.len() - limits.max_message_history;
            self.message_history.drain(..excess);
        }

        self.memory_blocks.extend(update.memory_blocks);

        if let Some(q) = update.last_query {
            self.last_query = Some(q);
        }
        if let Some(s) = update.last_sql {
            self.last_sql = Some(s);
        }
        if let Some(r) = update.last_result {
            self.last_result = Some(r);
        }
        if let Some(entry) = update.history_entry {
            self.query_history.insert(0, entry);
            self.query_history.truncate(QUERY_HISTORY_LIMIT);
        }

        self.touch();
    }

    /// The most recent `limit` memory blocks, oldest first.
    pub fn recent_memories(&self, limit: usize) -> Vec<MemoryBlock> {
        let start = self.memory_blocks.len().saturating_sub(limit);
        self.memory_blocks[start..].to_vec()
    }

    /// True when idle for longer than `expiration` at time `now` (ms).
    pub fn is_expired(&self, now: i64, expiration: Duration) -> bool {
        now.saturating_sub(self.updated_at) > expiration.as_millis() as i64
    }
}

/// Partial update merged into a context by the store. Absent fields leave state untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default)]
    pub session_entities: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tool_state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub memory_blocks: Vec<MemoryBlock>,
    #[serde(default)]
    pub last_query: Option<String>,
    #[serde(default)]
    pub last_sql: Option<String>,
    #[serde(default)]
    pub last_result: Option<ResultSummary>,
    #[serde(default)]
    pub history_entry: Option<QueryHistoryEntry>,
}

impl ContextUpdate {
    pub fn with_entity(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.session_entities.insert(key.into(), value);
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_last_query(mut self, query: impl Into<String>) -> Self {
        self.last_query = Some(query.into());
        self
    }
}

/// Store-wide bounds derived from configuration.
#[derive(Debug, Clone)]
pub struct ContextLimits {
    pub max_message_history: usize,
    pub memory_retrieval_limit: usize,
    pub expiration: Duration,
    pub lock_timeout: Duration,
}

impl ContextLimits {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            max_message_history: config.max_message_history,
            memory_retrieval_limit: config.memory_retrieval_limit,
            expiration: config.context_expiration(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::from_config(&CoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: usize) -> ContextLimits {
        ContextLimits {
            max_message_history: max,
            ..ContextLimits::default()
        }
    }

    #[test]
    fn history_is_a_fifo_window() {
        let mut ctx = ConversationContext::new("u");
        for i in 0..5 {
            ctx.apply(
                ContextUpdate::default().with_message(ChatMessage::user(format!("m{i}"))),
                &limits(3),
            );
        }
        let contents: Vec<&str> = ctx.message_history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }

    #[test]
    fn maps_merge_rather_than_replace() {
        let mut ctx = ConversationContext::new("u");
        ctx.apply(ContextUpdate::default().with_entity("a", serde_json::json!(1)), &limits(10));
        ctx.apply(ContextUpdate::default().with_entity("b", serde_json::json!(2)), &limits(10));
        assert_eq!(ctx.session_entities["a"], 1);
        assert_eq!(ctx.session_entities["b"], 2);
    }

    #[test]
    fn absent_scalars_leave_previous_values() {
        let mut ctx = ConversationContext::new("u");
        ctx.apply(ContextUpdate::default().with_last_query("X"), &limits(10));
        ctx.apply(ContextUpdate::default().with_entity("y", serde_json::json!(2)), &limits(10));
        assert_eq!(ctx.last_query.as_deref(), Some("X"));
    }

    #[test]
    fn query_history_is_most_recent_first_and_bounded() {
        let mut ctx = ConversationContext::new("u");
        for i in 0..7 {
            let update = ContextUpdate {
                history_entry: Some(QueryHistoryEntry {
                    query: format!("q{i}"),
                    sql: format!("SELECT {i}"),
                    timestamp: i,
                }),
                ..ContextUpdate::default()
            };
            ctx.apply(update, &limits(10));
        }
        assert_eq!(ctx.query_history.len(), QUERY_HISTORY_LIMIT);
        assert_eq!(ctx.query_history[0].query, "q6");
        assert_eq!(ctx.query_history[4].query, "q2");
    }

    #[test]
    fn memory_blocks_grow_but_retrieval_is_bounded() {
        let mut ctx = ConversationContext::new("u");
        for i in 0..8 {
            ctx.memory_blocks.push(MemoryBlock::new(format!("fact {i}"), None));
        }
        let recent = ctx.recent_memories(3);
        assert_eq!(ctx.memory_blocks.len(), 8);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "fact 5");
        assert_eq!(recent[2].content, "fact 7");
        assert!(recent[0].metadata.contains_key("timestamp"));
    }

    #[test]
    fn updated_at_never_precedes_created_at() {
        let mut ctx = ConversationContext::new("u");
        ctx.created_at += 10_000;
        ctx.touch();
        assert!(ctx.updated_at >= ctx.created_at);
    }
}
