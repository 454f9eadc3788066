//! Shared types used across all askdb crates.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// User ID used when a caller does not identify itself.
pub const DEFAULT_USER_ID: &str = "anonymous";

/// Per-turn caller identity handed to tools and the request processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnContext {
    /// Conversation owner; the Context Store is keyed by this.
    pub user_id: String,
    /// Optional correlation id for request tracing.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TurnContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Resolved user ID (never empty).
    pub fn resolved_user_id(&self) -> &str {
        let trimmed = self.user_id.trim();
        if trimmed.is_empty() {
            DEFAULT_USER_ID
        } else {
            trimmed
        }
    }
}

/// Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Global application configuration (gateway, context store, collaborators). Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application identity shown by the gateway.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base directory for the sled context database.
    pub storage_path: String,
    /// Translator mode ("mock" or "live").
    pub llm_mode: String,
    /// Context Store backend ("memory" or "sled").
    #[serde(default = "default_context_backend")]
    pub context_backend: String,
    /// Sliding window size for per-user message history.
    #[serde(default = "default_max_message_history")]
    pub max_message_history: usize,
    /// Number of long-term memory blocks returned on retrieval.
    #[serde(default = "default_memory_retrieval_limit")]
    pub memory_retrieval_limit: usize,
    /// Idle time after which a context is eligible for the expiration sweep.
    #[serde(default = "default_context_expiration_secs")]
    pub context_expiration_secs: u64,
    /// Interval between expiration sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Bounded wait for the per-user update lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub translate_timeout_secs: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub execute_timeout_secs: u64,
    /// PostgreSQL connection string for the executor. None = executor reports "not configured".
    #[serde(default)]
    pub database_url: Option<String>,
    /// Directory the script exporter writes `.sql` files into.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    /// Table/column overview handed to the live translator with every question.
    #[serde(default)]
    pub schema_hint: Option<String>,
}

fn default_context_backend() -> String {
    "memory".to_string()
}

fn default_max_message_history() -> usize {
    20
}

fn default_memory_retrieval_limit() -> usize {
    5
}

fn default_context_expiration_secs() -> u64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_stage_timeout_secs() -> u64 {
    30
}

fn default_export_dir() -> String {
    "./exports".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "askdb Gateway".to_string(),
            port: 8001,
            storage_path: "./data".to_string(),
            llm_mode: "mock".to_string(),
            context_backend: default_context_backend(),
            max_message_history: default_max_message_history(),
            memory_retrieval_limit: default_memory_retrieval_limit(),
            context_expiration_secs: default_context_expiration_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            translate_timeout_secs: default_stage_timeout_secs(),
            execute_timeout_secs: default_stage_timeout_secs(),
            database_url: None,
            export_dir: default_export_dir(),
            schema_hint: None,
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: env `ASKDB__*` > file (`ASKDB_CONFIG` path or `config/gateway.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("ASKDB_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "askdb Gateway")?
            .set_default("port", 8001_i64)?
            .set_default("storage_path", "./data")?
            .set_default("llm_mode", "mock")?;

        let path = Path::new(&config_path);
        let with_ext = path.with_extension("toml");
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else if with_ext.exists() {
            builder.add_source(config::File::from(with_ext.as_path()))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("ASKDB").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    pub fn context_expiration(&self) -> Duration {
        Duration::from_secs(self.context_expiration_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn translate_timeout(&self) -> Duration {
        Duration::from_secs(self.translate_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }

    /// Path of the sled database holding conversation contexts.
    pub fn context_db_path(&self) -> std::path::PathBuf {
        Path::new(&self.storage_path).join("askdb_contexts")
    }
}
