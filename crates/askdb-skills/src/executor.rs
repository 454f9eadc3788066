//! PostgreSQL executor for validated SQL.

use askdb_core::{CoreConfig, PipelineError, QueryExecutor, QueryResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const STAGE: &str = "execution";
const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs each query in a read-only transaction and returns rows as JSON objects.
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Builds a lazy pool; no connection is attempted until the first query.
    pub fn connect_lazy(database_url: &str) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(database_url)
            .map_err(|e| PipelineError::InternalFault(format!("invalid database_url: {}", e)))?;
        tracing::info!(target: "askdb::executor", url = %mask_database_url(database_url), "PostgreSQL pool configured");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run(&self, sql: &str) -> Result<Vec<serde_json::Value>, sqlx::Error> {
        let wrapped = wrap_as_json_rows(sql);
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&wrapped).fetch_all(&mut *tx).await?;
        tx.rollback().await?;
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, PipelineError> {
        let started = std::time::Instant::now();
        let rows = self.run(sql).await.map_err(|e| {
            tracing::warn!(target: "askdb::executor", error = %e, "Query failed");
            PipelineError::execution(STAGE, e.to_string())
        })?;
        let result = QueryResult::from_rows(rows);
        tracing::info!(
            target: "askdb::executor",
            rows = result.row_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(result)
    }
}

/// Stand-in when no `database_url` is configured: every query is an execution error.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredExecutor;

#[async_trait::async_trait]
impl QueryExecutor for UnconfiguredExecutor {
    async fn execute(&self, _sql: &str) -> Result<QueryResult, PipelineError> {
        Err(PipelineError::execution(STAGE, "no database is configured"))
    }
}

/// Picks [`PgExecutor`] when `database_url` is set, [`UnconfiguredExecutor`] otherwise.
pub fn executor_from_config(config: &CoreConfig) -> Result<Arc<dyn QueryExecutor>, PipelineError> {
    match config.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(Arc::new(PgExecutor::connect_lazy(url)?)),
        None => {
            tracing::warn!(target: "askdb::executor", "database_url not set; queries will fail");
            Ok(Arc::new(UnconfiguredExecutor))
        }
    }
}

/// Wraps a SELECT so each row comes back as one JSONB value.
fn wrap_as_json_rows(sql: &str) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!("SELECT row_to_json(t)::jsonb AS row FROM ({}) AS t", inner)
}

/// Hides the password of a connection URL for logging.
fn mask_database_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.find(':') {
                Some(colon) => format!(
                    "{}{}:****{}",
                    &url[..scheme_end + 3],
                    &credentials[..colon],
                    &url[at..]
                ),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
