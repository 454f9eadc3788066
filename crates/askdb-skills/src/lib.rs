//! Concrete collaborators (translator, executor, exporter) and the tools exposed through the registry.

pub use askdb_core::{Tool, ToolRegistry};

mod context_manager;
mod executor;
mod exporter;
mod script_exporter;
mod sql_executor;
mod sql_generator;
mod translator;

pub use context_manager::ContextManager;
pub use executor::{executor_from_config, PgExecutor, UnconfiguredExecutor};
pub use exporter::{sanitize_script_name, FileScriptExporter};
pub use script_exporter::ScriptExport;
pub use sql_executor::SqlExecutor;
pub use sql_generator::SqlGenerator;
pub use translator::{extract_json, parse_translation, LiveSettings, LlmMode, ModelTranslator};

use askdb_core::{
    ContextStore, CoreConfig, QueryExecutor, RegistryError, ScriptExporter, SecurityGate,
    Translator,
};
use std::sync::Arc;

/// Shared handles the tools close over.
#[derive(Clone)]
pub struct Collaborators {
    pub translator: Arc<dyn Translator>,
    pub executor: Arc<dyn QueryExecutor>,
    pub exporter: Arc<dyn ScriptExporter>,
    pub contexts: Arc<dyn ContextStore>,
    pub gate: Arc<SecurityGate>,
}

/// Registers `sql_generator`, `sql_executor`, `context_manager` and `script_exporter`.
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    collaborators: &Collaborators,
    config: &CoreConfig,
) -> Result<(), RegistryError> {
    registry.register(Arc::new(SqlGenerator::new(
        Arc::clone(&collaborators.translator),
        Arc::clone(&collaborators.contexts),
        Arc::clone(&collaborators.gate),
        config.translate_timeout(),
    )))?;
    registry.register(Arc::new(SqlExecutor::new(
        Arc::clone(&collaborators.executor),
        Arc::clone(&collaborators.contexts),
        config.execute_timeout(),
    )))?;
    registry.register(Arc::new(ContextManager::new(Arc::clone(&collaborators.contexts))))?;
    registry.register(Arc::new(ScriptExport::new(Arc::clone(&collaborators.exporter))))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdb_core::{
        InMemoryContextStore, PipelineError, QueryResult, ToolError, Translation,
        TranslationContext, TurnContext,
    };
    use serde_json::json;

    struct CannedTranslator(&'static str);

    #[async_trait::async_trait]
    impl Translator for CannedTranslator {
        async fn translate(
            &self,
            _text: &str,
            _context: &TranslationContext,
        ) -> Result<Translation, PipelineError> {
            Ok(Translation {
                sql_query: Some(self.0.to_string()),
                entities: vec!["orders".into()],
                intent: "list".into(),
            })
        }
    }

    struct OneRow;

    #[async_trait::async_trait]
    impl QueryExecutor for OneRow {
        async fn execute(&self, _sql: &str) -> Result<QueryResult, PipelineError> {
            Ok(QueryResult::from_rows(vec![json!({"id": 1})]))
        }
    }

    fn registry(sql: &'static str, export_dir: &std::path::Path) -> (ToolRegistry, Arc<InMemoryContextStore>) {
        let contexts = Arc::new(InMemoryContextStore::default());
        let collaborators = Collaborators {
            translator: Arc::new(CannedTranslator(sql)),
            executor: Arc::new(OneRow),
            exporter: Arc::new(FileScriptExporter::new(export_dir)),
            contexts: contexts.clone(),
            gate: Arc::new(SecurityGate::default()),
        };
        let mut registry = ToolRegistry::new();
        register_default_tools(&mut registry, &collaborators, &CoreConfig::default()).unwrap();
        (registry, contexts)
    }

    #[test]
    fn default_tools_are_listed_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut registry, contexts) = registry("SELECT 1", dir.path());
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["sql_generator", "sql_executor", "context_manager", "script_exporter"]);

        let again = registry.register(Arc::new(ContextManager::new(contexts)));
        assert_eq!(again, Err(RegistryError::Duplicate("context_manager".into())));
    }

    #[tokio::test]
    async fn sql_generator_returns_sql_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry("SELECT * FROM orders", dir.path());
        let out = registry
            .execute("sql_generator", json!({"query": "list orders"}), &TurnContext::new("u1"))
            .await
            .unwrap();
        assert_eq!(out["sql_query"], "SELECT * FROM orders");
        assert_eq!(out["intent"], "list");
    }

    #[tokio::test]
    async fn sql_generator_refuses_dangerous_output() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry("DROP TABLE orders", dir.path());
        let err = registry
            .execute("sql_generator", json!({"query": "list orders"}), &TurnContext::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Pipeline(PipelineError::ValidationBlocked { .. })));
    }

    #[tokio::test]
    async fn sql_executor_records_last_sql() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, contexts) = registry("SELECT 1", dir.path());
        let out = registry
            .execute("sql_executor", json!({"sql": "SELECT id FROM orders"}), &TurnContext::new("u1"))
            .await
            .unwrap();
        assert_eq!(out["row_count"], 1);

        let ctx = contexts.get("u1").await.unwrap();
        assert_eq!(ctx.last_sql.as_deref(), Some("SELECT id FROM orders"));
        assert_eq!(ctx.last_result.unwrap().row_count, 1);
    }

    #[tokio::test]
    async fn context_manager_actions() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry("SELECT 1", dir.path());
        let ctx = TurnContext::new("u1");

        let updated = registry
            .execute(
                "context_manager",
                json!({"action": "update", "updates": {"session_entities": {"region": "EU"}}}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(updated["session_entities"]["region"], "EU");

        registry
            .execute(
                "context_manager",
                json!({"action": "add_memory", "content": "prefers totals in EUR"}),
                &ctx,
            )
            .await
            .unwrap();
        let memories = registry
            .execute("context_manager", json!({"action": "get_memories"}), &ctx)
            .await
            .unwrap();
        assert_eq!(memories[0]["content"], "prefers totals in EUR");
        assert!(memories[0]["metadata"]["timestamp"].is_i64());

        registry
            .execute("context_manager", json!({"action": "clear"}), &ctx)
            .await
            .unwrap();
        let fresh = registry
            .execute("context_manager", json!({"action": "get"}), &ctx)
            .await
            .unwrap();
        assert!(fresh["session_entities"].as_object().unwrap().is_empty());

        let err = registry
            .execute("context_manager", json!({"action": "explode"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn script_exporter_reports_file_action() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry("SELECT 1", dir.path());
        let ctx = TurnContext::new("u1");
        let params = json!({"sql": "SELECT 1", "script_name": "daily"});

        let first = registry.execute("script_exporter", params.clone(), &ctx).await.unwrap();
        assert_eq!(first["file_action"], "created");
        let second = registry.execute("script_exporter", params, &ctx).await.unwrap();
        assert_eq!(second["file_action"], "appended");
        assert!(second["script_path"].as_str().unwrap().ends_with("daily.sql"));
    }
}
