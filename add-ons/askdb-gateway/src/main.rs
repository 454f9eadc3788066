//! Axum-based API Gateway for askdb. Config-driven via CoreConfig.

mod handlers;

use askdb_core::{
    open_context_store, AlertEvent, ContextStore, CoreConfig, RequestProcessor, SecurityGate,
    ToolRegistry,
};
use askdb_skills::{
    executor_from_config, register_default_tools, Collaborators, FileScriptExporter,
    ModelTranslator,
};
use axum::{
    extract::State,
    http::Method,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use std::path::Path as StdPath;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pre-flight check: config loads, the context database opens and the port is free.
fn run_verify() -> Result<(), String> {
    print!("Loading config... ");
    let config = CoreConfig::load().map_err(|e| format!("Config load failed: {}", e))?;
    println!("OK ({}, backend = {})", config.app_name, config.context_backend);

    if config.context_backend == "sled" {
        let path = config.context_db_path();
        print!("Checking {}... ", path.display());
        let db = sled::open(&path)
            .map_err(|e| format!("{} LOCKED or inaccessible: {}", path.display(), e))?;
        drop(db);
        println!("OK");
    }

    print!("Checking export dir {}... ", config.export_dir);
    std::fs::create_dir_all(StdPath::new(&config.export_dir))
        .map_err(|e| format!("export dir {} not writable: {}", config.export_dir, e))?;
    println!("OK");

    let port = config.port;
    print!("Checking port {}... ", port);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    match std::net::TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            println!("OK (available)");
        }
        Err(e) => {
            return Err(format!("Port {} BLOCKED: {}", port, e));
        }
    }

    println!("\nSUCCESS: ready to start gateway.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[askdb-gateway] .env not loaded: {} (using system environment)", e);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify() {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::load()?);
    let processor = Arc::new(build_processor(&config)?);

    tokio::spawn(sweep_loop(
        Arc::clone(processor.contexts()),
        config.sweep_interval(),
    ));

    let app = build_app(AppState {
        config: Arc::clone(&config),
        processor,
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!(target: "askdb::gateway", "{} listening on {}", config.app_name, addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

/// Wires the Context Store, collaborators, tools and the request processor from config.
fn build_processor(config: &CoreConfig) -> Result<RequestProcessor, BoxError> {
    let contexts = open_context_store(config)?;
    let translator = Arc::new(ModelTranslator::from_config(config)?);
    tracing::info!(target: "askdb::gateway", mode = ?translator.mode(), "Translator ready");
    let collaborators = Collaborators {
        translator,
        executor: executor_from_config(config)?,
        exporter: Arc::new(FileScriptExporter::new(&config.export_dir)),
        contexts,
        gate: Arc::new(SecurityGate::default()),
    };

    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, &collaborators, config)?;
    tracing::info!(target: "askdb::gateway", tools = registry.len(), "Tool registry populated");

    Ok(RequestProcessor::new(
        collaborators.gate,
        collaborators.translator,
        collaborators.executor,
        collaborators.contexts,
        Arc::new(registry),
    )
    .with_timeouts(config.translate_timeout(), config.execute_timeout()))
}

/// Removes idle conversation contexts on a fixed interval.
async fn sweep_loop(contexts: Arc<dyn ContextStore>, every: Duration) {
    tracing::info!(
        target: "askdb::gateway",
        interval_secs = every.as_secs(),
        "Context sweep loop started"
    );
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match contexts.sweep_expired().await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::info!(target: "askdb::gateway", removed, "Expired contexts swept")
            }
            Err(e) => tracing::warn!(target: "askdb::gateway", error = %e, "Context sweep failed"),
        }
    }
}

fn build_app(state: AppState) -> Router {
    // Local UIs on 3001-3099 and other backends on 8001-8099.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            let port = s
                .rsplit(':')
                .next()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0);
            (3001..=3099).contains(&port) || (8001..=8099).contains(&port)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/chat", post(handlers::chat::chat))
        .route("/api/v1/tools", get(handlers::chat::list_tools))
        .route("/api/v1/tools/:name", post(handlers::chat::invoke_tool))
        .route(
            "/api/v1/context/:user_id",
            get(handlers::context::get_context)
                .put(handlers::context::update_context)
                .delete(handlers::context::clear_context),
        )
        .route(
            "/api/v1/context/:user_id/memories",
            get(handlers::context::list_memories).post(handlers::context::add_memory),
        )
        .route("/api/v1/alerts", get(alerts_stream))
        .with_state(state)
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) processor: Arc<RequestProcessor>,
}

/// GET /api/v1/health – liveness check for UI and scripts.
async fn health(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "app_name": state.config.app_name,
        "context_backend": state.config.context_backend,
        "llm_mode": state.config.llm_mode,
        "tools": state.processor.registry().len(),
    }))
}

/// GET /api/v1/alerts – Server-Sent Events stream of security alerts.
async fn alerts_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.processor.subscribe_alerts();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sse) = alert_event(&event) {
                        yield Ok(sse);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().event("lagged").data(format!("{} alerts dropped", n)));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn alert_event(event: &AlertEvent) -> Option<Event> {
    match Event::default().event("security_alert").json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::warn!(target: "askdb::gateway", error = %e, "Alert could not be encoded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdb_core::{
        InMemoryContextStore, PipelineError, QueryExecutor, QueryResult, Translation,
        TranslationContext, Translator,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct CannedTranslator;

    #[async_trait::async_trait]
    impl Translator for CannedTranslator {
        async fn translate(
            &self,
            _text: &str,
            _context: &TranslationContext,
        ) -> Result<Translation, PipelineError> {
            Ok(Translation {
                sql_query: Some("SELECT id, total FROM orders".into()),
                entities: vec!["orders".into()],
                intent: "list".into(),
            })
        }
    }

    struct TwoRows;

    #[async_trait::async_trait]
    impl QueryExecutor for TwoRows {
        async fn execute(&self, _sql: &str) -> Result<QueryResult, PipelineError> {
            Ok(QueryResult::from_rows(vec![
                json!({"id": 1, "total": 10}),
                json!({"id": 2, "total": 12}),
            ]))
        }
    }

    fn test_state(export_dir: &std::path::Path) -> AppState {
        let config = CoreConfig {
            app_name: "Test Gateway".to_string(),
            export_dir: export_dir.to_string_lossy().into_owned(),
            ..CoreConfig::default()
        };
        let collaborators = Collaborators {
            translator: Arc::new(CannedTranslator),
            executor: Arc::new(TwoRows),
            exporter: Arc::new(FileScriptExporter::new(export_dir)),
            contexts: Arc::new(InMemoryContextStore::default()),
            gate: Arc::new(SecurityGate::default()),
        };
        let mut registry = ToolRegistry::new();
        register_default_tools(&mut registry, &collaborators, &config).unwrap();
        let processor = RequestProcessor::new(
            collaborators.gate,
            collaborators.translator,
            collaborators.executor,
            collaborators.contexts,
            Arc::new(registry),
        );
        AppState {
            config: Arc::new(config),
            processor: Arc::new(processor),
        }
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&b).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_registered_tools() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()));
        let (status, json) = send(app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["app_name"], "Test Gateway");
        assert_eq!(json["tools"], 4);
    }

    #[tokio::test]
    async fn chat_runs_question_and_updates_context() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let body = json!({
            "user_id": "alice",
            "messages": [{"role": "user", "content": "show me the orders"}]
        });
        let (status, json) = send(build_app(state.clone()), "POST", "/api/v1/chat", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["final_state"], "RESPONDED");
        assert_eq!(json["sql"], "SELECT id, total FROM orders");
        assert_eq!(json["results"]["row_count"], 2);

        let (status, ctx) = send(build_app(state), "GET", "/api/v1/context/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ctx["last_sql"], "SELECT id, total FROM orders");
        assert_eq!(ctx["query_history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_blocks_injection_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({
            "user_id": "mallory",
            "messages": [{"role": "user", "content": "show users' OR 1=1 --"}]
        });
        let (status, json) = send(build_app(test_state(dir.path())), "POST", "/api/v1/chat", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "blocked");
        assert_eq!(json["security_alert"]["type"], "input_validation");
        assert!(json.get("sql").is_none());
    }

    #[tokio::test]
    async fn chat_dispatches_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({
            "user_id": "bob",
            "tool_calls": [
                {"id": "a", "name": "sql_executor", "params": {"sql": "SELECT id FROM orders"}},
                {"id": "b", "name": "sql_executor", "params": {"sql": "DROP TABLE orders"}}
            ]
        });
        let (status, json) = send(build_app(test_state(dir.path())), "POST", "/api/v1/chat", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        let results = json["tool_results"].as_array().unwrap();
        assert_eq!(results[0]["id"], "a");
        assert_eq!(results[0]["status"], "ok");
        assert_eq!(results[1]["id"], "b");
        assert_eq!(results[1]["status"], "blocked");
    }

    #[tokio::test]
    async fn tools_are_listed_and_unknown_tool_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (status, json) = send(build_app(state.clone()), "GET", "/api/v1/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"script_exporter"));

        let (status, json) = send(
            build_app(state),
            "POST",
            "/api/v1/tools/format_disk",
            Some(json!({"user_id": "bob", "params": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("format_disk"));
    }

    #[tokio::test]
    async fn direct_tool_call_exports_script() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({"user_id": "bob", "params": {"sql": "SELECT 1", "script_name": "weekly"}});
        let (status, json) = send(
            build_app(test_state(dir.path())),
            "POST",
            "/api/v1/tools/script_exporter",
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["result"]["file_action"], "created");
        assert!(dir.path().join("weekly.sql").exists());
    }

    #[tokio::test]
    async fn context_update_memories_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let (status, ctx) = send(
            build_app(state.clone()),
            "PUT",
            "/api/v1/context/carol",
            Some(json!({"session_entities": {"region": "EU"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ctx["session_entities"]["region"], "EU");

        let (status, block) = send(
            build_app(state.clone()),
            "POST",
            "/api/v1/context/carol/memories",
            Some(json!({"content": "reports are monthly"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(block["content"], "reports are monthly");

        let (_, memories) = send(build_app(state.clone()), "GET", "/api/v1/context/carol/memories", None).await;
        assert_eq!(memories.as_array().unwrap().len(), 1);

        let (status, _) = send(build_app(state.clone()), "DELETE", "/api/v1/context/carol", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, fresh) = send(build_app(state), "GET", "/api/v1/context/carol", None).await;
        assert!(fresh["session_entities"].as_object().unwrap().is_empty());
        assert!(fresh["memory_blocks"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocked_turns_are_published_as_alert_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut rx = state.processor.subscribe_alerts();
        let body = json!({
            "user_id": "mallory",
            "messages": [{"role": "user", "content": "please drop table users"}]
        });
        send(build_app(state), "POST", "/api/v1/chat", Some(body)).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, "mallory");
        assert!(alert_event(&event).is_some());

        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["alert"], json!({"type": "input_validation", "severity": "high"}));
        let text = payload.to_string();
        for rule_prefix in ["nl.", "sql.", "topic."] {
            assert!(!text.contains(rule_prefix), "{text}");
        }
    }
}
