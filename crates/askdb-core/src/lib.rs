//! askdb-core: security-gated natural-language-to-SQL pipeline.
//!
//! Pattern library and gates, the per-user Context Store, the Tool Registry and the
//! Request Processor that ties them to the external translator and executor.

mod context;
mod error;
mod guard;
mod orchestrator;
mod shared;

// Shared
pub use shared::{now_ms, CoreConfig, TurnContext, DEFAULT_USER_ID};

// Errors
pub use error::{ContextError, PipelineError, RegistryError, ToolError};

// Security gates
pub use guard::{
    AlertSummary, AlertType, CompiledRule, InputValidator, PatternLibrary, Rule, RuleKind,
    RuleScope, SecurityAlert, SecurityGate, SensitiveAccessAssessor, SensitivityAssessment,
    Severity, SqlValidator, ValidationVerdict, DEFAULT_RULES,
};

// Context Store
pub use context::{
    open_context_store, ChatMessage, ContextLimits, ContextStore, ContextUpdate,
    ConversationContext, InMemoryContextStore, MemoryBlock, QueryHistoryEntry, ResultSummary, Role,
    SledContextStore, UserLocks, QUERY_HISTORY_LIMIT,
};

// Tools and request processing
pub use orchestrator::{
    required_str, AlertEvent, ExportOutcome, FieldInfo, FileAction, QueryExecutor, QueryResult,
    RequestProcessor, ResponseEnvelope, SchemaQuery, ScriptExporter, Tool, ToolCallRequest,
    ToolCallResult, ToolDescriptor, ToolGate, ToolRegistry, Translation, TranslationContext,
    Translator, TurnRequest, TurnState, TurnStatus,
};
