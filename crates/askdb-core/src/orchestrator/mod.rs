//! Tool dispatch and the request state machine.

mod collaborators;
mod processor;
mod schema;
mod tool;

pub use collaborators::{
    ExportOutcome, FieldInfo, FileAction, QueryExecutor, QueryResult, ScriptExporter, Translation,
    TranslationContext, Translator,
};
pub use processor::{
    AlertEvent, RequestProcessor, ResponseEnvelope, ToolCallRequest, ToolCallResult, TurnRequest,
    TurnState, TurnStatus,
};
pub use schema::SchemaQuery;
pub use tool::{required_str, Tool, ToolDescriptor, ToolGate, ToolRegistry};
