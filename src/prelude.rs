//! Convenience re-exports for common use.

pub use crate::agent::Agent;
pub use crate::error::{DrummerError, ErrorCategory};
pub use crate::hooks::{PostHook, PreHook};
pub use crate::knowledge::{KnowledgeFilter, KnowledgeRetriever, Reference};
pub use crate::memory::{MemoryExtractor, SessionSummarizer, UserMemory};
pub use crate::model::{ModelBackend, ModelEvent, ModelRequest, ModelResponse, ToolChoice};
pub use crate::run::{
    cancel_run, ApprovalRecord, ApprovalStatus, ApprovalStore, ContinueRunParams,
    InMemoryApprovalStore, InputContent, RunEvent, RunEventKind, RunEventPayload, RunParams,
    RunRecord, RunRequirement, RunStatus, RunStream, RunStreamItem,
};
pub use crate::session::{InMemorySessionStore, SessionRecord, SessionStore};
pub use crate::tools::{FunctionTool, Tool, ToolDefinition, ToolExecution};
pub use crate::types::{ModelMessage, Role};
