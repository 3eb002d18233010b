//! Agent configuration and the public run surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;

use crate::error::DrummerError;
use crate::hooks::{PostHook, PreHook};
use crate::knowledge::{KnowledgeFilter, KnowledgeRetriever};
use crate::memory::{
    CulturalKnowledgeExtractor, LearningExtractor, MemoryExtractor, SessionSummarizer,
};
use crate::model::{ModelBackend, ToolChoice};
use crate::reasoning::Reasoner;
use crate::run::context::DependencyMap;
use crate::run::dispatch;
use crate::run::events::{RunEventKind, RunStream};
use crate::run::record::{InputContent, RunRecord};
use crate::run::{ContinueRunParams, RunId, RunParams};
use crate::session::SessionStore;
use crate::tools::{Tool, ToolFilter, ToolProvider};

/// An agent: a model backend plus the configuration the orchestrator needs
/// to drive a run. Cheap to clone; every run executes against a clone.
///
/// # Example
///
/// ```ignore
/// let agent = Agent::builder()
///     .model(Arc::new(my_backend))
///     .name("support-agent")
///     .db(Arc::new(InMemorySessionStore::new()))
///     .build();
/// let record = agent.run("hello", RunParams::new()).await?;
/// ```
#[derive(Clone, Builder)]
pub struct Agent {
    #[builder(into)]
    pub id: Option<String>,
    #[builder(into)]
    pub name: Option<String>,
    #[builder(into)]
    pub description: Option<String>,
    #[builder(into)]
    pub instructions: Option<String>,

    /// Primary model backend.
    pub model: Arc<dyn ModelBackend>,
    /// Secondary model that produces the final output from the primary
    /// model's draft. Primary content events are downgraded to intermediate
    /// when this is set.
    pub output_model: Option<Arc<dyn ModelBackend>>,
    /// Model used to parse free-form content into the declared schema.
    pub parser_model: Option<Arc<dyn ModelBackend>>,
    pub output_schema: Option<serde_json::Value>,

    #[builder(default)]
    pub tools: Vec<Arc<dyn Tool>>,
    #[builder(default)]
    pub tool_providers: Vec<Arc<dyn ToolProvider>>,
    pub tool_filter: Option<ToolFilter>,
    pub tool_choice: Option<ToolChoice>,
    pub tool_call_limit: Option<usize>,

    #[builder(default)]
    pub pre_hooks: Vec<Arc<dyn PreHook>>,
    #[builder(default)]
    pub post_hooks: Vec<Arc<dyn PostHook>>,

    /// Durable session storage. Without it sessions are ephemeral and
    /// background runs are rejected.
    pub db: Option<Arc<dyn SessionStore>>,
    pub approvals: Option<Arc<dyn crate::run::ApprovalStore>>,

    pub knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    pub knowledge_filters: Option<KnowledgeFilter>,
    pub memory_extractor: Option<Arc<dyn MemoryExtractor>>,
    pub cultural_knowledge_extractor: Option<Arc<dyn CulturalKnowledgeExtractor>>,
    pub learning_extractor: Option<Arc<dyn LearningExtractor>>,
    pub session_summarizer: Option<Arc<dyn SessionSummarizer>>,
    pub reasoner: Option<Arc<dyn Reasoner>>,

    #[builder(default)]
    pub dependencies: DependencyMap,
    #[builder(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[builder(into)]
    pub session_id: Option<String>,
    #[builder(into)]
    pub user_id: Option<String>,

    /// Additional attempts after the first failure.
    #[builder(default)]
    pub retries: usize,
    #[builder(default = Duration::from_secs(1))]
    pub delay_between_retries: Duration,
    #[builder(default)]
    pub exponential_backoff: bool,

    #[builder(default)]
    pub add_history_to_context: bool,
    #[builder(default = 3)]
    pub num_history_runs: usize,
    #[builder(default)]
    pub add_dependencies_to_context: bool,
    #[builder(default)]
    pub add_session_state_to_context: bool,

    #[builder(default)]
    pub stream_events: bool,
    #[builder(default)]
    pub store_events: bool,
    #[builder(default)]
    pub events_to_skip: Vec<RunEventKind>,

    #[builder(default = true)]
    pub store_media: bool,
    #[builder(default = true)]
    pub store_tool_messages: bool,
    #[builder(default = true)]
    pub store_history_messages: bool,
    /// Artifact path template; supports `{name}`, `{session_id}`,
    /// `{user_id}`, `{message}`, and `{run_id}` substitutions.
    #[builder(into)]
    pub save_response_to_file: Option<String>,

    #[builder(default = true)]
    pub send_media_to_model: bool,
    #[builder(default)]
    pub debug_mode: bool,
}

impl Agent {
    /// Run the agent to completion and return the final run record.
    /// Run-level failures are encoded in the record's status; an `Err` here
    /// means dispatch-time validation failed before any work started.
    pub async fn run(
        &self,
        input: impl Into<InputContent>,
        params: RunParams,
    ) -> Result<RunRecord, DrummerError> {
        dispatch::run(self, input.into(), params).await
    }

    /// Run the agent, yielding lifecycle events as they happen. The final
    /// record is appended to the stream when `yield_run_output` is set.
    pub async fn run_stream(
        &self,
        input: impl Into<InputContent>,
        params: RunParams,
    ) -> Result<RunStream, DrummerError> {
        dispatch::run_stream(self, input.into(), params).await
    }

    /// Persist a `pending` run, execute it in a detached task, and return
    /// immediately. Poll with [`get_run`](Agent::get_run).
    pub async fn run_background(
        &self,
        input: impl Into<InputContent>,
        params: RunParams,
    ) -> Result<RunRecord, DrummerError> {
        dispatch::run_background(self, input.into(), params).await
    }

    /// Resume a paused run with updated tool executions or requirements.
    pub async fn continue_run(
        &self,
        params: ContinueRunParams,
    ) -> Result<RunRecord, DrummerError> {
        dispatch::continue_run(self, params).await
    }

    /// Streamed sibling of [`continue_run`](Agent::continue_run); the stream
    /// opens with `RunContinued`.
    pub async fn continue_run_stream(
        &self,
        params: ContinueRunParams,
    ) -> Result<RunStream, DrummerError> {
        dispatch::continue_run_stream(self, params).await
    }

    /// Read a run from the configured session store.
    pub async fn get_run(
        &self,
        run_id: RunId,
        session_id: &str,
    ) -> Result<Option<RunRecord>, DrummerError> {
        match &self.db {
            Some(db) => db.get_run(run_id, session_id).await,
            None => Err(DrummerError::InvalidState(
                "no session store is configured".into(),
            )),
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model.model_id())
            .field("tools", &self.tools.len())
            .field("retries", &self.retries)
            .finish()
    }
}
