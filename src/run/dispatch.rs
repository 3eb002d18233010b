//! Dispatch: validates inputs, initializes session and context, builds the
//! initial run record, and hands off to the run loop.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cancel;
use super::context::{DependencyMap, RunContext, SessionState};
use super::events::RunStream;
use super::executor::{update_session_metadata, ExecMode, RunExecutor};
use super::options::{apply_overrides_to_context, OptionOverrides, RunOptions};
use super::record::{InputContent, RunInput, RunRecord, RunRequirement, RunStatus};
use super::RunId;
use crate::agent::Agent;
use crate::error::DrummerError;
use crate::knowledge::KnowledgeFilter;
use crate::session::{SessionRecord, SessionStore};
use crate::tools::ToolExecution;
use crate::types::{Audio, ContentPart, FileAttachment, Image, Metrics, ModelMessage, Video};

/// Keyword arguments for [`Agent::run`] and its siblings.
///
/// [`Agent::run`]: crate::agent::Agent::run
#[derive(Default)]
pub struct RunParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub session_state: Option<SessionState>,
    pub run_context: Option<RunContext>,
    pub run_id: Option<RunId>,
    pub audio: Vec<Audio>,
    pub images: Vec<Image>,
    pub videos: Vec<Video>,
    pub files: Vec<FileAttachment>,
    pub knowledge_filters: Option<KnowledgeFilter>,
    pub add_history_to_context: Option<bool>,
    pub add_dependencies_to_context: Option<bool>,
    pub add_session_state_to_context: Option<bool>,
    pub dependencies: Option<DependencyMap>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub output_schema: Option<serde_json::Value>,
    pub yield_run_output: Option<bool>,
    pub stream_events: Option<bool>,
    pub debug_mode: Option<bool>,
}

impl RunParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_session_state(mut self, state: SessionState) -> Self {
        self.session_state = Some(state);
        self
    }

    pub fn with_run_context(mut self, ctx: RunContext) -> Self {
        self.run_context = Some(ctx);
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_images(mut self, images: Vec<Image>) -> Self {
        self.images = images;
        self
    }

    pub fn with_audio(mut self, audio: Vec<Audio>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_videos(mut self, videos: Vec<Video>) -> Self {
        self.videos = videos;
        self
    }

    pub fn with_files(mut self, files: Vec<FileAttachment>) -> Self {
        self.files = files;
        self
    }

    pub fn with_knowledge_filters(mut self, filters: KnowledgeFilter) -> Self {
        self.knowledge_filters = Some(filters);
        self
    }

    pub fn with_add_history_to_context(mut self, flag: bool) -> Self {
        self.add_history_to_context = Some(flag);
        self
    }

    pub fn with_add_dependencies_to_context(mut self, flag: bool) -> Self {
        self.add_dependencies_to_context = Some(flag);
        self
    }

    pub fn with_add_session_state_to_context(mut self, flag: bool) -> Self {
        self.add_session_state_to_context = Some(flag);
        self
    }

    pub fn with_dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_yield_run_output(mut self, flag: bool) -> Self {
        self.yield_run_output = Some(flag);
        self
    }

    pub fn with_stream_events(mut self, flag: bool) -> Self {
        self.stream_events = Some(flag);
        self
    }

    pub fn with_debug_mode(mut self, flag: bool) -> Self {
        self.debug_mode = Some(flag);
        self
    }

    fn take_overrides(&mut self) -> OptionOverrides {
        OptionOverrides {
            stream_events: self.stream_events,
            yield_run_output: self.yield_run_output,
            add_history_to_context: self.add_history_to_context,
            add_dependencies_to_context: self.add_dependencies_to_context,
            add_session_state_to_context: self.add_session_state_to_context,
            dependencies: self.dependencies.take(),
            knowledge_filters: self.knowledge_filters.take(),
            metadata: self.metadata.take(),
            output_schema: self.output_schema.take(),
            debug_mode: self.debug_mode,
        }
    }
}

/// Keyword arguments for [`Agent::continue_run`]. One of `run_record` or
/// `run_id` is required; with `run_id`, one of `updated_tools` or
/// `requirements` is required.
///
/// [`Agent::continue_run`]: crate::agent::Agent::continue_run
#[derive(Default)]
pub struct ContinueRunParams {
    pub run_record: Option<RunRecord>,
    pub run_id: Option<RunId>,
    pub updated_tools: Option<Vec<ToolExecution>>,
    pub requirements: Option<Vec<RunRequirement>>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub run_context: Option<RunContext>,
    pub knowledge_filters: Option<KnowledgeFilter>,
    pub dependencies: Option<DependencyMap>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub yield_run_output: Option<bool>,
    pub stream_events: Option<bool>,
    pub debug_mode: Option<bool>,
}

impl ContinueRunParams {
    pub fn from_record(record: RunRecord) -> Self {
        Self {
            run_record: Some(record),
            ..Default::default()
        }
    }

    pub fn from_run_id(run_id: RunId) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    pub fn with_updated_tools(mut self, tools: Vec<ToolExecution>) -> Self {
        self.updated_tools = Some(tools);
        self
    }

    pub fn with_requirements(mut self, requirements: Vec<RunRequirement>) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_stream_events(mut self, flag: bool) -> Self {
        self.stream_events = Some(flag);
        self
    }

    pub fn with_yield_run_output(mut self, flag: bool) -> Self {
        self.yield_run_output = Some(flag);
        self
    }
}

pub(crate) async fn run(
    agent: &Agent,
    input: InputContent,
    params: RunParams,
) -> Result<RunRecord, DrummerError> {
    let executor = prepare_run(agent, input, params).await?;
    Ok(executor.execute().await)
}

pub(crate) async fn run_stream(
    agent: &Agent,
    input: InputContent,
    params: RunParams,
) -> Result<RunStream, DrummerError> {
    let executor = prepare_run(agent, input, params).await?;
    Ok(executor.execute_stream())
}

pub(crate) async fn continue_run(
    agent: &Agent,
    params: ContinueRunParams,
) -> Result<RunRecord, DrummerError> {
    let executor = prepare_continue(agent, params).await?;
    Ok(executor.execute().await)
}

pub(crate) async fn continue_run_stream(
    agent: &Agent,
    params: ContinueRunParams,
) -> Result<RunStream, DrummerError> {
    let executor = prepare_continue(agent, params).await?;
    Ok(executor.execute_stream())
}

async fn prepare_run(
    agent: &Agent,
    input: InputContent,
    mut params: RunParams,
) -> Result<RunExecutor, DrummerError> {
    let run_id = params.run_id.unwrap_or_else(Uuid::new_v4);
    let session_id = params
        .session_id
        .take()
        .or_else(|| agent.session_id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let user_id = params.user_id.take().or_else(|| agent.user_id.clone());

    let wants_history = params
        .add_history_to_context
        .unwrap_or(agent.add_history_to_context);
    if wants_history && agent.db.is_none() {
        // The flag stays set; with no store there is simply no history.
        tracing::warn!(
            run_id = %run_id,
            "add_history_to_context is set but no session store is configured; history will not be added"
        );
    }

    // Read the session before resolving options so session-stored metadata
    // is visible.
    let mut pre_session = match &agent.db {
        Some(db) => db.read_or_create(&session_id, user_id.as_deref()).await?,
        None => SessionRecord::new(session_id.clone(), user_id.clone()),
    };
    update_session_metadata(agent, &mut pre_session);

    let overrides = params.take_overrides();
    let options = RunOptions::resolve(agent, &overrides);

    let mut ctx = params
        .run_context
        .take()
        .unwrap_or_else(|| RunContext::new(run_id, session_id.clone(), user_id.clone()));
    ctx.run_id = run_id;
    ctx.session_id = session_id.clone();
    ctx.user_id = user_id.clone();
    if let Some(state) = params.session_state.take() {
        ctx.session_state = Some(state);
    }
    apply_overrides_to_context(agent, overrides, &mut ctx);

    let response_format = if agent.parser_model.is_none() {
        ctx.output_schema.clone()
    } else {
        None
    };

    let mut record = RunRecord::empty(run_id, session_id);
    record.status = RunStatus::Running;
    record.agent_id = agent.id.clone();
    record.agent_name = agent.name.clone();
    record.user_id = user_id;
    record.model_id = Some(agent.model.model_id().to_string());
    record.model_provider = Some(agent.model.provider_name().to_string());
    record.metadata = ctx.metadata.clone();
    record.session_state = ctx.session_state.clone();
    record.input = Some(RunInput {
        content: input,
        images: std::mem::take(&mut params.images),
        videos: std::mem::take(&mut params.videos),
        audios: std::mem::take(&mut params.audio),
        files: std::mem::take(&mut params.files),
    });
    record.metrics = Some(Metrics::started());

    Ok(RunExecutor::new(
        agent.clone(),
        record,
        ctx,
        options,
        ExecMode::Start,
        Some(pre_session),
        None,
        response_format,
    ))
}

async fn prepare_continue(
    agent: &Agent,
    mut params: ContinueRunParams,
) -> Result<RunExecutor, DrummerError> {
    if params.run_record.is_none() && params.run_id.is_none() {
        return Err(DrummerError::InvalidArgument(
            "either run_record or run_id must be provided".into(),
        ));
    }
    if params.run_record.is_none()
        && params.updated_tools.is_none()
        && params.requirements.is_none()
    {
        return Err(DrummerError::InvalidArgument(
            "continuing from a run_id requires updated_tools or requirements".into(),
        ));
    }

    let session_id = match (&params.run_record, &params.session_id, &agent.session_id) {
        (Some(record), _, _) => record.session_id.clone(),
        (None, Some(session_id), _) => session_id.clone(),
        (None, None, Some(session_id)) => session_id.clone(),
        (None, None, None) => {
            return Err(DrummerError::InvalidArgument(
                "a session id is required to continue a run from a run_id".into(),
            ))
        }
    };
    let user_id = params.user_id.take().or_else(|| agent.user_id.clone());

    let mut pre_session = match &agent.db {
        Some(db) => db.read_or_create(&session_id, user_id.as_deref()).await?,
        None => SessionRecord::new(session_id.clone(), user_id.clone()),
    };
    update_session_metadata(agent, &mut pre_session);

    // Locate the paused run.
    let mut record = match params.run_record.take() {
        Some(record) => record,
        None => {
            let run_id = params.run_id.ok_or_else(|| {
                DrummerError::InvalidArgument("either run_record or run_id must be provided".into())
            })?;
            pre_session
                .get_run(run_id)
                .cloned()
                .ok_or_else(|| DrummerError::InvalidState(format!("no run found for id {run_id}")))?
        }
    };

    let overrides = OptionOverrides {
        stream_events: params.stream_events,
        yield_run_output: params.yield_run_output,
        dependencies: params.dependencies.take(),
        knowledge_filters: params.knowledge_filters.take(),
        metadata: params.metadata.take(),
        debug_mode: params.debug_mode,
        ..Default::default()
    };
    let options = RunOptions::resolve(agent, &overrides);

    let mut ctx = params
        .run_context
        .take()
        .unwrap_or_else(|| RunContext::new(record.run_id, session_id.clone(), user_id.clone()));
    ctx.run_id = record.run_id;
    ctx.session_id = session_id;
    ctx.user_id = user_id.clone();
    ctx.session_state = pre_session
        .session_state()
        .or_else(|| record.session_state.clone());
    apply_overrides_to_context(agent, overrides, &mut ctx);
    super::context::resolve_dependencies(agent, &mut ctx).await;

    // Re-apply the caller's resolved tool executions onto the paused run,
    // matching by tool-call id.
    if let Some(requirements) = params.requirements.take() {
        let updates: Vec<ToolExecution> = requirements
            .iter()
            .filter_map(|req| req.tool_execution.clone())
            .collect();
        record.requirements = requirements;
        apply_tool_updates(&mut record, updates)?;
    } else if let Some(updates) = params.updated_tools.take() {
        apply_tool_updates(&mut record, updates)?;
    }

    let messages = continuation_messages(&record);
    record.status = RunStatus::Running;
    record.touch();

    let response_format = if agent.parser_model.is_none() {
        ctx.output_schema.clone()
    } else {
        None
    };

    Ok(RunExecutor::new(
        agent.clone(),
        record,
        ctx,
        options,
        ExecMode::Continue,
        Some(pre_session),
        Some(messages),
        response_format,
    ))
}

/// Substitute updated tool records in place. A tool-call id with no match on
/// the paused run is an error.
fn apply_tool_updates(
    record: &mut RunRecord,
    updates: Vec<ToolExecution>,
) -> Result<(), DrummerError> {
    for update in updates {
        match record
            .tools
            .iter_mut()
            .find(|tool| tool.tool_call_id == update.tool_call_id)
        {
            Some(existing) => *existing = update,
            None => {
                return Err(DrummerError::InvalidArgument(format!(
                    "no tool call with id {} on run {}",
                    update.tool_call_id, record.run_id
                )))
            }
        }
    }
    Ok(())
}

/// The continuation input: the paused run's message sequence plus result
/// messages for tool calls the caller resolved.
fn continuation_messages(record: &RunRecord) -> Vec<ModelMessage> {
    let mut messages = record.messages.clone();
    for tool in &record.tools {
        if tool.result.is_none() || tool.is_paused {
            continue;
        }
        let already_present = messages.iter().any(|message| {
            message.content.iter().any(|part| {
                matches!(part, ContentPart::ToolResult(existing) if existing.tool_call_id == tool.tool_call_id)
            })
        });
        if !already_present {
            messages.push(ModelMessage::tool_result(tool.clone()));
        }
    }
    messages
}

// ---------------------------------------------------------------------------
// Background-spawn variant
// ---------------------------------------------------------------------------

static BACKGROUND_HANDLES: OnceLock<Mutex<HashMap<RunId, JoinHandle<()>>>> = OnceLock::new();

fn background_handles() -> &'static Mutex<HashMap<RunId, JoinHandle<()>>> {
    BACKGROUND_HANDLES.get_or_init(Default::default)
}

/// Persist a `Pending` run, spawn the buffered loop, and return immediately.
/// Callers poll the session store via `get_run`. The task handle is retained
/// in a process-scoped set until the run finishes.
pub(crate) async fn run_background(
    agent: &Agent,
    input: InputContent,
    params: RunParams,
) -> Result<RunRecord, DrummerError> {
    let Some(db) = agent.db.clone() else {
        return Err(DrummerError::InvalidArgument(
            "background runs require a configured session store".into(),
        ));
    };

    let mut executor = prepare_run(agent, input, params).await?;
    let run_id = executor.record().run_id;
    let session_id = executor.record().session_id.clone();
    let user_id = executor.record().user_id.clone();
    cancel::register_run(run_id);

    // Persist the pending run so polling finds it immediately.
    executor.record_mut().status = RunStatus::Pending;
    let mut session = db.read_or_create(&session_id, user_id.as_deref()).await?;
    session.upsert_run(executor.record().clone());
    db.upsert(session).await?;
    let pending = executor.record().clone();
    tracing::info!(run_id = %run_id, "background run created with pending status");

    let handle = tokio::spawn(async move {
        // Transition to running; rapid pollers may miss this state.
        executor.record_mut().status = RunStatus::Running;
        match db.read_or_create(&session_id, user_id.as_deref()).await {
            Ok(mut session) => {
                session.upsert_run(executor.record().clone());
                if let Err(err) = db.upsert(session).await {
                    tracing::warn!(run_id = %run_id, error = %err, "failed to persist running status");
                }
            }
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "failed to read session for running status");
            }
        }

        // The inner loop persists every subsequent transition.
        let _record = executor.execute().await;

        if let Ok(mut handles) = background_handles().lock() {
            handles.remove(&run_id);
        }
    });
    if let Ok(mut handles) = background_handles().lock() {
        handles.insert(run_id, handle);
    }

    Ok(pending)
}
