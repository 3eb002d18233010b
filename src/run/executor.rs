//! The run loop: a single phase pipeline executed per attempt, driven either
//! buffered (one final record) or streamed (events over a bounded channel).
//!
//! One engine serves every public variant. The streamed driver runs the same
//! phase pipeline with a channel-backed emitter; the buffered driver runs it
//! with a null emitter and never constructs events. Continuations reuse the
//! pipeline tail, skipping dependency resolution and pre-hooks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::background::BackgroundTasks;
use super::cancel;
use super::cleanup::cleanup_and_store;
use super::context::{resolve_dependencies, RunContext};
use super::events::{EventPipeline, RunEventPayload, RunStream, RunStreamItem};
use super::messages::build_run_messages;
use super::options::RunOptions;
use super::record::{RunInput, RunRecord, RunStatus};
use super::response::{
    apply_model_response, convert_to_structured_format, generate_with_output_model,
    parse_with_parser_model,
};
use crate::agent::Agent;
use crate::error::DrummerError;
use crate::model::{ModelEvent, ModelRequest, ModelResponse};
use crate::run::approval::create_approval_from_pause;
use crate::session::{SessionRecord, SessionStore};
use crate::tools::{disconnect_connectable_tools, select_tools};
use crate::types::ModelMessage;

/// How the executor entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecMode {
    /// Fresh run: full pipeline.
    Start,
    /// Resumption of a paused run: no dependency resolution, no pre-hooks,
    /// no background tasks, `RunContinued` instead of `RunStarted`.
    Continue,
}

enum Emitter {
    Null,
    Channel(mpsc::Sender<RunStreamItem>),
}

impl Emitter {
    fn streaming(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    async fn send(&self, item: RunStreamItem) {
        if let Self::Channel(tx) = self {
            // A dropped consumer is not an error; the run still completes
            // and persists.
            let _ = tx.send(item).await;
        }
    }
}

enum AttemptOutcome {
    Completed,
    Paused,
}

pub(crate) struct RunExecutor {
    agent: Agent,
    record: RunRecord,
    ctx: RunContext,
    options: RunOptions,
    pipeline: EventPipeline,
    emitter: Emitter,
    mode: ExecMode,
    pre_session: Option<SessionRecord>,
    session: Option<SessionRecord>,
    background: BackgroundTasks,
    /// Message sequence prepared by the continuation dispatcher; `Start`
    /// builds its own sequence each attempt.
    prepared_messages: Option<Vec<ModelMessage>>,
    response_format: Option<serde_json::Value>,
}

impl RunExecutor {
    pub(crate) fn new(
        agent: Agent,
        record: RunRecord,
        ctx: RunContext,
        options: RunOptions,
        mode: ExecMode,
        pre_session: Option<SessionRecord>,
        prepared_messages: Option<Vec<ModelMessage>>,
        response_format: Option<serde_json::Value>,
    ) -> Self {
        let pipeline = EventPipeline::new(&agent.events_to_skip, agent.store_events);
        Self {
            agent,
            record,
            ctx,
            options,
            pipeline,
            emitter: Emitter::Null,
            mode,
            pre_session,
            session: None,
            background: BackgroundTasks::default(),
            prepared_messages,
            response_format,
        }
    }

    pub(crate) fn record(&self) -> &RunRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut RunRecord {
        &mut self.record
    }

    /// Buffered driver: runs to a terminal status and returns the record.
    pub(crate) async fn execute(mut self) -> RunRecord {
        self.drive().await
    }

    /// Streamed driver: spawns the pipeline and hands back the event
    /// sequence. The channel is bounded so event emission is a genuine
    /// suspension point with backpressure from the consumer.
    pub(crate) fn execute_stream(mut self) -> RunStream {
        let (tx, rx) = mpsc::channel(1);
        self.emitter = Emitter::Channel(tx);
        tokio::spawn(async move {
            self.drive().await;
        });
        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive(mut self) -> RunRecord {
        cancel::register_run(self.record.run_id);
        tracing::debug!(run_id = %self.record.run_id, mode = ?self.mode, "agent run start");

        let retries = self.agent.retries;
        for attempt in 0..=retries {
            if attempt > 0 {
                tracing::debug!(
                    run_id = %self.record.run_id,
                    attempt = attempt + 1,
                    attempts = retries + 1,
                    "retrying agent run"
                );
            }
            match self.attempt(attempt).await {
                Ok(AttemptOutcome::Completed) => break,
                Ok(AttemptOutcome::Paused) => {
                    self.handle_paused().await;
                    break;
                }
                Err(DrummerError::Cancelled { run_id }) => {
                    self.handle_cancelled(DrummerError::Cancelled { run_id }).await;
                    break;
                }
                Err(DrummerError::Interrupted) => {
                    self.handle_interrupted().await;
                    break;
                }
                Err(err @ (DrummerError::InputValidation(_) | DrummerError::OutputValidation(_))) => {
                    self.handle_terminal_error(err).await;
                    break;
                }
                Err(err) if attempt < retries => {
                    let delay = retry_delay(&self.agent, attempt);
                    tracing::warn!(
                        run_id = %self.record.run_id,
                        attempt = attempt + 1,
                        attempts = retries + 1,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.handle_terminal_error(err).await;
                    break;
                }
            }
        }

        // Terminal cleanup on every exit path.
        self.background.abort_pending();
        disconnect_connectable_tools(&self.agent).await;
        cancel::cleanup_run(self.record.run_id);
        tracing::debug!(
            run_id = %self.record.run_id,
            status = %self.record.status,
            "agent run end"
        );
        self.record
    }

    async fn attempt(&mut self, attempt: usize) -> Result<AttemptOutcome, DrummerError> {
        // 1+2. Session load and metadata/session-state refresh.
        self.load_session(attempt).await?;

        let mut pre_hook_events = Vec::new();
        if self.mode == ExecMode::Start {
            self.init_session_state();
            // 3. Dependency resolution: failures keep the original entry.
            resolve_dependencies(&self.agent, &mut self.ctx).await;
            // 4. Pre-hooks may rewrite the input or reject it. Their events
            // are buffered and flushed after the opening event, which must
            // precede everything else on the stream.
            pre_hook_events = self.run_pre_hooks().await?;
        }

        // 5. Tool selection.
        let tools = select_tools(&self.agent, &self.record, &self.ctx).await;

        // 6. Message build. An empty sequence is an error worth logging but
        // the model is still consulted.
        let run_messages = match self.mode {
            ExecMode::Start => {
                let session = match self.session.as_ref() {
                    Some(session) => session,
                    None => return Err(DrummerError::InvalidState("session not loaded".into())),
                };
                build_run_messages(&self.agent, &mut self.record, &self.ctx, session, &self.options)
                    .await
            }
            ExecMode::Continue => self.prepared_messages.clone().unwrap_or_default(),
        };
        if run_messages.is_empty() {
            tracing::error!(run_id = %self.record.run_id, "no messages to be sent to the model");
        }
        if self.options.debug_mode {
            tracing::debug!(
                run_id = %self.record.run_id,
                tools = tools.len(),
                messages = run_messages.len(),
                "run request prepared"
            );
        }

        // 7. Launch background enrichment. Point of no return for the
        // workers; earlier exits never start them.
        if self.mode == ExecMode::Start {
            let shared = Arc::new(run_messages.clone());
            let session = match self.session.as_ref() {
                Some(session) => session,
                None => return Err(DrummerError::InvalidState("session not loaded".into())),
            };
            self.background
                .start(&self.agent, &shared, session, self.ctx.user_id.as_deref());
        }

        // 8. Run opening event.
        match self.mode {
            ExecMode::Start => {
                let payload = RunEventPayload::RunStarted {
                    model_id: self.record.model_id.clone(),
                    model_provider: self.record.model_provider.clone(),
                };
                self.emit_gated(payload).await;
            }
            ExecMode::Continue => self.emit_gated(RunEventPayload::RunContinued).await,
        }
        for payload in pre_hook_events.drain(..) {
            self.emit_gated(payload).await;
        }

        // 9. Reasoning.
        if self.mode == ExecMode::Start {
            self.run_reasoning(&run_messages).await?;
        }

        // 10. Suspension point before the model call.
        cancel::raise_if_cancelled(self.record.run_id)?;

        // 11. Model call.
        let request = ModelRequest {
            messages: run_messages.clone(),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: self.agent.tool_choice.clone(),
            tool_call_limit: self.agent.tool_call_limit,
            response_format: self.response_format.clone(),
            send_media: self.agent.send_media_to_model,
        };
        let model_response = if self.emitter.streaming() {
            self.model_call_stream(&request).await?
        } else {
            self.agent.model.respond(&request).await?
        };

        // 12. Suspension point after the model call.
        cancel::raise_if_cancelled(self.record.run_id)?;

        // 13. Response assembly, secondary models included.
        apply_model_response(&mut self.record, &model_response, &run_messages);
        if self.agent.output_model.is_some() {
            generate_with_output_model(&self.agent, &mut self.record, &run_messages).await?;
            if let Some(content) = self.record.content.clone() {
                self.emit_stream(RunEventPayload::RunContent { content }).await;
            }
        }
        parse_with_parser_model(&self.agent, &mut self.record, &self.ctx).await;

        // 14. Pause check: enrichment must be visible when the run resumes,
        // so the workers are joined before the pause record is written.
        if self.record.has_paused_tools() {
            self.join_background_tasks().await;
            return Ok(AttemptOutcome::Paused);
        }

        self.emit_gated(RunEventPayload::RunContentCompleted).await;

        // 15+16. Structured-format conversion. Media retention is decided by
        // the scrub step in cleanup.
        convert_to_structured_format(&self.agent, &mut self.record, &self.ctx);

        // 17. Post-hooks.
        self.run_post_hooks().await?;

        // 18. Suspension point after post-hooks.
        cancel::raise_if_cancelled(self.record.run_id)?;

        // 19. Join background enrichment.
        self.join_background_tasks().await;

        // 20. Session summary.
        self.create_session_summary().await;

        // 21. Finalize: copy final session state onto the record, build the
        // completed event, set the terminal status.
        if let Some(state) = self.session.as_ref().and_then(SessionRecord::session_state) {
            self.record.session_state = Some(state);
        }
        let completed_event = if self.emitter.streaming() && self.options.stream_events {
            let payload = RunEventPayload::RunCompleted {
                content: self.record.content.clone(),
                structured_content: self.record.structured_content.clone(),
            };
            self.pipeline.handle(payload, &mut self.record)
        } else {
            None
        };
        self.record.status = RunStatus::Completed;

        // 22. Cleanup and store.
        self.cleanup_store().await;

        // 23. Completed event, optional final record, telemetry.
        if let Some(event) = completed_event {
            self.emitter.send(RunStreamItem::Event(event)).await;
        }
        if self.emitter.streaming() && self.options.yield_run_output {
            self.emitter
                .send(RunStreamItem::Record(Box::new(self.record.clone())))
                .await;
        }
        tracing::debug!(
            run_id = %self.record.run_id,
            session_id = %self.record.session_id,
            tokens = self.record.metrics.as_ref().map(|m| m.usage.total_tokens).unwrap_or(0),
            "agent run completed"
        );
        Ok(AttemptOutcome::Completed)
    }

    async fn load_session(&mut self, attempt: usize) -> Result<(), DrummerError> {
        if attempt == 0 && self.pre_session.is_some() {
            // The dispatcher already read the session and refreshed its
            // metadata.
            self.session = self.pre_session.take();
            return Ok(());
        }
        let mut session = match &self.agent.db {
            Some(db) => {
                db.read_or_create(&self.record.session_id, self.ctx.user_id.as_deref())
                    .await?
            }
            None => SessionRecord::new(self.record.session_id.clone(), self.ctx.user_id.clone()),
        };
        update_session_metadata(&self.agent, &mut session);
        self.session = Some(session);
        Ok(())
    }

    /// Merge session-stored state under caller-provided values and seed the
    /// run-scoped id triple.
    fn init_session_state(&mut self) {
        if let Some(stored) = self.session.as_ref().and_then(SessionRecord::session_state) {
            let state = self.ctx.session_state.get_or_insert_with(HashMap::new);
            for (key, value) in stored {
                state.entry(key).or_insert(value);
            }
        }
        self.ctx.initialize_session_state();
    }

    /// Run the pre-hooks, collecting their events for the caller to forward
    /// once the opening event is out.
    async fn run_pre_hooks(&mut self) -> Result<Vec<RunEventPayload>, DrummerError> {
        let mut events = Vec::new();
        if self.agent.pre_hooks.is_empty() {
            return Ok(events);
        }
        let hooks = self.agent.pre_hooks.clone();
        for hook in hooks {
            let name = hook.name().to_string();
            events.push(RunEventPayload::PreHookStarted { hook: name.clone() });

            let session = match self.session.as_ref() {
                Some(session) => session,
                None => return Err(DrummerError::InvalidState("session not loaded".into())),
            };
            let mut input = self
                .record
                .input
                .take()
                .unwrap_or_else(|| RunInput::new(""));
            let result = hook.run(&mut input, &mut self.ctx, session).await;
            self.record.input = Some(input);
            result?;

            events.push(RunEventPayload::PreHookCompleted { hook: name });
        }
        Ok(events)
    }

    async fn run_post_hooks(&mut self) -> Result<(), DrummerError> {
        if self.agent.post_hooks.is_empty() {
            return Ok(());
        }
        let hooks = self.agent.post_hooks.clone();
        for hook in hooks {
            let name = hook.name().to_string();
            self.emit_gated(RunEventPayload::PostHookStarted { hook: name.clone() })
                .await;
            {
                let session = match self.session.as_ref() {
                    Some(session) => session,
                    None => return Err(DrummerError::InvalidState("session not loaded".into())),
                };
                hook.run(&mut self.record, &mut self.ctx, session).await?;
            }
            self.emit_gated(RunEventPayload::PostHookCompleted { hook: name })
                .await;
        }
        Ok(())
    }

    async fn run_reasoning(&mut self, messages: &[ModelMessage]) -> Result<(), DrummerError> {
        let Some(reasoner) = self.agent.reasoner.clone() else {
            return Ok(());
        };
        self.emit_gated(RunEventPayload::ReasoningStarted).await;
        let content = reasoner.reason(messages).await?;
        self.record.reasoning_content = content.clone();
        self.emit_gated(RunEventPayload::ReasoningCompleted { content })
            .await;
        Ok(())
    }

    /// Consume the model's event stream, forwarding through the event
    /// pipeline and checking cancellation between events. Content produced
    /// before a cancellation stays on the record.
    async fn model_call_stream(
        &mut self,
        request: &ModelRequest,
    ) -> Result<ModelResponse, DrummerError> {
        let mut stream = self.agent.model.respond_stream(request).await?;
        let mut accumulated = String::new();
        let mut final_response: Option<ModelResponse> = None;

        while let Some(event) = stream.next().await {
            cancel::raise_if_cancelled(self.record.run_id)?;
            match event? {
                ModelEvent::ContentDelta { text } => {
                    accumulated.push_str(&text);
                    self.record.content = Some(accumulated.clone());
                    if self.agent.output_model.is_some() {
                        // The output model's content takes the primary slot.
                        self.emit_gated(RunEventPayload::IntermediateRunContent {
                            content: text,
                        })
                        .await;
                    } else {
                        self.emit_stream(RunEventPayload::RunContent { content: text })
                            .await;
                    }
                }
                ModelEvent::ToolCallStarted { tool } => {
                    self.emit_gated(RunEventPayload::ToolCallStarted { tool })
                        .await;
                }
                ModelEvent::ToolCallCompleted { tool } => {
                    self.emit_gated(RunEventPayload::ToolCallCompleted { tool })
                        .await;
                }
                ModelEvent::Completed { response } => {
                    final_response = Some(response);
                }
            }
            cancel::raise_if_cancelled(self.record.run_id)?;
        }

        Ok(final_response.unwrap_or_else(|| ModelResponse {
            content: (!accumulated.is_empty()).then_some(accumulated),
            ..Default::default()
        }))
    }

    async fn join_background_tasks(&mut self) {
        if let Some(memories) = self.background.join().await {
            self.emit_gated(RunEventPayload::MemoryUpdateCompleted { memories })
                .await;
        }
    }

    async fn create_session_summary(&mut self) {
        let Some(summarizer) = self.agent.session_summarizer.clone() else {
            return;
        };
        // Upsert the current run first so the summarizer sees it.
        if let Some(session) = self.session.as_mut() {
            session.upsert_run(self.record.clone());
        }
        self.emit_gated(RunEventPayload::SessionSummaryStarted).await;

        let summary = match self.session.as_ref() {
            Some(session) => match summarizer.summarize(session).await {
                Ok(summary) => Some(summary),
                Err(err) => {
                    tracing::warn!(run_id = %self.record.run_id, error = %err, "session summary creation failed");
                    None
                }
            },
            None => None,
        };
        if summary.is_some() {
            if let Some(session) = self.session.as_mut() {
                session.summary = summary.clone();
            }
        }
        self.emit_gated(RunEventPayload::SessionSummaryCompleted {
            summary: self.session.as_ref().and_then(|s| s.summary.clone()),
        })
        .await;
    }

    async fn handle_paused(&mut self) {
        self.record.status = RunStatus::Paused;
        if self
            .record
            .content
            .as_deref()
            .map_or(true, |content| content.is_empty())
        {
            self.record.content = Some(self.record.paused_content());
        }

        // The pause event is built (and stored) before the session write so
        // the persisted record carries it; it is yielded after the approval
        // record exists.
        let pause_event = if self.emitter.streaming() {
            let payload = RunEventPayload::RunPaused {
                tools: self.record.paused_tools(),
                requirements: self.record.requirements.clone(),
            };
            self.pipeline.handle(payload, &mut self.record)
        } else {
            None
        };

        self.cleanup_store().await;
        self.write_approval_record().await;

        if let Some(event) = pause_event {
            self.emitter.send(RunStreamItem::Event(event)).await;
        }
        if self.emitter.streaming() && self.options.yield_run_output {
            self.emitter
                .send(RunStreamItem::Record(Box::new(self.record.clone())))
                .await;
        }
        tracing::debug!(run_id = %self.record.run_id, "agent run paused");
    }

    /// The session is written before the approval record; a failure here
    /// leaves a paused run without an approval, which the continuation
    /// dispatcher tolerates.
    async fn write_approval_record(&mut self) {
        let Some(store) = self.agent.approvals.clone() else {
            return;
        };
        if let Err(err) = create_approval_from_pause(
            store.as_ref(),
            &self.record,
            self.agent.id.as_deref(),
            self.agent.name.as_deref(),
            self.record.user_id.as_deref(),
        )
        .await
        {
            tracing::error!(run_id = %self.record.run_id, error = %err, "failed to write approval record");
        }
    }

    async fn handle_cancelled(&mut self, err: DrummerError) {
        tracing::info!(run_id = %self.record.run_id, "run was cancelled");
        self.record.status = RunStatus::Cancelled;
        // Partial content streamed before the cancellation point survives.
        if self
            .record
            .content
            .as_deref()
            .map_or(true, |content| content.is_empty())
        {
            self.record.content = Some(err.to_string());
        }
        self.emit_stream(RunEventPayload::RunCancelled {
            reason: err.to_string(),
        })
        .await;
        self.cleanup_store().await;
    }

    async fn handle_interrupted(&mut self) {
        self.record.status = RunStatus::Cancelled;
        self.record.content = Some("Operation cancelled by user".into());
        self.emit_stream(RunEventPayload::RunCancelled {
            reason: "Operation cancelled by user".into(),
        })
        .await;
        self.cleanup_store().await;
    }

    async fn handle_terminal_error(&mut self, err: DrummerError) {
        self.record.status = RunStatus::Error;
        if self
            .record
            .content
            .as_deref()
            .map_or(true, |content| content.is_empty())
        {
            self.record.content = Some(err.to_string());
        }
        tracing::error!(run_id = %self.record.run_id, error = %err, "error in agent run");

        // Error events are recorded on the run even when event storage is
        // off, but only streamed runs construct them.
        let error_event = if self.emitter.streaming() {
            let payload = RunEventPayload::RunError {
                message: err.to_string(),
                category: err.category(),
            };
            Some(self.pipeline.handle_error(payload, &mut self.record))
        } else {
            None
        };

        self.cleanup_store().await;

        if let Some(event) = error_event {
            self.emitter.send(RunStreamItem::Event(event)).await;
        }
    }

    async fn cleanup_store(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        cleanup_and_store(&self.agent, &mut self.record, session, &self.ctx).await;
    }

    async fn emit_gated(&mut self, payload: RunEventPayload) {
        if !self.emitter.streaming() || !self.options.stream_events {
            return;
        }
        if let Some(event) = self.pipeline.handle(payload, &mut self.record) {
            self.emitter.send(RunStreamItem::Event(event)).await;
        }
    }

    /// Emit regardless of `stream_events`; content, pause, cancel, and error
    /// events always reach a streaming caller.
    async fn emit_stream(&mut self, payload: RunEventPayload) {
        if !self.emitter.streaming() {
            return;
        }
        if let Some(event) = self.pipeline.handle(payload, &mut self.record) {
            self.emitter.send(RunStreamItem::Event(event)).await;
        }
    }
}

/// Backoff for the next attempt: `delay_between_retries * 2^attempt` when
/// exponential backoff is enabled, flat otherwise.
fn retry_delay(agent: &Agent, attempt: usize) -> Duration {
    if agent.exponential_backoff {
        agent.delay_between_retries * 2u32.saturating_pow(attempt as u32)
    } else {
        agent.delay_between_retries
    }
}

/// Refresh session-level metadata from the agent: name the session after the
/// agent when unnamed and fill metadata keys the session does not carry yet.
pub(crate) fn update_session_metadata(agent: &Agent, session: &mut SessionRecord) {
    if session.session_name().is_none() {
        if let Some(name) = &agent.name {
            session.set_session_name(name.clone());
        }
    }
    for (key, value) in &agent.metadata {
        session
            .metadata
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    if session.user_id.is_none() {
        session.user_id = agent.user_id.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt_when_exponential() {
        let mut agent = crate::agent::tests::test_agent();
        agent.delay_between_retries = Duration::from_millis(100);
        agent.exponential_backoff = true;
        assert_eq!(retry_delay(&agent, 0), Duration::from_millis(100));
        assert_eq!(retry_delay(&agent, 1), Duration::from_millis(200));
        assert_eq!(retry_delay(&agent, 2), Duration::from_millis(400));

        agent.exponential_backoff = false;
        assert_eq!(retry_delay(&agent, 2), Duration::from_millis(100));
    }

    #[test]
    fn session_metadata_refresh_does_not_clobber_existing_values() {
        let mut agent = crate::agent::tests::test_agent();
        agent.name = Some("drummer".into());
        agent
            .metadata
            .insert("env".into(), serde_json::json!("prod"));

        let mut session = SessionRecord::new("s1", None);
        session.metadata.insert("env".into(), serde_json::json!("dev"));
        update_session_metadata(&agent, &mut session);

        assert_eq!(session.session_name(), Some("drummer"));
        assert_eq!(session.metadata["env"], serde_json::json!("dev"));
    }
}
