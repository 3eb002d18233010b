//! Shared test support: scripted model backends and stub collaborators.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drummer::error::DrummerError;
use drummer::model::{ModelBackend, ModelEvent, ModelEventStream, ModelRequest, ModelResponse};
use drummer::prelude::*;
use drummer::run::context::RunContext;
use drummer::run::record::RunInput;
use drummer::types::Usage;

/// What the scripted backend does on each call.
#[derive(Clone, Copy)]
pub enum Scenario {
    /// Always answer with plain text.
    SimpleText,
    /// Call 0 pauses on a confirmation-gated tool; later calls answer text.
    PausedTool,
    /// Call 0 fails with a transient model error; later calls succeed.
    FailThenSucceed,
    /// Every call fails.
    AlwaysFail,
    /// Stream two quick content chunks, then a third after a long gap.
    SlowChunks,
    /// Buffered response that takes a while, for cancellation tests.
    SlowRespond,
}

pub struct StubBackend {
    scenario: Scenario,
    pub calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: Some(text.to_string()),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn paused_tool() -> ToolExecution {
    ToolExecution::new(
        "call-1",
        "delete_rows",
        serde_json::json!({"table": "users"}),
    )
    .paused_for_confirmation()
}

#[async_trait]
impl ModelBackend for StubBackend {
    fn provider_name(&self) -> &str {
        "stub"
    }

    fn model_id(&self) -> &str {
        "stub-model"
    }

    async fn respond(&self, _request: &ModelRequest) -> Result<ModelResponse, DrummerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scenario {
            Scenario::SimpleText => Ok(text_response("hello there")),
            Scenario::PausedTool => {
                if call == 0 {
                    Ok(ModelResponse {
                        tool_executions: vec![paused_tool()],
                        ..Default::default()
                    })
                } else {
                    Ok(text_response("rows deleted"))
                }
            }
            Scenario::FailThenSucceed => {
                if call == 0 {
                    Err(DrummerError::Model("transient upstream failure".into()))
                } else {
                    Ok(text_response("recovered"))
                }
            }
            Scenario::AlwaysFail => Err(DrummerError::Model("backend unavailable".into())),
            Scenario::SlowChunks => Ok(text_response("onetwothree")),
            Scenario::SlowRespond => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(text_response("slow answer"))
            }
        }
    }

    async fn respond_stream(
        &self,
        request: &ModelRequest,
    ) -> Result<ModelEventStream, DrummerError> {
        if let Scenario::SlowChunks = self.scenario {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Ok(Box::pin(async_stream::stream! {
                yield Ok(ModelEvent::ContentDelta { text: "one".into() });
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield Ok(ModelEvent::ContentDelta { text: "two".into() });
                tokio::time::sleep(Duration::from_millis(500)).await;
                yield Ok(ModelEvent::ContentDelta { text: "three".into() });
                yield Ok(ModelEvent::Completed { response: text_response("onetwothree") });
            }));
        }

        let response = self.respond(request).await?;
        Ok(Box::pin(async_stream::stream! {
            if let Some(content) = response.content.clone() {
                if !content.is_empty() {
                    yield Ok(ModelEvent::ContentDelta { text: content });
                }
            }
            for tool in response.tool_executions.clone() {
                yield Ok(ModelEvent::ToolCallCompleted { tool });
            }
            yield Ok(ModelEvent::Completed { response });
        }))
    }
}

/// Agent wired to a scripted backend and an in-memory session store.
pub fn stub_agent(
    scenario: Scenario,
) -> (Agent, Arc<AtomicUsize>, Arc<InMemorySessionStore>) {
    let backend = StubBackend::new(scenario);
    let calls = backend.calls.clone();
    let store = Arc::new(InMemorySessionStore::new());
    let agent = Agent::builder()
        .model(Arc::new(backend))
        .id("agent-1")
        .name("test-agent")
        .db(store.clone() as Arc<dyn SessionStore>)
        .build();
    (agent, calls, store)
}

/// Memory extractor that records whether it finished and optionally dawdles.
pub struct FlagMemory {
    pub ran: Arc<AtomicBool>,
    pub delay: Duration,
}

impl FlagMemory {
    pub fn new(delay: Duration) -> (Arc<Self>, Arc<AtomicBool>) {
        let ran = Arc::new(AtomicBool::new(false));
        (
            Arc::new(Self {
                ran: ran.clone(),
                delay,
            }),
            ran,
        )
    }
}

#[async_trait]
impl MemoryExtractor for FlagMemory {
    async fn extract(
        &self,
        _messages: &[ModelMessage],
        user_id: Option<&str>,
    ) -> Result<Vec<UserMemory>, DrummerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ran.store(true, Ordering::SeqCst);
        Ok(vec![UserMemory {
            memory: "prefers apples".into(),
            topics: vec!["food".into()],
            user_id: user_id.map(str::to_string),
            created_at: None,
        }])
    }
}

/// Pre-hook that rejects every input.
pub struct RejectingPreHook;

#[async_trait]
impl PreHook for RejectingPreHook {
    fn name(&self) -> &str {
        "input_guard"
    }

    async fn run(
        &self,
        _input: &mut RunInput,
        _ctx: &mut RunContext,
        _session: &SessionRecord,
    ) -> Result<(), DrummerError> {
        Err(DrummerError::InputValidation("blocked input".into()))
    }
}

/// Post-hook that rejects every output.
pub struct RejectingPostHook;

#[async_trait]
impl PostHook for RejectingPostHook {
    fn name(&self) -> &str {
        "output_guard"
    }

    async fn run(
        &self,
        _record: &mut RunRecord,
        _ctx: &mut RunContext,
        _session: &SessionRecord,
    ) -> Result<(), DrummerError> {
        Err(DrummerError::OutputValidation("blocked output".into()))
    }
}

/// Collect every item a run stream yields.
pub async fn collect_stream(mut stream: RunStream) -> Vec<RunStreamItem> {
    use futures::StreamExt;
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }
    items
}

/// Event kinds in yield order, ignoring final-record items.
pub fn event_kinds(items: &[RunStreamItem]) -> Vec<RunEventKind> {
    items
        .iter()
        .filter_map(|item| match item {
            RunStreamItem::Event(event) => Some(event.kind()),
            RunStreamItem::Record(_) => None,
        })
        .collect()
}
