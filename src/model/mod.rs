//! Model backend contract.
//!
//! The orchestrator talks to exactly one abstraction: [`ModelBackend`], with a
//! buffered and a streamed invocation. Backends may run tool calls internally
//! before returning; executed calls come back as [`ToolExecution`] records in
//! the order the model emitted them.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::DrummerError;
use crate::tools::{ToolDefinition, ToolExecution};
use crate::types::{ModelMessage, Usage};

/// Tool choice constraint passed to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Tool {
        name: String,
    },
}

/// One model invocation.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub tool_call_limit: Option<usize>,
    /// JSON Schema the response should conform to, when structured output is
    /// requested without a parser model.
    pub response_format: Option<serde_json::Value>,
    pub send_media: bool,
}

/// Complete response from one model invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Tool calls the backend executed (or paused), in model emission order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_executions: Vec<ToolExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<serde_json::Value>,
    /// Messages the backend appended to the exchange (assistant turns, tool
    /// results) beyond the request messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ModelMessage>,
    #[serde(default)]
    pub usage: Usage,
}

/// Incremental event from a streamed model invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    ContentDelta { text: String },
    ToolCallStarted { tool: ToolExecution },
    ToolCallCompleted { tool: ToolExecution },
    Completed { response: ModelResponse },
}

/// Stream of model events.
pub type ModelEventStream = BoxStream<'static, Result<ModelEvent, DrummerError>>;

/// A language-model backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Buffered invocation: one request, one complete response.
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, DrummerError>;

    /// Streamed invocation. The default adapter buffers [`respond`] and
    /// replays it as a short event sequence, so backends without native
    /// streaming still work in streaming runs.
    ///
    /// [`respond`]: ModelBackend::respond
    async fn respond_stream(
        &self,
        request: &ModelRequest,
    ) -> Result<ModelEventStream, DrummerError> {
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
