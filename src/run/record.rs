//! The per-run aggregate record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::RunEvent;
use super::RunId;
use crate::knowledge::Reference;
use crate::tools::ToolExecution;
use crate::types::{Audio, FileAttachment, Image, Metrics, ModelMessage, Video};

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Error,
}

/// The user input that started a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputContent {
    Text(String),
    Message(ModelMessage),
    Messages(Vec<ModelMessage>),
    Json(serde_json::Value),
}

impl From<&str> for InputContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for InputContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for InputContent {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<ModelMessage> for InputContent {
    fn from(value: ModelMessage) -> Self {
        Self::Message(value)
    }
}

impl From<Vec<ModelMessage>> for InputContent {
    fn from(value: Vec<ModelMessage>) -> Self {
        Self::Messages(value)
    }
}

impl InputContent {
    /// Flatten to a display string (used for retrieval queries and artifact
    /// file names).
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Message(message) => Some(message.text()),
            Self::Messages(messages) => messages.last().map(ModelMessage::text),
            Self::Json(_) => None,
        }
    }
}

/// Original user input with attached media.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInput {
    pub content: InputContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<Video>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audios: Vec<Audio>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

impl RunInput {
    pub fn new(content: impl Into<InputContent>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
            videos: Vec::new(),
            audios: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn has_media(&self) -> bool {
        !self.images.is_empty()
            || !self.videos.is_empty()
            || !self.audios.is_empty()
            || !self.files.is_empty()
    }

    pub fn clear_media(&mut self) {
        self.images.clear();
        self.videos.clear();
        self.audios.clear();
        self.files.clear();
    }
}

/// Why a paused run cannot proceed without the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequirementKind {
    Confirmation,
    ExternalExecution,
    UserInput,
}

/// An outstanding requirement that gated a pause. Continuations supply
/// requirements with their tool executions resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRequirement {
    pub kind: RequirementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_execution: Option<ToolExecution>,
}

impl RunRequirement {
    pub fn confirmation(tool: ToolExecution) -> Self {
        Self {
            kind: RequirementKind::Confirmation,
            tool_execution: Some(tool),
        }
    }
}

/// The per-run aggregate persisted inside the parent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: RunId,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<RunInput>,
    /// Final primary output. Never `None` once the run reached a terminal
    /// status; cancel/error paths populate it with the reason when no partial
    /// content was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolExecution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<RunRequirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ModelMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<RunEvent>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// A minimal record in `Running` status. Dispatchers flesh it out.
    pub fn empty(run_id: RunId, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            session_id: session_id.into(),
            agent_id: None,
            agent_name: None,
            user_id: None,
            status: RunStatus::Running,
            input: None,
            content: None,
            structured_content: None,
            reasoning_content: None,
            model_id: None,
            model_provider: None,
            tools: Vec::new(),
            requirements: Vec::new(),
            messages: Vec::new(),
            events: None,
            references: Vec::new(),
            metadata: HashMap::new(),
            session_state: None,
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether any tool record is paused awaiting the caller.
    pub fn has_paused_tools(&self) -> bool {
        self.tools.iter().any(|tool| tool.is_paused)
    }

    /// Tool records currently paused.
    pub fn paused_tools(&self) -> Vec<ToolExecution> {
        self.tools
            .iter()
            .filter(|tool| tool.is_paused)
            .cloned()
            .collect()
    }

    /// Human-readable placeholder content for a paused run.
    pub fn paused_content(&self) -> String {
        let names: Vec<&str> = self
            .tools
            .iter()
            .filter(|tool| tool.is_paused)
            .map(|tool| tool.tool_name.as_str())
            .collect();
        if names.is_empty() {
            "Run paused awaiting approval".to_string()
        } else {
            format!("Run paused awaiting approval for: {}", names.join(", "))
        }
    }

    /// Append an event to the stored event sequence.
    pub fn push_event(&mut self, event: RunEvent) {
        self.events.get_or_insert_with(Vec::new).push(event);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
