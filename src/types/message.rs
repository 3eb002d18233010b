//! Message types for model communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::{Audio, FileAttachment, Image, Video};
use crate::tools::ToolExecution;

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Set on messages replayed from prior runs of the session.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_history: bool,
}

impl ModelMessage {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    /// Create a tool result message for a resolved tool execution.
    pub fn tool_result(tool: ToolExecution) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult(tool)],
            name: None,
            timestamp: Some(Utc::now()),
            from_history: false,
        }
    }

    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
            name: None,
            timestamp: Some(Utc::now()),
            from_history: false,
        }
    }

    /// Extract the text content, concatenating all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Append a text part to this message.
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.content.push(ContentPart::Text { text: text.into() });
    }

    /// Whether any content part carries media.
    pub fn has_media(&self) -> bool {
        self.content.iter().any(|part| {
            matches!(
                part,
                ContentPart::Image(_)
                    | ContentPart::Audio(_)
                    | ContentPart::Video(_)
                    | ContentPart::File(_)
            )
        })
    }

    /// Drop media content parts in place.
    pub fn strip_media(&mut self) {
        self.content.retain(|part| {
            !matches!(
                part,
                ContentPart::Image(_)
                    | ContentPart::Audio(_)
                    | ContentPart::Video(_)
                    | ContentPart::File(_)
            )
        });
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single part of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image(Image),
    Audio(Audio),
    Video(Video),
    File(FileAttachment),
    ToolCall(ToolExecution),
    ToolResult(ToolExecution),
}
