//! Tool execution records attached to a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single tool invocation requested by the model, in the order the model
/// emitted it, together with its (eventual) result and approval flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Set when the tool needs human approval before its result can be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_confirmation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    /// Set while the run is paused waiting on this call.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    /// Create a pending execution record for a model-issued call.
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_args,
            created_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark this call as paused pending confirmation.
    pub fn paused_for_confirmation(mut self) -> Self {
        self.requires_confirmation = Some(true);
        self.is_paused = true;
        self
    }

    /// Attach a result and clear the paused flag.
    pub fn resolved(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self.is_paused = false;
        self.confirmed = self.requires_confirmation.map(|_| true);
        self
    }
}
