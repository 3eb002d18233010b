//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DrummerError;

/// Rendered form of a tool, as handed to the model backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool arguments.
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_confirmation: bool,
}

/// Core tool trait; implement to expose custom tools to the model.
///
/// Actual tool dispatch happens inside the model backend. The orchestrator
/// only selects tools, renders their definitions, and disconnects connectable
/// tools when a run ends.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Whether invocations must be confirmed by a human before the result is
    /// used. Paused runs originate here.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Whether this tool holds an external connection that must be released
    /// when the run ends.
    fn is_connectable(&self) -> bool {
        false
    }

    /// Release any external connection. Called from the terminal cleanup of
    /// every run variant; failures are logged and swallowed.
    async fn disconnect(&self) -> Result<(), DrummerError> {
        Ok(())
    }

    /// Render the definition handed to the model backend.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            requires_confirmation: self.requires_confirmation(),
        }
    }
}

type DisconnectFn =
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), DrummerError>> + Send>> + Send + Sync;

/// Closure-based tool for quick declaration.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    requires_confirmation: bool,
    disconnect: Option<Arc<DisconnectFn>>,
}

impl FunctionTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_confirmation: false,
            disconnect: None,
        }
    }

    /// Require human confirmation before results of this tool are used.
    pub fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// Register a disconnect callback, marking the tool connectable.
    pub fn with_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DrummerError>> + Send + 'static,
    {
        self.disconnect = Some(Arc::new(move || Box::pin(f())));
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    fn is_connectable(&self) -> bool {
        self.disconnect.is_some()
    }

    async fn disconnect(&self) -> Result<(), DrummerError> {
        match &self.disconnect {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish()
    }
}
