//! Tool selection for a run.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::tool::{Tool, ToolDefinition};
use crate::agent::Agent;
use crate::error::DrummerError;
use crate::run::context::RunContext;
use crate::run::record::RunRecord;

/// Source of dynamically resolved tools (e.g. remote toolkits). Providers are
/// only consulted on the async resolution path; the blocking adapters funnel
/// through it.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn provide(&self, ctx: &RunContext) -> Result<Vec<Arc<dyn Tool>>, DrummerError>;
}

/// Context-aware filter applied to each candidate tool.
pub type ToolFilter = Arc<dyn Fn(&dyn Tool, &RunContext) -> bool + Send + Sync>;

/// Produce the tool set exposed to the model for this run.
///
/// Starts from the agent's configured tools, appends provider-resolved tools,
/// applies the agent's context filter, and dedupes by name keeping the first
/// occurrence. Provider failures are logged and skipped so a flaky toolkit
/// does not abort the run.
pub async fn select_tools(
    agent: &Agent,
    record: &RunRecord,
    ctx: &RunContext,
) -> Vec<ToolDefinition> {
    let mut candidates: Vec<Arc<dyn Tool>> = agent.tools.clone();

    for provider in &agent.tool_providers {
        match provider.provide(ctx).await {
            Ok(tools) => candidates.extend(tools),
            Err(err) => {
                tracing::warn!(run_id = %record.run_id, error = %err, "tool provider failed");
            }
        }
    }

    let mut seen = HashSet::new();
    let mut definitions = Vec::new();
    for tool in candidates {
        if let Some(filter) = &agent.tool_filter {
            if !filter(tool.as_ref(), ctx) {
                continue;
            }
        }
        if seen.insert(tool.name().to_string()) {
            definitions.push(tool.definition());
        }
    }
    definitions
}

/// Disconnect all connectable tools. Failures are logged and swallowed; this
/// runs in the terminal cleanup of every run variant.
pub async fn disconnect_connectable_tools(agent: &Agent) {
    for tool in &agent.tools {
        if !tool.is_connectable() {
            continue;
        }
        if let Err(err) = tool.disconnect().await {
            tracing::warn!(tool = tool.name(), error = %err, "failed to disconnect tool");
        }
    }
}
