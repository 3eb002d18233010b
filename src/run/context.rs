//! Run-scoped transient state threaded through the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::RunId;
use crate::agent::Agent;
use crate::error::DrummerError;
use crate::knowledge::KnowledgeFilter;

/// Mutable state shared with tools for the duration of a run.
pub type SessionState = HashMap<String, serde_json::Value>;

/// Named dependency entries, resolved before hooks run.
pub type DependencyMap = HashMap<String, Dependency>;

type Provider0 = Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, DrummerError>> + Send + Sync>;
type Provider1 = Arc<
    dyn for<'a> Fn(&'a Agent) -> BoxFuture<'a, Result<serde_json::Value, DrummerError>>
        + Send
        + Sync,
>;
type Provider2 = Arc<
    dyn for<'a> Fn(&'a RunContext) -> BoxFuture<'a, Result<serde_json::Value, DrummerError>>
        + Send
        + Sync,
>;
type Provider3 = Arc<
    dyn for<'a> Fn(&'a Agent, &'a RunContext) -> BoxFuture<'a, Result<serde_json::Value, DrummerError>>
        + Send
        + Sync,
>;

/// A dependency entry: either a ready value or a provider invoked during
/// resolution. Provider variants declare what they need to be passed.
#[derive(Clone)]
pub enum Dependency {
    Value(serde_json::Value),
    Provider(Provider0),
    AgentProvider(Provider1),
    ContextProvider(Provider2),
    FullProvider(Provider3),
}

impl Dependency {
    /// Convenience constructor for a zero-argument provider.
    pub fn provider<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, DrummerError>> + Send + 'static,
    {
        Self::Provider(Arc::new(move || Box::pin(f())))
    }

    /// The resolved value, if this entry is already a value.
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Provider(_) => f.write_str("Provider(..)"),
            Self::AgentProvider(_) => f.write_str("AgentProvider(..)"),
            Self::ContextProvider(_) => f.write_str("ContextProvider(..)"),
            Self::FullProvider(_) => f.write_str("FullProvider(..)"),
        }
    }
}

impl From<serde_json::Value> for Dependency {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

/// Per-run transient state. Created by the dispatcher, mutated by hooks and
/// tools, serialized into the final run record at cleanup.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub run_id: RunId,
    pub session_id: String,
    pub user_id: Option<String>,
    pub session_state: Option<SessionState>,
    pub dependencies: DependencyMap,
    pub knowledge_filters: Option<KnowledgeFilter>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
}

impl RunContext {
    pub fn new(run_id: RunId, session_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            run_id,
            session_id: session_id.into(),
            user_id,
            ..Default::default()
        }
    }

    /// Seed the session state with the run-scoped id triple.
    pub fn initialize_session_state(&mut self) {
        let state = self.session_state.get_or_insert_with(HashMap::new);
        if let Some(user_id) = &self.user_id {
            state.insert(
                "current_user_id".into(),
                serde_json::Value::String(user_id.clone()),
            );
        }
        state.insert(
            "current_session_id".into(),
            serde_json::Value::String(self.session_id.clone()),
        );
        state.insert(
            "current_run_id".into(),
            serde_json::Value::String(self.run_id.to_string()),
        );
    }

    /// Resolved dependency values, for inclusion in the model context.
    pub fn resolved_dependencies(&self) -> HashMap<String, serde_json::Value> {
        self.dependencies
            .iter()
            .filter_map(|(key, dep)| dep.as_value().map(|v| (key.clone(), v.clone())))
            .collect()
    }
}

/// Resolve provider dependencies in place.
///
/// Each provider entry is invoked and replaced with its return value. A
/// failing provider is logged and keeps its original entry, so the run
/// proceeds without that dependency.
pub async fn resolve_dependencies(agent: &Agent, ctx: &mut RunContext) {
    if ctx.dependencies.is_empty() {
        return;
    }
    tracing::debug!(run_id = %ctx.run_id, "resolving dependencies");

    // Providers see a snapshot of the context taken before resolution.
    let snapshot = ctx.clone();
    let entries = std::mem::take(&mut ctx.dependencies);
    let mut resolved = DependencyMap::with_capacity(entries.len());

    for (key, entry) in entries {
        let result = match &entry {
            Dependency::Value(_) => {
                resolved.insert(key, entry);
                continue;
            }
            Dependency::Provider(f) => f().await,
            Dependency::AgentProvider(f) => f(agent).await,
            Dependency::ContextProvider(f) => f(&snapshot).await,
            Dependency::FullProvider(f) => f(agent, &snapshot).await,
        };
        match result {
            Ok(value) => {
                resolved.insert(key, Dependency::Value(value));
            }
            Err(err) => {
                tracing::warn!(dependency = %key, error = %err, "failed to resolve dependency");
                resolved.insert(key, entry);
            }
        }
    }
    ctx.dependencies = resolved;
}
