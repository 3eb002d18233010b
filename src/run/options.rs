//! Per-dispatch run options, resolved once with a fixed precedence:
//! explicit caller argument, then inherited run context, then agent default.

use std::collections::HashMap;

use super::context::{DependencyMap, RunContext};
use crate::agent::Agent;
use crate::knowledge::KnowledgeFilter;

/// Caller-supplied overrides, all optional.
#[derive(Default)]
pub(crate) struct OptionOverrides {
    pub stream_events: Option<bool>,
    pub yield_run_output: Option<bool>,
    pub add_history_to_context: Option<bool>,
    pub add_dependencies_to_context: Option<bool>,
    pub add_session_state_to_context: Option<bool>,
    pub dependencies: Option<DependencyMap>,
    pub knowledge_filters: Option<KnowledgeFilter>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub output_schema: Option<serde_json::Value>,
    pub debug_mode: Option<bool>,
}

/// The immutable options object a run executes under.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunOptions {
    pub stream_events: bool,
    pub yield_run_output: bool,
    pub add_history_to_context: bool,
    pub add_dependencies_to_context: bool,
    pub add_session_state_to_context: bool,
    pub debug_mode: bool,
}

impl RunOptions {
    /// Merge caller overrides with agent defaults. Context-level inheritance
    /// is handled by [`apply_overrides_to_context`].
    pub(crate) fn resolve(agent: &Agent, overrides: &OptionOverrides) -> Self {
        Self {
            stream_events: overrides.stream_events.unwrap_or(agent.stream_events),
            yield_run_output: overrides.yield_run_output.unwrap_or(false),
            add_history_to_context: overrides
                .add_history_to_context
                .unwrap_or(agent.add_history_to_context),
            add_dependencies_to_context: overrides
                .add_dependencies_to_context
                .unwrap_or(agent.add_dependencies_to_context),
            add_session_state_to_context: overrides
                .add_session_state_to_context
                .unwrap_or(agent.add_session_state_to_context),
            debug_mode: overrides.debug_mode.unwrap_or(agent.debug_mode),
        }
    }
}

/// Apply resolved dependency/filter/metadata/schema values onto the run
/// context. Explicit caller arguments win; otherwise values already present
/// on the context are preserved; agent defaults fill the rest.
pub(crate) fn apply_overrides_to_context(
    agent: &Agent,
    overrides: OptionOverrides,
    ctx: &mut RunContext,
) {
    match overrides.dependencies {
        Some(dependencies) => ctx.dependencies = dependencies,
        None => {
            if ctx.dependencies.is_empty() {
                ctx.dependencies = agent.dependencies.clone();
            }
        }
    }

    match overrides.knowledge_filters {
        Some(filters) => ctx.knowledge_filters = Some(filters),
        None => {
            if ctx.knowledge_filters.is_none() {
                ctx.knowledge_filters = agent.knowledge_filters.clone();
            }
        }
    }

    match overrides.metadata {
        Some(metadata) => ctx.metadata = metadata,
        None => {
            if ctx.metadata.is_empty() {
                ctx.metadata = agent.metadata.clone();
            }
        }
    }

    match overrides.output_schema {
        Some(schema) => ctx.output_schema = Some(schema),
        None => {
            if ctx.output_schema.is_none() {
                ctx.output_schema = agent.output_schema.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::context::Dependency;

    #[test]
    fn explicit_arguments_win_over_context_and_agent_defaults() {
        let mut agent = crate::agent::tests::test_agent();
        agent
            .metadata
            .insert("source".into(), serde_json::json!("agent"));

        let mut ctx = RunContext::default();
        ctx.metadata
            .insert("source".into(), serde_json::json!("context"));

        // No explicit argument: context wins over the agent default.
        apply_overrides_to_context(&agent, OptionOverrides::default(), &mut ctx);
        assert_eq!(ctx.metadata["source"], serde_json::json!("context"));

        // Explicit argument wins over both.
        let overrides = OptionOverrides {
            metadata: Some(HashMap::from([(
                "source".to_string(),
                serde_json::json!("caller"),
            )])),
            ..Default::default()
        };
        apply_overrides_to_context(&agent, overrides, &mut ctx);
        assert_eq!(ctx.metadata["source"], serde_json::json!("caller"));
    }

    #[test]
    fn agent_dependencies_fill_empty_context() {
        let mut agent = crate::agent::tests::test_agent();
        agent
            .dependencies
            .insert("today".into(), Dependency::Value(serde_json::json!("mon")));

        let mut ctx = RunContext::default();
        apply_overrides_to_context(&agent, OptionOverrides::default(), &mut ctx);
        assert!(ctx.dependencies.contains_key("today"));
    }

    #[test]
    fn flag_resolution_falls_back_to_agent_defaults() {
        let mut agent = crate::agent::tests::test_agent();
        agent.add_history_to_context = true;
        let opts = RunOptions::resolve(&agent, &OptionOverrides::default());
        assert!(opts.add_history_to_context);
        let opts = RunOptions::resolve(
            &agent,
            &OptionOverrides {
                add_history_to_context: Some(false),
                ..Default::default()
            },
        );
        assert!(!opts.add_history_to_context);
    }
}
