//! Terminal cleanup: scrubbing, timing, artifact write, session upsert.
//!
//! Every terminal exit of every run variant flows through
//! [`cleanup_and_store`] exactly once, in this order: scrub, stop timer,
//! sync session state, optional artifact file, upsert run, session metrics,
//! persist session.

use std::path::Path;

use super::context::RunContext;
use super::record::RunRecord;
use crate::agent::Agent;
use crate::session::SessionRecord;
use crate::types::ContentPart;

pub(crate) async fn cleanup_and_store(
    agent: &Agent,
    record: &mut RunRecord,
    session: &mut SessionRecord,
    ctx: &RunContext,
) {
    scrub_for_storage(agent, record);

    if let Some(metrics) = record.metrics.as_mut() {
        metrics.stop_timer();
    }

    // The record must reflect all tool modifications to the shared state.
    if let Some(state) = &ctx.session_state {
        record.session_state = Some(state.clone());
        session.set_session_state(state);
    }

    save_record_to_file(agent, record);

    session.upsert_run(record.clone());
    if let Some(metrics) = &record.metrics {
        session.accrue_metrics(metrics);
    }

    if let Some(db) = &agent.db {
        if let Err(err) = db.upsert(session.clone()).await {
            tracing::error!(run_id = %record.run_id, error = %err, "failed to persist session");
        }
    }
}

/// Apply the agent's retention flags before the record is persisted.
fn scrub_for_storage(agent: &Agent, record: &mut RunRecord) {
    if !agent.store_media {
        if let Some(input) = record.input.as_mut() {
            input.clear_media();
        }
        for message in record.messages.iter_mut() {
            message.strip_media();
        }
    }

    if !agent.store_tool_messages {
        for message in record.messages.iter_mut() {
            for part in message.content.iter_mut() {
                if let ContentPart::ToolResult(tool) = part {
                    tool.result = None;
                }
            }
        }
    }

    if !agent.store_history_messages {
        record.messages.retain(|message| !message.from_history);
    }
}

/// Strip path-traversal characters from a filename substitution value.
fn sanitize(value: &str) -> String {
    value.replace('/', "_").replace('\\', "_").replace("..", "_")
}

/// Write the primary content to the configured artifact path. Failures are
/// logged and never abort the run.
fn save_record_to_file(agent: &Agent, record: &RunRecord) {
    let Some(template) = &agent.save_response_to_file else {
        return;
    };

    let message = record
        .input
        .as_ref()
        .and_then(|input| input.content.as_text())
        .unwrap_or_default();
    let path = template
        .replace("{name}", &sanitize(agent.name.as_deref().unwrap_or_default()))
        .replace("{session_id}", &sanitize(&record.session_id))
        .replace(
            "{user_id}",
            &sanitize(record.user_id.as_deref().unwrap_or_default()),
        )
        .replace("{message}", &sanitize(&message))
        .replace("{run_id}", &sanitize(&record.run_id.to_string()));
    let path = Path::new(&path);

    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        match (&record.content, &record.structured_content) {
            (Some(content), _) => std::fs::write(path, content),
            (None, Some(structured)) => {
                let body = serde_json::to_string_pretty(structured).unwrap_or_default();
                std::fs::write(path, body)
            }
            (None, None) => Ok(()),
        }
    })();

    if let Err(err) = result {
        tracing::warn!(run_id = %record.run_id, error = %err, "failed to save output to file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::record::RunInput;
    use crate::types::ModelMessage;
    use uuid::Uuid;

    #[test]
    fn sanitize_strips_path_traversal() {
        assert_eq!(sanitize("a/b"), "a_b");
        assert_eq!(sanitize("a\\b"), "a_b");
        assert_eq!(sanitize("../etc/passwd"), "__etc_passwd");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn artifact_file_uses_sanitized_substitutions() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir
            .path()
            .join("out")
            .join("{session_id}-{message}.txt")
            .to_string_lossy()
            .into_owned();

        let mut agent = crate::agent::tests::test_agent();
        agent.save_response_to_file = Some(template);

        let mut record = RunRecord::empty(Uuid::new_v4(), "sess/../1");
        record.input = Some(RunInput::new("hi/there"));
        record.content = Some("final output".into());

        save_record_to_file(&agent, &record);

        let written = dir.path().join("out").join("sess___1-hi_there.txt");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "final output");
    }

    #[test]
    fn scrub_drops_history_and_tool_bodies_per_flags() {
        let mut agent = crate::agent::tests::test_agent();
        agent.store_tool_messages = false;
        agent.store_history_messages = false;

        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        let mut history = ModelMessage::user("old");
        history.from_history = true;
        let tool_msg = ModelMessage::tool_result(
            crate::tools::ToolExecution::new("call-1", "search", serde_json::json!({}))
                .resolved(serde_json::json!({"hits": 3})),
        );
        record.messages = vec![history, ModelMessage::user("now"), tool_msg];

        scrub_for_storage(&agent, &mut record);
        assert_eq!(record.messages.len(), 2);
        let ContentPart::ToolResult(tool) = &record.messages[1].content[0] else {
            panic!("expected tool result part");
        };
        assert!(tool.result.is_none());
    }
}
