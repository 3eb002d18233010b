//! Builds the model input message sequence for a run.

use super::context::RunContext;
use super::options::RunOptions;
use super::record::{InputContent, RunRecord};
use crate::agent::Agent;
use crate::session::SessionRecord;
use crate::types::{ContentPart, ModelMessage, Role};

/// Assemble the ordered message sequence for the model backend: system
/// message, prior-run history, then the user input with media and retrieved
/// references. An empty result is tolerated; the caller logs it and lets the
/// backend reject the request.
pub(crate) async fn build_run_messages(
    agent: &Agent,
    record: &mut RunRecord,
    ctx: &RunContext,
    session: &SessionRecord,
    options: &RunOptions,
) -> Vec<ModelMessage> {
    let mut messages = Vec::new();

    if let Some(system) = build_system_message(agent, ctx, options) {
        messages.push(system);
    }

    if options.add_history_to_context {
        messages.extend(history_messages(agent, session));
    }

    let references_block = retrieve_references(agent, record, ctx).await;

    match record.input.clone() {
        Some(input) => match &input.content {
            InputContent::Text(text) => {
                let mut message = ModelMessage::user(text.clone());
                attach_media(&mut message, &input);
                if let Some(block) = references_block {
                    message.push_text(block);
                }
                messages.push(message);
            }
            InputContent::Json(value) => {
                let mut message = ModelMessage::user(value.to_string());
                attach_media(&mut message, &input);
                messages.push(message);
            }
            InputContent::Message(message) => messages.push(message.clone()),
            InputContent::Messages(batch) => messages.extend(batch.iter().cloned()),
        },
        None => {
            tracing::warn!(run_id = %record.run_id, "run has no input");
        }
    }

    messages
}

fn build_system_message(
    agent: &Agent,
    ctx: &RunContext,
    options: &RunOptions,
) -> Option<ModelMessage> {
    let mut sections: Vec<String> = Vec::new();
    if let Some(description) = &agent.description {
        sections.push(description.clone());
    }
    if let Some(instructions) = &agent.instructions {
        sections.push(instructions.clone());
    }

    if options.add_session_state_to_context {
        if let Some(state) = &ctx.session_state {
            if !state.is_empty() {
                if let Ok(state_json) = serde_json::to_string_pretty(state) {
                    sections.push(format!(
                        "<session_state>\n{state_json}\n</session_state>"
                    ));
                }
            }
        }
    }

    if options.add_dependencies_to_context {
        let resolved = ctx.resolved_dependencies();
        if !resolved.is_empty() {
            if let Ok(deps_json) = serde_json::to_string_pretty(&resolved) {
                sections.push(format!("<dependencies>\n{deps_json}\n</dependencies>"));
            }
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(ModelMessage::system(sections.join("\n\n")))
    }
}

/// Messages from the session's prior runs, oldest first, capped at the
/// agent's history window.
fn history_messages(agent: &Agent, session: &SessionRecord) -> Vec<ModelMessage> {
    let runs = &session.runs;
    let start = runs.len().saturating_sub(agent.num_history_runs);
    runs[start..]
        .iter()
        .flat_map(|run| run.messages.iter())
        .filter(|message| message.role != Role::System)
        .cloned()
        .map(|mut message| {
            message.from_history = true;
            message
        })
        .collect()
}

async fn retrieve_references(
    agent: &Agent,
    record: &mut RunRecord,
    ctx: &RunContext,
) -> Option<String> {
    let retriever = agent.knowledge.as_ref()?;
    let query = record
        .input
        .as_ref()
        .and_then(|input| input.content.as_text())?;

    match retriever.retrieve(&query, ctx.knowledge_filters.as_ref()).await {
        Ok(references) if !references.is_empty() => {
            let joined = references
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            record.references = references;
            Some(format!("\n\n<references>\n{joined}\n</references>"))
        }
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(run_id = %record.run_id, error = %err, "knowledge retrieval failed");
            None
        }
    }
}

fn attach_media(message: &mut ModelMessage, input: &super::record::RunInput) {
    for image in &input.images {
        message.content.push(ContentPart::Image(image.clone()));
    }
    for audio in &input.audios {
        message.content.push(ContentPart::Audio(audio.clone()));
    }
    for video in &input.videos {
        message.content.push(ContentPart::Video(video.clone()));
    }
    for file in &input.files {
        message.content.push(ContentPart::File(file.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::record::RunInput;
    use uuid::Uuid;

    fn record_with_input(text: &str) -> RunRecord {
        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        record.input = Some(RunInput::new(text));
        record
    }

    #[tokio::test]
    async fn history_is_included_in_chronological_order() {
        let agent = crate::agent::tests::test_agent();
        let mut session = SessionRecord::new("s1", None);
        for text in ["first", "second"] {
            let mut run = RunRecord::empty(Uuid::new_v4(), "s1");
            run.messages = vec![ModelMessage::user(text), ModelMessage::assistant("ok")];
            session.upsert_run(run);
        }

        let mut record = record_with_input("third");
        let options = RunOptions {
            add_history_to_context: true,
            ..Default::default()
        };
        let ctx = RunContext::default();
        let messages = build_run_messages(&agent, &mut record, &ctx, &session, &options).await;

        let texts: Vec<String> = messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["first", "ok", "second", "ok", "third"]);
        assert!(messages[0].from_history);
        assert!(!messages[4].from_history);
    }

    #[tokio::test]
    async fn session_state_is_rendered_into_the_system_message() {
        let mut agent = crate::agent::tests::test_agent();
        agent.description = Some("helper".into());
        let session = SessionRecord::new("s1", None);
        let mut ctx = RunContext::default();
        ctx.session_state = Some(std::collections::HashMap::from([(
            "cart".to_string(),
            serde_json::json!(["apples"]),
        )]));

        let mut record = record_with_input("hi");
        let options = RunOptions {
            add_session_state_to_context: true,
            ..Default::default()
        };
        let messages = build_run_messages(&agent, &mut record, &ctx, &session, &options).await;
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].text().contains("<session_state>"));
        assert!(messages[0].text().contains("apples"));
    }

    #[tokio::test]
    async fn empty_input_still_produces_a_sequence_without_panic() {
        let agent = crate::agent::tests::test_agent();
        let session = SessionRecord::new("s1", None);
        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        let ctx = RunContext::default();
        let options = RunOptions::default();
        let messages = build_run_messages(&agent, &mut record, &ctx, &session, &options).await;
        assert!(messages.is_empty());
    }
}
