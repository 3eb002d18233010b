//! Applies the model response onto the run record.

use super::context::RunContext;
use super::record::{RunRecord, RunRequirement};
use crate::agent::Agent;
use crate::error::DrummerError;
use crate::model::{ModelRequest, ModelResponse};
use crate::types::ModelMessage;

/// Attach content, tool-execution records, usage, and structured output from
/// one model invocation to the run. Tool records keep model emission order;
/// paused tool records materialize matching requirements.
pub(crate) fn apply_model_response(
    record: &mut RunRecord,
    response: &ModelResponse,
    run_messages: &[ModelMessage],
) {
    if let Some(content) = &response.content {
        record.content = Some(content.clone());
    }
    if let Some(reasoning) = &response.reasoning_content {
        record.reasoning_content = Some(reasoning.clone());
    }
    if let Some(structured) = &response.structured_output {
        record.structured_content = Some(structured.clone());
    }

    record.tools.extend(response.tool_executions.iter().cloned());
    record.requirements = record
        .tools
        .iter()
        .filter(|tool| tool.is_paused)
        .cloned()
        .map(RunRequirement::confirmation)
        .collect();

    record.messages = run_messages.to_vec();
    record.messages.extend(response.messages.iter().cloned());

    record
        .metrics
        .get_or_insert_with(Default::default)
        .merge_usage(&response.usage);
    record.touch();
}

/// Re-invoke the configured output model to produce the final content,
/// replacing the primary model's draft.
pub(crate) async fn generate_with_output_model(
    agent: &Agent,
    record: &mut RunRecord,
    run_messages: &[ModelMessage],
) -> Result<(), DrummerError> {
    let Some(output_model) = &agent.output_model else {
        return Ok(());
    };

    let mut messages = run_messages.to_vec();
    if let Some(draft) = &record.content {
        messages.push(ModelMessage::assistant(draft.clone()));
    }
    let request = ModelRequest {
        messages,
        send_media: agent.send_media_to_model,
        ..Default::default()
    };
    let response = output_model.respond(&request).await?;
    if let Some(content) = response.content {
        record.content = Some(content);
    }
    record
        .metrics
        .get_or_insert_with(Default::default)
        .merge_usage(&response.usage);
    Ok(())
}

/// Parse free-form content into the declared schema with the configured
/// parser model. Parse failures are logged; the run proceeds with the
/// unparsed content.
pub(crate) async fn parse_with_parser_model(
    agent: &Agent,
    record: &mut RunRecord,
    ctx: &RunContext,
) {
    let Some(parser_model) = &agent.parser_model else {
        return;
    };
    let (Some(content), Some(schema)) = (record.content.clone(), ctx.output_schema.clone()) else {
        return;
    };

    let request = ModelRequest {
        messages: vec![ModelMessage::user(content)],
        response_format: Some(schema),
        ..Default::default()
    };
    match parser_model.respond(&request).await {
        Ok(response) => {
            if let Some(structured) = response.structured_output {
                record.structured_content = Some(structured);
            } else if let Some(content) = &response.content {
                match serde_json::from_str(content) {
                    Ok(value) => record.structured_content = Some(value),
                    Err(err) => {
                        tracing::warn!(run_id = %record.run_id, error = %err, "parser model output is not valid JSON")
                    }
                }
            }
            record
                .metrics
                .get_or_insert_with(Default::default)
                .merge_usage(&response.usage);
        }
        Err(err) => {
            tracing::warn!(run_id = %record.run_id, error = %err, "parser model invocation failed")
        }
    }
}

/// Convert free-form content into the declared structured schema when no
/// parser model is configured. A parse failure is logged, not fatal.
pub(crate) fn convert_to_structured_format(agent: &Agent, record: &mut RunRecord, ctx: &RunContext) {
    if agent.parser_model.is_some() || ctx.output_schema.is_none() {
        return;
    }
    if record.structured_content.is_some() {
        return;
    }
    let Some(content) = &record.content else {
        return;
    };
    match serde_json::from_str(content) {
        Ok(value) => record.structured_content = Some(value),
        Err(err) => {
            tracing::warn!(run_id = %record.run_id, error = %err, "response content does not match the structured format");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolExecution;
    use uuid::Uuid;

    #[test]
    fn tool_records_preserve_model_emission_order() {
        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        let response = ModelResponse {
            content: Some("done".into()),
            tool_executions: vec![
                ToolExecution::new("call-1", "search", serde_json::json!({})),
                ToolExecution::new("call-2", "fetch", serde_json::json!({})),
            ],
            ..Default::default()
        };
        apply_model_response(&mut record, &response, &[ModelMessage::user("hi")]);
        let names: Vec<&str> = record.tools.iter().map(|t| t.tool_name.as_str()).collect();
        assert_eq!(names, vec!["search", "fetch"]);
        assert_eq!(record.content.as_deref(), Some("done"));
    }

    #[test]
    fn paused_tools_materialize_requirements() {
        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        let response = ModelResponse {
            tool_executions: vec![
                ToolExecution::new("call-1", "delete_db", serde_json::json!({}))
                    .paused_for_confirmation(),
            ],
            ..Default::default()
        };
        apply_model_response(&mut record, &response, &[]);
        assert!(record.has_paused_tools());
        assert_eq!(record.requirements.len(), 1);
    }

    #[test]
    fn structured_conversion_parses_json_content() {
        let agent = crate::agent::tests::test_agent();
        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        record.content = Some(r#"{"answer": 42}"#.into());
        let mut ctx = RunContext::default();
        ctx.output_schema = Some(serde_json::json!({"type": "object"}));
        convert_to_structured_format(&agent, &mut record, &ctx);
        assert_eq!(
            record.structured_content,
            Some(serde_json::json!({"answer": 42}))
        );
    }

    #[test]
    fn structured_conversion_tolerates_invalid_json() {
        let agent = crate::agent::tests::test_agent();
        let mut record = RunRecord::empty(Uuid::new_v4(), "s1");
        record.content = Some("plain text".into());
        let mut ctx = RunContext::default();
        ctx.output_schema = Some(serde_json::json!({"type": "object"}));
        convert_to_structured_format(&agent, &mut record, &ctx);
        assert!(record.structured_content.is_none());
    }
}
