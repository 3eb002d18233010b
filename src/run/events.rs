//! Run lifecycle events and the pipeline that filters, stores, and yields
//! them to streaming callers.

use std::collections::HashSet;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use strum::EnumDiscriminants;

use super::record::{RunRecord, RunRequirement};
use super::RunId;
use crate::error::ErrorCategory;
use crate::memory::UserMemory;
use crate::tools::ToolExecution;

/// Concrete event payloads emitted by the run loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, EnumDiscriminants)]
#[strum_discriminants(
    name(RunEventKind),
    derive(Hash, Serialize, Deserialize, strum::Display),
    serde(rename_all = "snake_case"),
    strum(serialize_all = "snake_case")
)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEventPayload {
    RunStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_provider: Option<String>,
    },
    RunContinued,
    /// Primary-model content downgraded because an output model is
    /// configured.
    IntermediateRunContent {
        content: String,
    },
    RunContent {
        content: String,
    },
    RunContentCompleted,
    ReasoningStarted,
    ReasoningCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    PreHookStarted {
        hook: String,
    },
    PreHookCompleted {
        hook: String,
    },
    PostHookStarted {
        hook: String,
    },
    PostHookCompleted {
        hook: String,
    },
    ToolCallStarted {
        tool: ToolExecution,
    },
    ToolCallCompleted {
        tool: ToolExecution,
    },
    /// Background enrichment finished; carries memories produced this run.
    MemoryUpdateCompleted {
        memories: Vec<UserMemory>,
    },
    RunPaused {
        tools: Vec<ToolExecution>,
        requirements: Vec<RunRequirement>,
    },
    RunCancelled {
        reason: String,
    },
    RunError {
        message: String,
        category: ErrorCategory,
    },
    SessionSummaryStarted,
    SessionSummaryCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    RunCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structured_content: Option<serde_json::Value>,
    },
}

/// Envelope for run events, stamped with run identity and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub run_id: RunId,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: RunEventPayload,
}

impl RunEvent {
    fn from_record(record: &RunRecord, payload: RunEventPayload) -> Self {
        Self {
            run_id: record.run_id,
            session_id: record.session_id.clone(),
            agent_id: record.agent_id.clone(),
            created_at: Utc::now(),
            payload,
        }
    }

    /// The discriminant kind of this event.
    pub fn kind(&self) -> RunEventKind {
        RunEventKind::from(&self.payload)
    }
}

/// Item yielded by a streaming run: lifecycle events, optionally followed by
/// the final run record.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStreamItem {
    Event(RunEvent),
    Record(Box<RunRecord>),
}

/// Ordered sequence of lifecycle events consumed by streaming callers.
pub type RunStream = Pin<Box<dyn Stream<Item = RunStreamItem> + Send>>;

/// Filters events by the agent's skip-set and optionally persists them on
/// the run record before they are yielded.
#[derive(Debug, Clone, Default)]
pub struct EventPipeline {
    skip: HashSet<RunEventKind>,
    store_events: bool,
}

impl EventPipeline {
    pub fn new(events_to_skip: &[RunEventKind], store_events: bool) -> Self {
        Self {
            skip: events_to_skip.iter().copied().collect(),
            store_events,
        }
    }

    /// Wrap a payload into an event: skip-set matches drop silently, stored
    /// events are appended to the record, and the event is handed back for
    /// yielding.
    pub fn handle(&self, payload: RunEventPayload, record: &mut RunRecord) -> Option<RunEvent> {
        let kind = RunEventKind::from(&payload);
        if self.skip.contains(&kind) {
            return None;
        }
        let event = RunEvent::from_record(record, payload);
        if self.store_events {
            record.push_event(event.clone());
        }
        Some(event)
    }

    /// Error events are always recorded on the run, independent of
    /// `store_events`.
    pub fn handle_error(&self, payload: RunEventPayload, record: &mut RunRecord) -> RunEvent {
        let event = RunEvent::from_record(record, payload);
        record.push_event(event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record() -> RunRecord {
        RunRecord::empty(Uuid::new_v4(), "s1")
    }

    #[test]
    fn skip_set_drops_silently_without_storing() {
        let pipeline = EventPipeline::new(&[RunEventKind::RunContent], true);
        let mut record = record();
        let handled = pipeline.handle(
            RunEventPayload::RunContent {
                content: "hi".into(),
            },
            &mut record,
        );
        assert!(handled.is_none());
        assert!(record.events.is_none());
    }

    #[test]
    fn store_events_appends_in_yield_order() {
        let pipeline = EventPipeline::new(&[], true);
        let mut record = record();
        pipeline.handle(
            RunEventPayload::RunStarted {
                model_id: None,
                model_provider: None,
            },
            &mut record,
        );
        pipeline.handle(
            RunEventPayload::RunContent {
                content: "hi".into(),
            },
            &mut record,
        );
        let events = record.events.as_ref().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), RunEventKind::RunStarted);
        assert_eq!(events[1].kind(), RunEventKind::RunContent);
    }

    #[test]
    fn error_events_are_stored_even_when_store_events_is_off() {
        let pipeline = EventPipeline::new(&[], false);
        let mut record = record();
        pipeline.handle_error(
            RunEventPayload::RunError {
                message: "boom".into(),
                category: crate::error::ErrorCategory::Model,
            },
            &mut record,
        );
        assert_eq!(record.events.as_ref().unwrap().len(), 1);
    }
}
