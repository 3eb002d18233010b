//! End-to-end lifecycle coverage for buffered and streamed runs.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{collect_stream, event_kinds, stub_agent, FlagMemory, Scenario};
use drummer::prelude::*;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn happy_path_buffered_completes_and_persists() {
    let (mut agent, _calls, store) = stub_agent(Scenario::SimpleText);
    let (memory, memory_ran) = FlagMemory::new(Duration::from_millis(20));
    agent.memory_extractor = Some(memory);

    let record = agent
        .run("hello", RunParams::new().with_session_id("s-happy"))
        .await
        .expect("run");

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.content.as_deref(), Some("hello there"));
    // The memory worker is joined before cleanup.
    assert!(memory_ran.load(Ordering::SeqCst));

    let session = store.read("s-happy").await.unwrap().expect("session");
    assert_eq!(session.runs.len(), 1);
    assert_eq!(session.runs[0].run_id, record.run_id);

    // The registry entry is gone: a late cancel is a no-op.
    assert!(!cancel_run(record.run_id));
}

#[tokio::test]
async fn persisted_record_round_trips_through_the_store() {
    let (agent, _calls, store) = stub_agent(Scenario::SimpleText);
    let record = agent
        .run("hello", RunParams::new().with_session_id("s-rt"))
        .await
        .expect("run");

    let reread = store
        .get_run(record.run_id, "s-rt")
        .await
        .unwrap()
        .expect("stored run");
    assert_eq!(reread.status, record.status);
    assert_eq!(reread.content, record.content);
    assert_eq!(reread.tools, record.tools);
    assert_eq!(reread.metrics, record.metrics);
}

#[tokio::test]
async fn streaming_lifecycle_events_are_ordered() {
    let (agent, _calls, _store) = stub_agent(Scenario::SimpleText);

    let stream = agent
        .run_stream(
            "hello",
            RunParams::new()
                .with_session_id("s-stream")
                .with_stream_events(true),
        )
        .await
        .expect("stream");
    let items = collect_stream(stream).await;
    let kinds = event_kinds(&items);

    assert_eq!(kinds.first(), Some(&RunEventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&RunEventKind::RunCompleted));

    let content_positions: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == RunEventKind::RunContent)
        .map(|(i, _)| i)
        .collect();
    assert!(!content_positions.is_empty(), "expected content events");
    let content_completed = kinds
        .iter()
        .position(|k| *k == RunEventKind::RunContentCompleted)
        .expect("expected RunContentCompleted");
    assert!(content_positions.iter().all(|i| *i < content_completed));
    let completed = kinds.len() - 1;
    assert!(content_completed < completed);
}

#[tokio::test]
async fn yield_run_output_appends_the_final_record() {
    let (agent, _calls, _store) = stub_agent(Scenario::SimpleText);
    let stream = agent
        .run_stream(
            "hello",
            RunParams::new()
                .with_stream_events(true)
                .with_yield_run_output(true),
        )
        .await
        .expect("stream");
    let items = collect_stream(stream).await;

    let Some(RunStreamItem::Record(record)) = items.last() else {
        panic!("expected the final item to be the run record");
    };
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn store_events_captures_yielded_events_in_order() {
    let (mut agent, _calls, store) = stub_agent(Scenario::SimpleText);
    agent.store_events = true;

    let stream = agent
        .run_stream(
            "hello",
            RunParams::new()
                .with_session_id("s-events")
                .with_stream_events(true),
        )
        .await
        .expect("stream");
    let items = collect_stream(stream).await;
    let yielded = event_kinds(&items);

    let session = store.read("s-events").await.unwrap().expect("session");
    let stored: Vec<RunEventKind> = session.runs[0]
        .events
        .as_ref()
        .expect("stored events")
        .iter()
        .map(|e| e.kind())
        .collect();
    assert_eq!(stored, yielded);
}

#[tokio::test]
async fn skip_set_drops_events_from_stream_and_storage() {
    let (mut agent, _calls, _store) = stub_agent(Scenario::SimpleText);
    agent.store_events = true;
    agent.events_to_skip = vec![RunEventKind::RunContent];

    let stream = agent
        .run_stream("hello", RunParams::new().with_stream_events(true))
        .await
        .expect("stream");
    let kinds = event_kinds(&collect_stream(stream).await);
    assert!(!kinds.contains(&RunEventKind::RunContent));
}

#[tokio::test]
async fn memory_completion_event_carries_user_memories() {
    let (mut agent, _calls, _store) = stub_agent(Scenario::SimpleText);
    let (memory, _ran) = FlagMemory::new(Duration::from_millis(10));
    agent.memory_extractor = Some(memory);

    let stream = agent
        .run_stream("hello", RunParams::new().with_stream_events(true))
        .await
        .expect("stream");
    let items = collect_stream(stream).await;

    let memories = items.iter().find_map(|item| match item {
        RunStreamItem::Event(RunEvent {
            payload: RunEventPayload::MemoryUpdateCompleted { memories },
            ..
        }) => Some(memories.clone()),
        _ => None,
    });
    let memories = memories.expect("expected a memory completion event");
    assert_eq!(memories[0].memory, "prefers apples");

    // Enrichment completion surfaces before the run completes.
    let kinds = event_kinds(&items);
    let memory_idx = kinds
        .iter()
        .position(|k| *k == RunEventKind::MemoryUpdateCompleted)
        .unwrap();
    let completed_idx = kinds
        .iter()
        .position(|k| *k == RunEventKind::RunCompleted)
        .unwrap();
    assert!(memory_idx < completed_idx);
}

#[tokio::test]
async fn empty_message_sequence_is_tolerated() {
    let (agent, calls, _store) = stub_agent(Scenario::SimpleText);
    // No input messages and no system sections: the sequence is empty but
    // the model is still consulted.
    let record = agent
        .run(Vec::<ModelMessage>::new(), RunParams::new())
        .await
        .expect("run");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_state_flows_back_onto_the_record() {
    let (agent, _calls, store) = stub_agent(Scenario::SimpleText);
    let state = std::collections::HashMap::from([(
        "cart".to_string(),
        serde_json::json!(["apples"]),
    )]);

    let record = agent
        .run(
            "hello",
            RunParams::new()
                .with_session_id("s-state")
                .with_session_state(state),
        )
        .await
        .expect("run");

    let record_state = record.session_state.expect("record state");
    assert_eq!(record_state["cart"], serde_json::json!(["apples"]));

    let session = store.read("s-state").await.unwrap().expect("session");
    let session_state = session.session_state().expect("session state");
    assert_eq!(session_state["cart"], serde_json::json!(["apples"]));
}

#[tokio::test]
async fn blocking_adapter_drives_the_async_form() {
    let result = tokio::task::spawn_blocking(|| {
        let (agent, _calls, _store) = stub_agent(Scenario::SimpleText);
        drummer::blocking::run(&agent, "hello", RunParams::new())
    })
    .await
    .expect("join");
    let record = result.expect("run");
    assert_eq!(record.status, RunStatus::Completed);
}
