//! Background-spawn variant: pending handle now, terminal record later.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{stub_agent, Scenario, StubBackend};
use drummer::prelude::*;
use pretty_assertions::assert_eq;

async fn poll_until_terminal(
    agent: &Agent,
    run_id: drummer::run::RunId,
    session_id: &str,
) -> RunRecord {
    for _ in 0..100 {
        if let Some(record) = agent.get_run(run_id, session_id).await.expect("get_run") {
            if matches!(
                record.status,
                RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled
            ) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("background run never reached a terminal status");
}

#[tokio::test]
async fn background_run_returns_pending_then_completes() {
    let (agent, _calls, store) = stub_agent(Scenario::SlowRespond);

    let pending = agent
        .run_background("hello", RunParams::new().with_session_id("s-bg"))
        .await
        .expect("background dispatch");
    assert_eq!(pending.status, RunStatus::Pending);

    // The pending record is visible to pollers immediately.
    let stored = store
        .get_run(pending.run_id, "s-bg")
        .await
        .unwrap()
        .expect("stored pending run");
    assert!(matches!(
        stored.status,
        RunStatus::Pending | RunStatus::Running | RunStatus::Completed
    ));

    let finished = poll_until_terminal(&agent, pending.run_id, "s-bg").await;
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.content.as_deref(), Some("slow answer"));
}

#[tokio::test]
async fn background_run_without_a_store_is_rejected() {
    let backend = StubBackend::new(Scenario::SimpleText);
    let agent = Agent::builder().model(Arc::new(backend)).build();

    let err = agent
        .run_background("hello", RunParams::new())
        .await
        .expect_err("expected validation error");
    assert!(matches!(err, DrummerError::InvalidArgument(_)));
}

#[tokio::test]
async fn background_run_failure_is_persisted() {
    let (agent, _calls, _store) = stub_agent(Scenario::AlwaysFail);

    let pending = agent
        .run_background("hello", RunParams::new().with_session_id("s-bg-fail"))
        .await
        .expect("background dispatch");

    let finished = poll_until_terminal(&agent, pending.run_id, "s-bg-fail").await;
    assert_eq!(finished.status, RunStatus::Error);
    assert!(finished.content.is_some());
}

#[tokio::test]
async fn background_run_can_be_cancelled_by_id() {
    let (agent, _calls, _store) = stub_agent(Scenario::SlowRespond);

    let pending = agent
        .run_background("hello", RunParams::new().with_session_id("s-bg-cancel"))
        .await
        .expect("background dispatch");
    assert!(cancel_run(pending.run_id));

    let finished = poll_until_terminal(&agent, pending.run_id, "s-bg-cancel").await;
    assert_eq!(finished.status, RunStatus::Cancelled);
}
