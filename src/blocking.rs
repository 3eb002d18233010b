//! Blocking adapters over the async run surface.
//!
//! Each call builds a current-thread Tokio runtime and drives the async form
//! to completion, so the phase pipeline exists exactly once. Do not call
//! these from inside an async context; use the [`Agent`] methods directly
//! there.

use crate::agent::Agent;
use crate::error::DrummerError;
use crate::run::record::{InputContent, RunRecord};
use crate::run::{cancel, ContinueRunParams, RunId, RunParams};

fn runtime() -> Result<tokio::runtime::Runtime, DrummerError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(DrummerError::from)
}

/// Blocking form of [`Agent::run`].
pub fn run(
    agent: &Agent,
    input: impl Into<InputContent>,
    params: RunParams,
) -> Result<RunRecord, DrummerError> {
    runtime()?.block_on(agent.run(input, params))
}

/// Blocking form of [`Agent::continue_run`].
pub fn continue_run(agent: &Agent, params: ContinueRunParams) -> Result<RunRecord, DrummerError> {
    runtime()?.block_on(agent.continue_run(params))
}

/// Request cancellation of an in-flight run. Identical to
/// [`cancel_run`](crate::run::cancel_run); the registry is synchronous on
/// both surfaces.
pub fn cancel_run(run_id: RunId) -> bool {
    cancel::cancel_run(run_id)
}
