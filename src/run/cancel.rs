//! Process-wide cancellation registry for in-flight runs.
//!
//! Cancellation is cooperative: [`cancel_run`] only flips a token, and the
//! run observes it at the next [`raise_if_cancelled`] suspension point.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

use super::RunId;
use crate::error::DrummerError;

static REGISTRY: OnceLock<Mutex<HashMap<RunId, CancellationToken>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<RunId, CancellationToken>> {
    REGISTRY.get_or_init(Default::default)
}

/// Track a run. Must be called before any cancellable work starts.
pub fn register_run(run_id: RunId) {
    let mut runs = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    runs.entry(run_id).or_insert_with(CancellationToken::new);
}

/// Request cancellation of a run. Returns whether the run was registered.
/// Calling twice is a no-op with the same observable state.
pub fn cancel_run(run_id: RunId) -> bool {
    let runs = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match runs.get(&run_id) {
        Some(token) => {
            token.cancel();
            true
        }
        None => false,
    }
}

/// Error with [`DrummerError::Cancelled`] if the run was cancelled. Placed
/// immediately before and after every suspension point in the run loop.
pub fn raise_if_cancelled(run_id: RunId) -> Result<(), DrummerError> {
    let cancelled = {
        let runs = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        runs.get(&run_id).map(|t| t.is_cancelled()).unwrap_or(false)
    };
    if cancelled {
        return Err(DrummerError::Cancelled { run_id });
    }
    Ok(())
}

/// Remove a run from the registry. Called in the terminal cleanup of every
/// run variant.
pub fn cleanup_run(run_id: RunId) {
    let mut runs = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    runs.remove(&run_id);
}
