//! Reasoning subsystem contract.

use async_trait::async_trait;

use crate::error::DrummerError;
use crate::types::ModelMessage;

/// Optional pre-model reasoning pass over the built message sequence.
/// Returns reasoning content to attach to the run, if any.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, messages: &[ModelMessage]) -> Result<Option<String>, DrummerError>;
}
