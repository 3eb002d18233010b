//! Pre- and post-hooks around the model invocation.
//!
//! Pre-hooks may rewrite the run input (normalization, PII scrubbing) and
//! reject it with [`DrummerError::InputValidation`]. Post-hooks inspect the
//! assembled run record and reject with [`DrummerError::OutputValidation`].
//! Validation rejections are terminal and never retried. The run loop emits
//! started/completed events around each hook in streaming mode.

use async_trait::async_trait;

use crate::error::DrummerError;
use crate::run::context::RunContext;
use crate::run::record::{RunInput, RunRecord};
use crate::session::SessionRecord;

/// Hook executed before tool selection and message build. Pre-hooks are not
/// re-run on continuation because they may have side effects.
#[async_trait]
pub trait PreHook: Send + Sync {
    fn name(&self) -> &str {
        "pre_hook"
    }

    async fn run(
        &self,
        input: &mut RunInput,
        ctx: &mut RunContext,
        session: &SessionRecord,
    ) -> Result<(), DrummerError>;
}

/// Hook executed after the output is generated, before the record is
/// returned.
#[async_trait]
pub trait PostHook: Send + Sync {
    fn name(&self) -> &str {
        "post_hook"
    }

    async fn run(
        &self,
        record: &mut RunRecord,
        ctx: &mut RunContext,
        session: &SessionRecord,
    ) -> Result<(), DrummerError>;
}
