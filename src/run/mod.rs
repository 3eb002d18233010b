//! Run orchestration: dispatcher, run loop, events, cancellation, and the
//! supporting per-run state.

pub mod approval;
pub(crate) mod background;
pub mod cancel;
pub(crate) mod cleanup;
pub mod context;
pub mod dispatch;
pub mod events;
pub(crate) mod executor;
pub(crate) mod messages;
pub(crate) mod options;
pub mod record;
pub(crate) mod response;

use uuid::Uuid;

/// Unique run identifier.
pub type RunId = Uuid;

pub use approval::{
    create_approval_from_pause, ApprovalRecord, ApprovalStatus, ApprovalStore, ApprovalType,
    InMemoryApprovalStore,
};
pub use cancel::{cancel_run, raise_if_cancelled, register_run};
pub use context::{Dependency, DependencyMap, RunContext, SessionState};
pub use dispatch::{ContinueRunParams, RunParams};
pub use events::{
    EventPipeline, RunEvent, RunEventKind, RunEventPayload, RunStream, RunStreamItem,
};
pub use record::{
    InputContent, RequirementKind, RunInput, RunRecord, RunRequirement, RunStatus,
};
