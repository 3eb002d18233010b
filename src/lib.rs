//! Drummer -- agent run orchestration engine.
//!
//! Drives a single interaction between a user and a model-backed agent from
//! input to final output: session loading, dependency resolution, pre/post
//! hooks, the tool-augmented model call, background enrichment workers,
//! pause/resume for human-in-the-loop tool approvals, cancellation, retries,
//! streaming, and durable persistence of the run record.
//!
//! External collaborators (model backend, session store, approval store,
//! knowledge retrieval, extractors) plug in through traits; in-memory stores
//! ship for tests and ephemeral use.

pub mod agent;
pub mod blocking;
pub mod error;
pub mod hooks;
pub mod knowledge;
pub mod memory;
pub mod model;
pub mod prelude;
pub mod reasoning;
pub mod run;
pub mod session;
pub mod tools;
pub mod types;

pub use agent::Agent;
pub use error::{DrummerError, ErrorCategory};
pub use run::{
    cancel_run, ContinueRunParams, RunParams, RunRecord, RunStatus, RunStream, RunStreamItem,
};
