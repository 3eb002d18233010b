//! Session records: the durable container that accumulates runs.

pub mod store;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::record::RunRecord;
use crate::types::{Metrics, Usage};

pub use store::{InMemorySessionStore, SessionStore};

const SESSION_STATE_KEY: &str = "session_state";
const SESSION_NAME_KEY: &str = "session_name";
const SESSION_METRICS_KEY: &str = "session_metrics";

/// Kind of session. Only the agent variant is produced by this crate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Agent,
    Team,
    Workflow,
}

/// The durable record keyed by `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_type: SessionType,
    /// Ordered run records, appended or replaced by [`upsert_run`].
    ///
    /// [`upsert_run`]: SessionRecord::upsert_run
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    /// Free-form bag holding `session_state`, `session_name`, and the rolled
    /// up `session_metrics`.
    #[serde(default)]
    pub session_data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id,
            session_type: SessionType::Agent,
            runs: Vec::new(),
            session_data: HashMap::new(),
            summary: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the run with the same `run_id`, or append.
    pub fn upsert_run(&mut self, run: RunRecord) {
        self.updated_at = Utc::now();
        match self.runs.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = run,
            None => self.runs.push(run),
        }
    }

    /// Find a run by id.
    pub fn get_run(&self, run_id: crate::run::RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.run_id == run_id)
    }

    /// The stored session state, if any.
    pub fn session_state(&self) -> Option<HashMap<String, serde_json::Value>> {
        self.session_data
            .get(SESSION_STATE_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write the session state back into `session_data`.
    pub fn set_session_state(&mut self, state: &HashMap<String, serde_json::Value>) {
        if let Ok(value) = serde_json::to_value(state) {
            self.session_data.insert(SESSION_STATE_KEY.into(), value);
        }
    }

    pub fn session_name(&self) -> Option<&str> {
        self.session_data.get(SESSION_NAME_KEY)?.as_str()
    }

    pub fn set_session_name(&mut self, name: impl Into<String>) {
        self.session_data
            .insert(SESSION_NAME_KEY.into(), serde_json::Value::String(name.into()));
    }

    /// Roll a finished run's token usage into the session-level metrics.
    pub fn accrue_metrics(&mut self, metrics: &Metrics) {
        let mut total: Usage = self
            .session_data
            .get(SESSION_METRICS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        total.merge(&metrics.usage);
        if let Ok(value) = serde_json::to_value(&total) {
            self.session_data.insert(SESSION_METRICS_KEY.into(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::record::RunRecord;
    use uuid::Uuid;

    #[test]
    fn upsert_run_replaces_by_id_or_appends() {
        let mut session = SessionRecord::new("s1", None);
        let run_id = Uuid::new_v4();
        let mut run = RunRecord::empty(run_id, "s1");
        session.upsert_run(run.clone());
        assert_eq!(session.runs.len(), 1);

        run.content = Some("updated".into());
        session.upsert_run(run);
        assert_eq!(session.runs.len(), 1);
        assert_eq!(session.runs[0].content.as_deref(), Some("updated"));

        session.upsert_run(RunRecord::empty(Uuid::new_v4(), "s1"));
        assert_eq!(session.runs.len(), 2);
    }

    #[test]
    fn metrics_accrue_across_runs() {
        let mut session = SessionRecord::new("s1", None);
        let mut metrics = Metrics::default();
        metrics.usage.input_tokens = 10;
        metrics.usage.total_tokens = 10;
        session.accrue_metrics(&metrics);
        session.accrue_metrics(&metrics);
        let stored: Usage =
            serde_json::from_value(session.session_data[SESSION_METRICS_KEY].clone()).unwrap();
        assert_eq!(stored.input_tokens, 20);
    }
}
