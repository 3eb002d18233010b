//! Durable approval records for paused runs.
//!
//! The approval record is the sole bridge for resuming a paused run across
//! process boundaries. At most one pending approval exists per run.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{RequirementKind, RunRecord};
use super::RunId;
use crate::error::DrummerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    #[default]
    AgentRun,
}

/// Durable record authorizing resumption of a paused run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub run_id: RunId,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: ApprovalStatus,
    pub pause_type: RequirementKind,
    #[serde(default)]
    pub approval_type: ApprovalType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for approval records, keyed by `approval_id`, with the
/// one-pending-per-run constraint enforced at this layer.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn create(&self, record: ApprovalRecord) -> Result<ApprovalRecord, DrummerError>;

    async fn get_pending(&self, run_id: RunId) -> Result<Option<ApprovalRecord>, DrummerError>;

    async fn update_status(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), DrummerError>;
}

/// Write the pending approval for a freshly paused run.
///
/// Idempotent per run: when a pending approval already exists its timestamp
/// is refreshed and it is returned unchanged otherwise.
pub async fn create_approval_from_pause(
    store: &dyn ApprovalStore,
    record: &RunRecord,
    agent_id: Option<&str>,
    agent_name: Option<&str>,
    user_id: Option<&str>,
) -> Result<ApprovalRecord, DrummerError> {
    if let Some(mut existing) = store.get_pending(record.run_id).await? {
        existing.updated_at = Utc::now();
        return Ok(existing);
    }

    let pause_type = record
        .requirements
        .first()
        .map(|req| req.kind)
        .unwrap_or(RequirementKind::Confirmation);
    let now = Utc::now();
    let approval = ApprovalRecord {
        approval_id: Uuid::new_v4().to_string(),
        run_id: record.run_id,
        session_id: record.session_id.clone(),
        agent_id: agent_id.map(str::to_string),
        agent_name: agent_name.map(str::to_string),
        user_id: user_id.map(str::to_string),
        status: ApprovalStatus::Pending,
        pause_type,
        approval_type: ApprovalType::AgentRun,
        created_at: now,
        updated_at: now,
    };
    store.create(approval).await
}

/// Mutex-guarded in-memory approval store.
#[derive(Debug, Default)]
pub struct InMemoryApprovalStore {
    records: Mutex<HashMap<String, ApprovalRecord>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create(&self, record: ApprovalRecord) -> Result<ApprovalRecord, DrummerError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| DrummerError::Storage("approval store lock poisoned".into()))?;
        let duplicate = records.values().any(|existing| {
            existing.run_id == record.run_id && existing.status == ApprovalStatus::Pending
        });
        if duplicate {
            return Err(DrummerError::Approval(format!(
                "run {} already has a pending approval",
                record.run_id
            )));
        }
        records.insert(record.approval_id.clone(), record.clone());
        Ok(record)
    }

    async fn get_pending(&self, run_id: RunId) -> Result<Option<ApprovalRecord>, DrummerError> {
        let records = self
            .records
            .lock()
            .map_err(|_| DrummerError::Storage("approval store lock poisoned".into()))?;
        Ok(records
            .values()
            .find(|record| record.run_id == run_id && record.status == ApprovalStatus::Pending)
            .cloned())
    }

    async fn update_status(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), DrummerError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| DrummerError::Storage("approval store lock poisoned".into()))?;
        match records.get_mut(approval_id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(DrummerError::Approval(format!(
                "no approval record {approval_id}"
            ))),
        }
    }
}
