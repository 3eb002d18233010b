//! Background enrichment contracts: memories, cultural knowledge, learnings,
//! and session summaries.
//!
//! Each extractor receives the built message sequence by shared reference and
//! owns its own output; none of them may touch the run record. The run loop
//! decides when they are started, joined, or cancelled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DrummerError;
use crate::session::SessionRecord;
use crate::types::ModelMessage;

/// A durable user memory produced by the memory extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMemory {
    pub memory: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Extracts durable user memories from the conversation.
#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract(
        &self,
        messages: &[ModelMessage],
        user_id: Option<&str>,
    ) -> Result<Vec<UserMemory>, DrummerError>;
}

/// Extracts shared cultural knowledge from the conversation.
#[async_trait]
pub trait CulturalKnowledgeExtractor: Send + Sync {
    async fn extract(&self, messages: &[ModelMessage]) -> Result<(), DrummerError>;
}

/// Extracts reusable learnings from the conversation.
#[async_trait]
pub trait LearningExtractor: Send + Sync {
    async fn extract(
        &self,
        messages: &[ModelMessage],
        session: &SessionRecord,
        user_id: Option<&str>,
    ) -> Result<(), DrummerError>;
}

/// Produces a rolling session summary after the run is upserted. Failures are
/// logged and the run still completes.
#[async_trait]
pub trait SessionSummarizer: Send + Sync {
    async fn summarize(&self, session: &SessionRecord) -> Result<String, DrummerError>;
}
