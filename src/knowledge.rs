//! Knowledge retrieval contract.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DrummerError;

/// Filters narrowing a retrieval query.
pub type KnowledgeFilter = HashMap<String, serde_json::Value>;

/// A retrieval hit attached to the run record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reference {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Retrieves references relevant to the user input during message build.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        filters: Option<&KnowledgeFilter>,
    ) -> Result<Vec<Reference>, DrummerError>;
}
