//! Mutation Log Entries
//!
//! Every GraphQL mutation is recorded before it runs and marked with its
//! outcome afterwards, so clients can poll by `clientMutationId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing state of a logged mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    Received,
    Error,
    Success,
}

impl MutationStatus {
    /// Stored integer code
    pub fn code(&self) -> i64 {
        match self {
            MutationStatus::Received => 0,
            MutationStatus::Error => 1,
            MutationStatus::Success => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MutationStatus::Received),
            1 => Some(MutationStatus::Error),
            2 => Some(MutationStatus::Success),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationLogEntry {
    pub id: Uuid,
    pub mutation_name: String,
    pub json_content: serde_json::Value,
    pub user_id: Option<Uuid>,
    pub request_date_time: DateTime<Utc>,
    pub client_mutation_id: Option<String>,
    pub client_mutation_label: Option<String>,
    pub status: MutationStatus,
    pub error: Option<String>,
}
