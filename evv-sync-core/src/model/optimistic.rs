use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Pending,
    Synced,
    Failed,
    RolledBack,
    Conflict,
}

/// A locally-applied mutation awaiting server confirmation.
/// Invariant: `operation == Create` implies `before_image.is_none()`;
/// `operation != Create` implies `before_image.is_some()` iff the record
/// existed locally at apply time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimisticUpdate {
    pub id: String,
    pub record_kind: String,
    pub record_id: String,
    pub operation: Operation,
    pub proposed_state: serde_json::Value,
    pub before_image: Option<serde_json::Value>,
    pub status: UpdateStatus,
    pub created_at: i64,
    pub synced_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl OptimisticUpdate {
    pub fn new(
        id: impl Into<String>,
        record_kind: impl Into<String>,
        record_id: impl Into<String>,
        operation: Operation,
        proposed_state: serde_json::Value,
        before_image: Option<serde_json::Value>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            record_kind: record_kind.into(),
            record_id: record_id.into(),
            operation,
            proposed_state,
            before_image,
            status: UpdateStatus::Pending,
            created_at,
            synced_at: None,
            failed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }
}
