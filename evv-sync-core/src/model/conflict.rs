use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    ClientWins,
    ServerWins,
    Merge,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub client_value: serde_json::Value,
    pub server_value: serde_json::Value,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionMetadata {
    pub resolved_by: Option<String>,
    pub resolved_at: Option<i64>,
    pub reason: Option<String>,
}

/// Output of `ConflictResolver::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ConflictStrategy,
    pub resolved_record: serde_json::Value,
    pub field_conflicts: Option<Vec<FieldConflict>>,
    pub requires_manual_review: bool,
    pub resolution_metadata: Option<ResolutionMetadata>,
}

/// Decision payload for `applyManualResolution`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManualSelection {
    Client,
    Server,
    FieldByField(std::collections::HashMap<String, FieldChoice>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldChoice {
    Client,
    Server,
    Value(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualDecision {
    pub selected_strategy: ManualSelection,
    pub resolved_by: String,
}
