use serde::{Deserialize, Serialize};

/// Scheduling priority, ordered so `Critical` sorts ahead of `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum QueuePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueuedActionKind {
    VisitCheckIn,
    VisitCheckOut,
    TaskComplete,
    CareNote,
    AttachmentUpload,
    SignatureUpload,
    VisitNote,
    IncidentReport,
}

impl QueuedActionKind {
    /// Default priority for this action kind.
    pub fn default_priority(&self) -> QueuePriority {
        use QueuedActionKind::*;
        match self {
            VisitCheckIn | VisitCheckOut | SignatureUpload => QueuePriority::Critical,
            CareNote | VisitNote | TaskComplete | IncidentReport => QueuePriority::High,
            AttachmentUpload => QueuePriority::Normal,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        use QueuedActionKind::*;
        match self {
            VisitCheckIn => "visit-check-in",
            VisitCheckOut => "visit-check-out",
            TaskComplete => "task-complete",
            CareNote => "care-note",
            AttachmentUpload => "attachment-upload",
            SignatureUpload => "signature-upload",
            VisitNote => "visit-note",
            IncidentReport => "incident-report",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueError {
    pub at: i64,
    pub message: String,
    pub status: Option<u16>,
}

/// A durable item in the offline queue. `max_retries` defaults to 5;
/// `retries <= max_retries` is enforced by `OfflineQueue`, not by this
/// struct alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: String,
    pub kind: QueuedActionKind,
    pub payload: serde_json::Value,
    pub enqueued_at: i64,
    pub priority: QueuePriority,
    pub retries: u32,
    pub max_retries: u32,
    pub errors: Vec<QueueError>,
    pub last_attempt_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    /// Links back to the `OptimisticUpdate` this action exists to confirm,
    /// so a fatal failure or retry exhaustion can trigger rollback.
    pub optimistic_update_id: String,
}

impl QueuedAction {
    pub fn new(
        id: impl Into<String>,
        kind: QueuedActionKind,
        payload: serde_json::Value,
        enqueued_at: i64,
        optimistic_update_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            priority: kind.default_priority(),
            kind,
            payload,
            enqueued_at,
            retries: 0,
            max_retries: 5,
            errors: Vec::new(),
            last_attempt_at: None,
            next_retry_at: None,
            optimistic_update_id: optimistic_update_id.into(),
        }
    }
}
