pub mod conflict;
pub mod evv;
pub mod optimistic;
pub mod queue_item;
pub mod record;
pub mod state_rules;

pub use conflict::{ConflictResolution, ConflictStrategy, FieldConflict, Severity};
pub use evv::{EvvRecord, RecordStatus, Verification, VerificationLevel, VerificationMethod};
pub use optimistic::{Operation, OptimisticUpdate, UpdateStatus};
pub use queue_item::{QueuePriority, QueuedAction, QueuedActionKind};
pub use record::{EntityKind, Record, SyncMeta};
pub use state_rules::StateRules;
