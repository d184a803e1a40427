//! Optimistic Update Manager. Applies a local mutation immediately,
//! journals a before-image so it can be rolled back if the matching
//! queued action ultimately fails, and trims the journal once an update
//! is confirmed synced.

use std::sync::Mutex;

use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::model::optimistic::{OptimisticUpdate, Operation, UpdateStatus};
use crate::model::record::{EntityKind, Record};
use crate::queue_store::QueueStore;
use crate::store::LocalStore;

/// Synced journal entries are kept around briefly for observability, but
/// capped per entity kind so the blob doesn't grow without bound.
const SYNCED_JOURNAL_CAP_PER_KIND: usize = 50;

pub struct OptimisticUpdateManager<'a, C: Clock> {
    store: &'a LocalStore,
    clock: C,
    journal: Mutex<Vec<OptimisticUpdate>>,
}

impl<'a, C: Clock> OptimisticUpdateManager<'a, C> {
    pub fn new(store: &'a LocalStore, clock: C) -> CoreResult<Self> {
        let journal = QueueStore::new(store).load_journal()?;
        Ok(Self {
            store,
            clock,
            journal: Mutex::new(journal),
        })
    }

    fn persist(&self, journal: &[OptimisticUpdate]) -> CoreResult<()> {
        QueueStore::new(self.store).save_journal(journal)
    }

    /// Writes `proposed_state` to the record immediately and journals the
    /// update. The caller is responsible for enqueuing the matching
    /// network action; this method only concerns itself with the local
    /// mutation and the ability to undo it later.
    pub fn apply_update(
        &self,
        id: impl Into<String>,
        kind: EntityKind,
        record_id: impl Into<String>,
        operation: Operation,
        proposed_state: serde_json::Value,
    ) -> CoreResult<OptimisticUpdate> {
        let record_id = record_id.into();
        let now = self.clock.now_ms();

        let before_image = self.store.get(kind, &record_id)?.map(|r| r.payload);
        if operation != Operation::Create && before_image.is_none() {
            return Err(CoreError::Validation(format!(
                "cannot apply {operation:?} to nonexistent record {record_id}"
            )));
        }

        match operation {
            Operation::Create => {
                self.store.create(
                    kind,
                    &record_id,
                    proposed_state["organizationId"]
                        .as_str()
                        .unwrap_or_default(),
                    now,
                    proposed_state.clone(),
                )?;
            }
            Operation::Update => {
                self.store.update(kind, &record_id, |record: &mut Record| {
                    record.payload = proposed_state.clone();
                    record.updated_at = now;
                    record.sync_meta.sync_pending = true;
                })?;
            }
            Operation::Delete => {
                self.store.mark_deleted(kind, &record_id)?;
            }
        }

        let update = OptimisticUpdate::new(
            id,
            kind.as_str(),
            record_id,
            operation,
            proposed_state,
            before_image,
            now,
        );
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        journal.push(update.clone());
        self.persist(&journal)?;
        Ok(update)
    }

    /// Marks an update synced and trims the per-kind synced backlog.
    pub fn mark_synced(&self, update_id: &str) -> CoreResult<()> {
        let now = self.clock.now_ms();
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        let entry = journal
            .iter_mut()
            .find(|u| u.id == update_id)
            .ok_or_else(|| CoreError::Validation(format!("no such optimistic update: {update_id}")))?;
        entry.status = UpdateStatus::Synced;
        entry.synced_at = Some(now);

        self.store.update(
            entity_kind_from_str(&entry.record_kind),
            &entry.record_id,
            |record: &mut Record| {
                record.sync_meta.is_synced = true;
                record.sync_meta.sync_pending = false;
            },
        )?;

        trim_synced_backlog(&mut journal);
        self.persist(&journal)?;
        Ok(())
    }

    /// Marks an update failed. Callers decide separately whether retry
    /// exhaustion warrants a `rollback`.
    pub fn mark_failed(&self, update_id: &str, error_message: impl Into<String>) -> CoreResult<()> {
        let now = self.clock.now_ms();
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        let entry = journal
            .iter_mut()
            .find(|u| u.id == update_id)
            .ok_or_else(|| CoreError::Validation(format!("no such optimistic update: {update_id}")))?;
        entry.status = UpdateStatus::Failed;
        entry.failed_at = Some(now);
        entry.error_message = Some(error_message.into());
        entry.retry_count += 1;
        self.persist(&journal)?;
        Ok(())
    }

    /// Restores the record to its before-image (or deletes it, if the
    /// update was a `Create`) and marks the journal entry rolled back. A
    /// `Delete` can never be rolled back this way — the record is already
    /// gone server-side by the time this is called, so un-deleting it
    /// locally would just desync again. That case is instead marked for
    /// manual review and left alone.
    pub fn rollback(&self, update_id: &str) -> CoreResult<()> {
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        let idx = journal
            .iter()
            .position(|u| u.id == update_id)
            .ok_or_else(|| CoreError::Validation(format!("no such optimistic update: {update_id}")))?;
        let entry = journal[idx].clone();
        let kind = entity_kind_from_str(&entry.record_kind);

        match (entry.operation, &entry.before_image) {
            (Operation::Delete, _) => {
                error!(
                    update_id,
                    record_id = %entry.record_id,
                    "cannot un-delete a rolled-back delete; flagging for manual review"
                );
                journal[idx].status = UpdateStatus::Conflict;
                journal[idx].error_message = Some("delete rollback requires manual review".to_string());
                self.persist(&journal)?;
                return Ok(());
            }
            (Operation::Create, _) => {
                self.store.mark_deleted(kind, &entry.record_id)?;
            }
            (_, Some(before)) => {
                self.store.update(kind, &entry.record_id, |record: &mut Record| {
                    record.payload = before.clone();
                    record.sync_meta.sync_pending = false;
                    record.sync_meta.is_synced = true;
                })?;
            }
            (_, None) => {
                warn!(update_id, "rollback requested with no before-image; leaving record as-is");
            }
        }

        journal[idx].status = UpdateStatus::RolledBack;
        self.persist(&journal)?;
        debug!(update_id, "optimistic update rolled back");
        Ok(())
    }

    pub fn has_pending_updates(&self) -> bool {
        self.journal
            .lock()
            .expect("journal mutex poisoned")
            .iter()
            .any(|u| u.status == UpdateStatus::Pending)
    }

    pub fn pending_count(&self) -> usize {
        self.journal
            .lock()
            .expect("journal mutex poisoned")
            .iter()
            .filter(|u| u.status == UpdateStatus::Pending)
            .count()
    }
}

fn trim_synced_backlog(journal: &mut Vec<OptimisticUpdate>) {
    use std::collections::HashMap;
    let mut synced_by_kind: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, u) in journal.iter().enumerate() {
        if u.status == UpdateStatus::Synced {
            synced_by_kind.entry(u.record_kind.clone()).or_default().push(i);
        }
    }
    let mut to_remove = std::collections::HashSet::new();
    for indices in synced_by_kind.values() {
        if indices.len() > SYNCED_JOURNAL_CAP_PER_KIND {
            for &i in &indices[..indices.len() - SYNCED_JOURNAL_CAP_PER_KIND] {
                to_remove.insert(i);
            }
        }
    }
    if to_remove.is_empty() {
        return;
    }
    let mut i = 0;
    journal.retain(|_| {
        let keep = !to_remove.contains(&i);
        i += 1;
        keep
    });
}

fn entity_kind_from_str(s: &str) -> EntityKind {
    match s {
        "visit" => EntityKind::Visit,
        "time-entry" => EntityKind::TimeEntry,
        "evv-record" => EntityKind::EvvRecord,
        "attachment" => EntityKind::Attachment,
        "note" => EntityKind::Note,
        "geofence" => EntityKind::Geofence,
        "template" => EntityKind::Template,
        "notification" => EntityKind::Notification,
        _ => EntityKind::Note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    fn manager(store: &LocalStore) -> OptimisticUpdateManager<'_, FixedClock> {
        OptimisticUpdateManager::new(store, FixedClock::new(1_000)).unwrap()
    }

    #[test]
    fn apply_create_writes_record_immediately() {
        let store = LocalStore::open_in_memory().unwrap();
        let mgr = manager(&store);
        mgr.apply_update("u1", EntityKind::Note, "n1", Operation::Create, json!({"text": "hi"}))
            .unwrap();
        let record = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert_eq!(record.payload["text"], "hi");
        assert!(mgr.has_pending_updates());
    }

    #[test]
    fn rollback_update_restores_before_image() {
        let store = LocalStore::open_in_memory().unwrap();
        store.create(EntityKind::Note, "n1", "org1", 500, json!({"text": "original"})).unwrap();
        let mgr = manager(&store);
        mgr.apply_update("u1", EntityKind::Note, "n1", Operation::Update, json!({"text": "changed"}))
            .unwrap();
        mgr.rollback("u1").unwrap();
        let record = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert_eq!(record.payload["text"], "original");
    }

    #[test]
    fn rollback_create_marks_record_deleted() {
        let store = LocalStore::open_in_memory().unwrap();
        let mgr = manager(&store);
        mgr.apply_update("u1", EntityKind::Note, "n1", Operation::Create, json!({})).unwrap();
        mgr.rollback("u1").unwrap();
        let record = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert!(record.deleted);
    }

    #[test]
    fn rollback_delete_does_not_undelete_record() {
        let store = LocalStore::open_in_memory().unwrap();
        store.create(EntityKind::Note, "n1", "org1", 500, json!({"text": "original"})).unwrap();
        let mgr = manager(&store);
        mgr.apply_update("u1", EntityKind::Note, "n1", Operation::Delete, json!({}))
            .unwrap();
        mgr.rollback("u1").unwrap();
        let record = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert!(record.deleted, "delete rollback must not resurrect the record");
    }

    #[test]
    fn mark_synced_clears_pending() {
        let store = LocalStore::open_in_memory().unwrap();
        let mgr = manager(&store);
        mgr.apply_update("u1", EntityKind::Note, "n1", Operation::Create, json!({})).unwrap();
        mgr.mark_synced("u1").unwrap();
        assert!(!mgr.has_pending_updates());
        let record = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert!(record.sync_meta.is_synced);
    }
}
