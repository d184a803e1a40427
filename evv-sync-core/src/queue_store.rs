//! Durable Queue Store. Persists the offline queue and the optimistic
//! update journal as single JSON blobs inside the Local Store's
//! `kv_blobs` table, replaced atomically on every save so a crash mid
//! flush never leaves a torn read.

use crate::error::CoreResult;
use crate::model::optimistic::OptimisticUpdate;
use crate::model::queue_item::QueuedAction;
use crate::store::LocalStore;

const QUEUE_KEY: &str = "offline_queue/actions";
const JOURNAL_KEY: &str = "optimistic/journal";

pub struct QueueStore<'a> {
    store: &'a LocalStore,
}

impl<'a> QueueStore<'a> {
    pub fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    pub fn load_queue(&self) -> CoreResult<Vec<QueuedAction>> {
        match self.store.get_blob(QUEUE_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_queue(&self, actions: &[QueuedAction]) -> CoreResult<()> {
        let raw = serde_json::to_string(actions)?;
        self.store.put_blob(QUEUE_KEY, &raw)
    }

    pub fn clear_queue(&self) -> CoreResult<()> {
        self.store.put_blob(QUEUE_KEY, "[]")
    }

    pub fn load_journal(&self) -> CoreResult<Vec<OptimisticUpdate>> {
        match self.store.get_blob(JOURNAL_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_journal(&self, updates: &[OptimisticUpdate]) -> CoreResult<()> {
        let raw = serde_json::to_string(updates)?;
        self.store.put_blob(JOURNAL_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::queue_item::{QueuedAction, QueuedActionKind};
    use serde_json::json;

    #[test]
    fn round_trips_empty_queue() {
        let store = LocalStore::open_in_memory().unwrap();
        let qs = QueueStore::new(&store);
        assert!(qs.load_queue().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let store = LocalStore::open_in_memory().unwrap();
        let qs = QueueStore::new(&store);
        let a = QueuedAction::new("a1", QueuedActionKind::CareNote, json!({}), 100, "ou1");
        let b = QueuedAction::new("a2", QueuedActionKind::TaskComplete, json!({}), 200, "ou2");
        qs.save_queue(&[a, b]).unwrap();
        let loaded = qs.load_queue().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "a1");
        assert_eq!(loaded[1].id, "a2");
    }

    #[test]
    fn clear_queue_empties_it() {
        let store = LocalStore::open_in_memory().unwrap();
        let qs = QueueStore::new(&store);
        let a = QueuedAction::new("a1", QueuedActionKind::CareNote, json!({}), 100, "ou1");
        qs.save_queue(&[a]).unwrap();
        qs.clear_queue().unwrap();
        assert!(qs.load_queue().unwrap().is_empty());
    }
}
