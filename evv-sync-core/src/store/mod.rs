//! Local Store. Typed, indexed persistent record storage with
//! collections, query, write transactions, and deletion-marking.
//! Backed by `rusqlite`, wrapping a connection in a `Mutex` and exposing
//! transactional helpers around it.

pub mod schema;
pub mod txn;

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::model::record::{EntityKind, Record, SyncMeta};

pub use txn::WriteTxn;

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Readers outside a transaction see a consistent snapshot of
    /// committed state — SQLite's default isolation gives us this for
    /// free as long as all mutation goes through `write`.
    pub fn get(&self, kind: EntityKind, id: &str) -> CoreResult<Option<Record>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        row_to_record(&conn, kind, id)
    }

    /// Predicate-based query scoped to one entity kind. Indexes on
    /// `updated_at` and `organization_id` (see `schema`) make the common
    /// sync-since-cursor and per-organization scans cheap even though the
    /// predicate itself runs in Rust rather than SQL — this mirrors how a
    /// typed ORM layer filters after a narrow indexed fetch.
    pub fn query(
        &self,
        kind: EntityKind,
        since_updated_at: Option<i64>,
        include_deleted: bool,
        mut predicate: impl FnMut(&Record) -> bool,
    ) -> CoreResult<Vec<Record>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let since = since_updated_at.unwrap_or(i64::MIN);
        let mut stmt = conn.prepare(
            "SELECT entity_kind, id, organization_id, updated_at, payload, is_synced,
                    sync_pending, server_version, deleted
             FROM records
             WHERE entity_kind = ?1 AND updated_at >= ?2
             ORDER BY updated_at ASC",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), since], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            let record = row?;
            if !include_deleted && record.deleted {
                continue;
            }
            if predicate(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Execute `f` atomically with respect to other writers under a
    /// single-writer discipline. Any error returned from the closure
    /// rolls the whole transaction back.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteTxn) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::Store(e.to_string()))?;
        let mut wtxn = WriteTxn { tx };
        match f(&mut wtxn) {
            Ok(value) => {
                wtxn.tx.commit().map_err(|e| CoreError::Store(e.to_string()))?;
                Ok(value)
            }
            Err(e) => {
                // Explicit rollback: dropping `tx` would roll back anyway,
                // but this makes the discipline visible at the call site.
                let _ = wtxn.tx.rollback();
                Err(e)
            }
        }
    }

    pub fn create(
        &self,
        kind: EntityKind,
        id: &str,
        organization_id: &str,
        updated_at: i64,
        payload: serde_json::Value,
    ) -> CoreResult<Record> {
        self.write(|txn| txn.create(kind, id, organization_id, updated_at, payload))
    }

    pub fn update(
        &self,
        kind: EntityKind,
        id: &str,
        mutator: impl FnOnce(&mut Record),
    ) -> CoreResult<Record> {
        self.write(|txn| txn.update(kind, id, mutator))
    }

    pub fn mark_deleted(&self, kind: EntityKind, id: &str) -> CoreResult<()> {
        self.write(|txn| txn.mark_deleted(kind, id))
    }

    /// A small blob-kv facade sharing the same file, used by `QueueStore`
    /// and the optimistic-update journal, each keeping one blob per key.
    pub fn get_blob(&self, key: &str) -> CoreResult<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let value = conn
            .query_row(
                "SELECT value FROM kv_blobs WHERE key = ?1",
                params![key],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_blob(&self, key: &str, value: &str) -> CoreResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO kv_blobs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

pub(crate) fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let kind_str: String = row.get(0)?;
    let payload_str: String = row.get(4)?;
    Ok(Record {
        id: row.get(1)?,
        entity_kind: parse_entity_kind(&kind_str),
        organization_id: row.get(2)?,
        updated_at: row.get(3)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        sync_meta: SyncMeta {
            is_synced: row.get::<_, i64>(5)? != 0,
            sync_pending: row.get::<_, i64>(6)? != 0,
            server_version: row.get(7)?,
        },
        deleted: row.get::<_, i64>(8)? != 0,
    })
}

fn parse_entity_kind(s: &str) -> EntityKind {
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

fn row_to_record(conn: &Connection, kind: EntityKind, id: &str) -> CoreResult<Option<Record>> {
    let result = conn
        .query_row(
            "SELECT entity_kind, id, organization_id, updated_at, payload, is_synced,
                    sync_pending, server_version, deleted
             FROM records WHERE entity_kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
            map_row,
        )
        .optional()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_then_get_round_trips() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .create(EntityKind::Note, "n1", "org1", 1000, json!({"text": "hi"}))
            .unwrap();
        let got = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert_eq!(got.payload["text"], "hi");
    }

    #[test]
    fn mark_deleted_is_tombstone_not_removal() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .create(EntityKind::Note, "n1", "org1", 1000, json!({}))
            .unwrap();
        store.mark_deleted(EntityKind::Note, "n1").unwrap();
        let got = store.get(EntityKind::Note, "n1").unwrap().unwrap();
        assert!(got.deleted);
    }

    #[test]
    fn write_rolls_back_on_error() {
        let store = LocalStore::open_in_memory().unwrap();
        let result: CoreResult<()> = store.write(|txn| {
            txn.create(EntityKind::Note, "n1", "org1", 1000, json!({}))?;
            Err(CoreError::Validation("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get(EntityKind::Note, "n1").unwrap().is_none());
    }

    #[test]
    fn query_filters_by_since_and_predicate() {
        let store = LocalStore::open_in_memory().unwrap();
        store.create(EntityKind::Note, "n1", "org1", 100, json!({})).unwrap();
        store.create(EntityKind::Note, "n2", "org1", 200, json!({})).unwrap();
        let results = store
            .query(EntityKind::Note, Some(150), false, |_| true)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "n2");
    }
}
