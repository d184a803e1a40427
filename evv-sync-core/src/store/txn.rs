use rusqlite::{params, Transaction};

use super::map_row;
use crate::error::{CoreError, CoreResult};
use crate::model::record::{EntityKind, Record, SyncMeta};

/// An in-flight write transaction. Exists only inside `LocalStore::write`'s
/// closure; all mutation operations on the store funnel through this type
/// so a single panic-free commit/rollback path covers every caller.
pub struct WriteTxn<'conn> {
    pub(super) tx: Transaction<'conn>,
}

impl<'conn> WriteTxn<'conn> {
    pub fn get(&self, kind: EntityKind, id: &str) -> CoreResult<Option<Record>> {
        use rusqlite::OptionalExtension;
        let result = self
            .tx
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

    pub fn create(
        &mut self,
        kind: EntityKind,
        id: &str,
        organization_id: &str,
        updated_at: i64,
        payload: serde_json::Value,
    ) -> CoreResult<Record> {
        let payload_str = serde_json::to_string(&payload)?;
        self.tx.execute(
            "INSERT INTO records
                (entity_kind, id, organization_id, updated_at, payload, is_synced, sync_pending, server_version, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, NULL, 0)
             ON CONFLICT(entity_kind, id) DO UPDATE SET
                organization_id = excluded.organization_id,
                updated_at = excluded.updated_at,
                payload = excluded.payload,
                sync_pending = 1,
                deleted = 0",
            params![kind.as_str(), id, organization_id, updated_at, payload_str],
        )?;
        Ok(Record {
            id: id.to_string(),
            entity_kind: kind,
            organization_id: organization_id.to_string(),
            updated_at,
            payload,
            sync_meta: SyncMeta::default(),
            deleted: false,
        })
    }

    pub fn update(
        &mut self,
        kind: EntityKind,
        id: &str,
        mutator: impl FnOnce(&mut Record),
    ) -> CoreResult<Record> {
        let mut record = self
            .get(kind, id)?
            .ok_or_else(|| CoreError::Validation(format!("record not found: {}/{id}", kind.as_str())))?;
        mutator(&mut record);
        let payload_str = serde_json::to_string(&record.payload)?;
        self.tx.execute(
            "UPDATE records SET
                organization_id = ?3,
                updated_at = ?4,
                payload = ?5,
                is_synced = ?6,
                sync_pending = ?7,
                server_version = ?8,
                deleted = ?9
             WHERE entity_kind = ?1 AND id = ?2",
            params![
                kind.as_str(),
                id,
                record.organization_id,
                record.updated_at,
                payload_str,
                record.sync_meta.is_synced as i64,
                record.sync_meta.sync_pending as i64,
                record.sync_meta.server_version,
                record.deleted as i64,
            ],
        )?;
        Ok(record)
    }

    pub fn mark_deleted(&mut self, kind: EntityKind, id: &str) -> CoreResult<()> {
        let changed = self.tx.execute(
            "UPDATE records SET deleted = 1, sync_pending = 1 WHERE entity_kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        if changed == 0 {
            return Err(CoreError::Validation(format!(
                "record not found: {}/{id}",
                kind.as_str()
            )));
        }
        Ok(())
    }

    pub fn put_blob(&mut self, key: &str, value: &str) -> CoreResult<()> {
        self.tx.execute(
            "INSERT INTO kv_blobs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
