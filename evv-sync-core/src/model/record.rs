use serde::{Deserialize, Serialize};

/// Entity kinds persisted by the Local Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Visit,
    TimeEntry,
    EvvRecord,
    Attachment,
    Note,
    Geofence,
    Template,
    Notification,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Visit => "visit",
            EntityKind::TimeEntry => "time-entry",
            EntityKind::EvvRecord => "evv-record",
            EntityKind::Attachment => "attachment",
            EntityKind::Note => "note",
            EntityKind::Geofence => "geofence",
            EntityKind::Template => "template",
            EntityKind::Notification => "notification",
        }
    }
}

/// Sync metadata carried by every persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub is_synced: bool,
    pub sync_pending: bool,
    pub server_version: Option<String>,
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self {
            is_synced: false,
            sync_pending: true,
            server_version: None,
        }
    }
}

/// A persisted entity. `payload` is kind-specific JSON; this generic
/// envelope is what flows through the conflict resolver and the
/// optimistic-update journal, which stay kind-agnostic at the type level
/// by carrying a tagged variant rather than an untyped blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub entity_kind: EntityKind,
    pub organization_id: String,
    pub updated_at: i64,
    pub payload: serde_json::Value,
    pub sync_meta: SyncMeta,
    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        entity_kind: EntityKind,
        organization_id: impl Into<String>,
        updated_at: i64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            entity_kind,
            organization_id: organization_id.into(),
            updated_at,
            payload,
            sync_meta: SyncMeta::default(),
            deleted: false,
        }
    }

    /// Field names differing between two payloads, excluding identity and
    /// timestamp fields (`id`, `createdAt`, `updatedAt`) that are never
    /// meaningful conflict targets.
    pub fn differing_fields(&self, other: &Record) -> Vec<String> {
        let excluded = ["id", "createdAt", "updatedAt"];
        let (Some(a), Some(b)) = (self.payload.as_object(), other.payload.as_object()) else {
            return Vec::new();
        };
        let mut keys: std::collections::BTreeSet<&String> = a.keys().collect();
        keys.extend(b.keys());
        keys.into_iter()
            .filter(|k| !excluded.contains(&k.as_str()))
            .filter(|k| a.get(*k) != b.get(*k))
            .cloned()
            .collect()
    }
}
