//! Schema and migrations for the SQLite-backed Local Store. One table
//! holds every entity kind, keyed by (kind, id); a side table holds
//! opaque blobs for the queue and optimistic-update journal. Migrations
//! are ordered plain DDL rather than macros or an ORM layer, so the
//! history stays readable as a flat list.

use rusqlite::Connection;

pub struct Migration {
    pub to_version: i32,
    pub steps: &'static [&'static str],
}

/// Ordered migrations. Each step is plain DDL; a migration declares the
/// version it moves the schema to.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        to_version: 1,
        steps: &[
            "CREATE TABLE IF NOT EXISTS records (
                entity_kind TEXT NOT NULL,
                id TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                payload TEXT NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                sync_pending INTEGER NOT NULL DEFAULT 1,
                server_version TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (entity_kind, id)
            )",
            // Indexed to support sync-since-cursor queries.
            "CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(entity_kind, updated_at)",
            "CREATE INDEX IF NOT EXISTS idx_records_org ON records(organization_id)",
            "CREATE TABLE IF NOT EXISTS kv_blobs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    },
    Migration {
        to_version: 2,
        steps: &["CREATE INDEX IF NOT EXISTS idx_records_deleted ON records(entity_kind, deleted)"],
    },
];

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    )?;
    let current: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .unwrap_or(0);

    let mut version = current;
    for migration in MIGRATIONS {
        if migration.to_version <= current {
            continue;
        }
        for step in migration.steps {
            conn.execute_batch(step)?;
        }
        version = migration.to_version;
    }
    if version != current {
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }
    Ok(())
}
