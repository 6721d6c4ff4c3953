use rusqlite::Connection;

use crate::error::Result;

/// Creates the cluster-plane tables. Idempotent; runs at startup after
/// the scheduler schema.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS organizations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            timezone    TEXT NOT NULL DEFAULT 'UTC',
            created_at  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS clusters (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id      INTEGER NOT NULL REFERENCES organizations(id),
            name        TEXT NOT NULL,
            version     TEXT NOT NULL,
            host        TEXT NOT NULL,
            meta_port   INTEGER NOT NULL,
            http_port   INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS snapshots (
            cluster_id  INTEGER NOT NULL REFERENCES clusters(id),
            snapshot_id INTEGER NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (cluster_id, snapshot_id)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS diagnostics (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            cluster_id  INTEGER NOT NULL REFERENCES clusters(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_diagnostics_cluster
            ON diagnostics (cluster_id);

        CREATE TABLE IF NOT EXISTS opaque_keys (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            secret      BLOB NOT NULL,
            created_at  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS auto_backup_configs (
            cluster_id  INTEGER PRIMARY KEY REFERENCES clusters(id),
            task_id     INTEGER NOT NULL,
            enabled     INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS auto_diagnostic_configs (
            cluster_id  INTEGER PRIMARY KEY REFERENCES clusters(id),
            task_id     INTEGER NOT NULL,
            enabled     INTEGER NOT NULL
        ) STRICT;",
    )?;
    Ok(())
}
