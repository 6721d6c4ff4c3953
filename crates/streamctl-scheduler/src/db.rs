use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `tasks` and `events` tables (idempotent) and an index on
/// `(status, started_at)` so the claim query stays cheap as the table grows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id      INTEGER,            -- NULL means system-level
            spec        TEXT    NOT NULL,   -- JSON-encoded TaskSpec
            attributes  TEXT    NOT NULL,   -- JSON-encoded TaskAttributes
            status      TEXT    NOT NULL DEFAULT 'pending',
            started_at  TEXT,               -- RFC 3339 next-eligible instant
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        -- Claim query: WHERE status = 'pending' AND started_at <= now
        CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks (status, started_at);

        CREATE TABLE IF NOT EXISTS events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id     INTEGER NOT NULL,
            error       TEXT    NOT NULL,
            created_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_events_task ON events (task_id);
        ",
    )?;
    Ok(())
}
