use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use chrono_tz::Tz;
use streamctl_scheduler::TimezoneResolver;

use crate::error::{ClusterError, Result};
use crate::types::{Cluster, ClusterParams, Diagnostic, Organization, Snapshot};

fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ClusterError::InvalidTimestamp(s.to_string()))
}

// ---- organizations ----

pub fn create_organization(conn: &Connection, name: &str, timezone: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO organizations (name, timezone, created_at) VALUES (?1, ?2, ?3)",
        params![name, timezone, fmt_ts(Utc::now())],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_organization(conn: &Connection, id: i64) -> Result<Organization> {
    conn.query_row(
        "SELECT id, name, timezone, created_at FROM organizations WHERE id = ?1",
        [id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    )
    .optional()?
    .ok_or(ClusterError::OrganizationNotFound { id })
    .and_then(|(id, name, timezone, created_at)| {
        Ok(Organization {
            id,
            name,
            timezone,
            created_at: parse_ts(&created_at)?,
        })
    })
}

/// Timezone lookup backed by the `organizations` table.
///
/// Lookup failures fall back to UTC rather than failing the scheduling
/// operation: a bad or missing timezone must not wedge a cron task.
pub struct OrgTimezoneResolver;

impl TimezoneResolver for OrgTimezoneResolver {
    fn resolve(&self, conn: &Connection, org_id: Option<i64>) -> Tz {
        let Some(org_id) = org_id else {
            return chrono_tz::UTC;
        };
        let tz: Option<String> = conn
            .query_row(
                "SELECT timezone FROM organizations WHERE id = ?1",
                [org_id],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!(org_id, error = %e, "timezone lookup failed, using UTC");
                None
            });
        match tz {
            Some(name) => name.parse().unwrap_or_else(|_| {
                warn!(org_id, timezone = %name, "unknown timezone, using UTC");
                chrono_tz::UTC
            }),
            None => {
                warn!(org_id, "organization not found, using UTC");
                chrono_tz::UTC
            }
        }
    }
}

// ---- clusters ----

pub fn create_cluster(conn: &Connection, params: &ClusterParams) -> Result<i64> {
    conn.execute(
        "INSERT INTO clusters (org_id, name, version, host, meta_port, http_port, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            params.org_id,
            params.name,
            params.version,
            params.host,
            params.meta_port,
            params.http_port,
            fmt_ts(Utc::now())
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

struct ClusterRow {
    id: i64,
    org_id: i64,
    name: String,
    version: String,
    host: String,
    meta_port: u16,
    http_port: u16,
    created_at: String,
}

impl ClusterRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            org_id: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            host: row.get(4)?,
            meta_port: row.get(5)?,
            http_port: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Cluster> {
        Ok(Cluster {
            id: self.id,
            org_id: self.org_id,
            name: self.name,
            version: self.version,
            host: self.host,
            meta_port: self.meta_port,
            http_port: self.http_port,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub fn get_cluster(conn: &Connection, id: i64) -> Result<Cluster> {
    conn.query_row(
        "SELECT id, org_id, name, version, host, meta_port, http_port, created_at
         FROM clusters WHERE id = ?1",
        [id],
        ClusterRow::read,
    )
    .optional()?
    .ok_or(ClusterError::ClusterNotFound { id })?
    .decode()
}

/// Tenant-scoped cluster lookup: a cluster owned by another org is
/// indistinguishable from a missing one.
pub fn get_org_cluster(conn: &Connection, id: i64, org_id: i64) -> Result<Cluster> {
    conn.query_row(
        "SELECT id, org_id, name, version, host, meta_port, http_port, created_at
         FROM clusters WHERE id = ?1 AND org_id = ?2",
        params![id, org_id],
        ClusterRow::read,
    )
    .optional()?
    .ok_or(ClusterError::ClusterNotFound { id })?
    .decode()
}

// ---- snapshots ----

pub fn create_snapshot(conn: &Connection, cluster_id: i64, snapshot_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO snapshots (cluster_id, snapshot_id, created_at) VALUES (?1, ?2, ?3)",
        params![cluster_id, snapshot_id, fmt_ts(Utc::now())],
    )?;
    Ok(())
}

pub fn list_snapshots(conn: &Connection, cluster_id: i64) -> Result<Vec<Snapshot>> {
    let mut stmt = conn.prepare(
        "SELECT cluster_id, snapshot_id, created_at FROM snapshots
         WHERE cluster_id = ?1 ORDER BY snapshot_id ASC",
    )?;
    let rows = stmt.query_map([cluster_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    rows.map(|r| {
        let (cluster_id, snapshot_id, created_at) = r?;
        Ok(Snapshot {
            cluster_id,
            snapshot_id,
            created_at: parse_ts(&created_at)?,
        })
    })
    .collect()
}

/// Returns whether a row was actually deleted. Cleanup callers treat
/// `false` as already-done.
pub fn delete_snapshot(conn: &Connection, cluster_id: i64, snapshot_id: i64) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM snapshots WHERE cluster_id = ?1 AND snapshot_id = ?2",
        params![cluster_id, snapshot_id],
    )?;
    Ok(affected > 0)
}

// ---- diagnostics ----

pub fn create_diagnostic(conn: &Connection, cluster_id: i64, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO diagnostics (cluster_id, content, created_at) VALUES (?1, ?2, ?3)",
        params![cluster_id, content, fmt_ts(Utc::now())],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_diagnostic(conn: &Connection, id: i64) -> Result<Option<Diagnostic>> {
    let found = conn
        .query_row(
            "SELECT id, cluster_id, content, created_at FROM diagnostics WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    found
        .map(|(id, cluster_id, content, created_at)| {
            Ok(Diagnostic {
                id,
                cluster_id,
                content,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
}

pub fn delete_diagnostic(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM diagnostics WHERE id = ?1", [id])?;
    Ok(affected > 0)
}

// ---- opaque keys ----

pub fn create_opaque_key(conn: &Connection, secret: &[u8]) -> Result<i64> {
    conn.execute(
        "INSERT INTO opaque_keys (secret, created_at) VALUES (?1, ?2)",
        params![secret, fmt_ts(Utc::now())],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_opaque_key(conn: &Connection, id: i64) -> Result<Vec<u8>> {
    conn.query_row("SELECT secret FROM opaque_keys WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or(ClusterError::KeyNotFound { id })
}

pub fn delete_opaque_key(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM opaque_keys WHERE id = ?1", [id])?;
    Ok(affected > 0)
}

// ---- per-cluster job config rows ----

/// Link row between a cluster and the cronjob task that implements its
/// periodic backup or diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConfigRow {
    pub task_id: i64,
    pub enabled: bool,
}

fn get_job_config(conn: &Connection, table: &str, cluster_id: i64) -> Result<Option<JobConfigRow>> {
    let found = conn
        .query_row(
            &format!("SELECT task_id, enabled FROM {table} WHERE cluster_id = ?1"),
            [cluster_id],
            |row| {
                Ok(JobConfigRow {
                    task_id: row.get(0)?,
                    enabled: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

fn insert_job_config(
    conn: &Connection,
    table: &str,
    cluster_id: i64,
    task_id: i64,
    enabled: bool,
) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO {table} (cluster_id, task_id, enabled) VALUES (?1, ?2, ?3)"),
        params![cluster_id, task_id, enabled],
    )?;
    Ok(())
}

fn set_job_config_enabled(
    conn: &Connection,
    table: &str,
    cluster_id: i64,
    enabled: bool,
) -> Result<()> {
    conn.execute(
        &format!("UPDATE {table} SET enabled = ?2 WHERE cluster_id = ?1"),
        params![cluster_id, enabled],
    )?;
    Ok(())
}

pub fn get_auto_backup_config(conn: &Connection, cluster_id: i64) -> Result<Option<JobConfigRow>> {
    get_job_config(conn, "auto_backup_configs", cluster_id)
}

pub fn insert_auto_backup_config(
    conn: &Connection,
    cluster_id: i64,
    task_id: i64,
    enabled: bool,
) -> Result<()> {
    insert_job_config(conn, "auto_backup_configs", cluster_id, task_id, enabled)
}

pub fn set_auto_backup_enabled(conn: &Connection, cluster_id: i64, enabled: bool) -> Result<()> {
    set_job_config_enabled(conn, "auto_backup_configs", cluster_id, enabled)
}

pub fn get_auto_diagnostic_config(
    conn: &Connection,
    cluster_id: i64,
) -> Result<Option<JobConfigRow>> {
    get_job_config(conn, "auto_diagnostic_configs", cluster_id)
}

pub fn insert_auto_diagnostic_config(
    conn: &Connection,
    cluster_id: i64,
    task_id: i64,
    enabled: bool,
) -> Result<()> {
    insert_job_config(conn, "auto_diagnostic_configs", cluster_id, task_id, enabled)
}

pub fn set_auto_diagnostic_enabled(conn: &Connection, cluster_id: i64, enabled: bool) -> Result<()> {
    set_job_config_enabled(conn, "auto_diagnostic_configs", cluster_id, enabled)
}
