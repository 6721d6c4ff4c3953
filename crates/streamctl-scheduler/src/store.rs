use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use streamctl_core::parse_duration;

use crate::cron::{CronSchedule, TimezoneResolver};
use crate::error::{Result, SchedulerError};
use crate::types::{
    Cronjob, Event, RetryPolicy, Task, TaskAttributes, TaskRow, TaskSpec, TaskStatus,
};

// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
pub(crate) fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SchedulerError::InvalidTimestamp(s.to_string()))
}

/// Composable submission options for [`push_task`].
///
/// Setters apply in call order; a later call overwrites an earlier
/// conflicting one. The retry interval is only validated inside
/// `push_task`, failing the whole call before anything persists.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    org_id: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    retry_interval: Option<String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the owning tenant.
    pub fn org_id(mut self, org_id: i64) -> Self {
        self.org_id = Some(org_id);
        self
    }

    /// Eligibility time. Default: immediately eligible.
    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// On failure, reschedule to now + `interval` instead of terminating.
    pub fn always_retry_on_failure(mut self, interval: &str) -> Self {
        self.retry_interval = Some(interval.to_string());
        self
    }
}

/// Parameters shared by [`create_cron_job`] and [`update_cron_job`].
#[derive(Debug, Clone)]
pub struct CronJobParams {
    pub org_id: Option<i64>,
    /// Optional advisory timeout, validated as a duration string.
    pub timeout: Option<String>,
    /// 5-field cron expression.
    pub cron_expression: String,
    pub spec: TaskSpec,
}

// ---------------------------------------------------------------------------
// Free functions over &Connection — these compose with the worker's claim
// transaction (rusqlite's Transaction derefs to Connection), which is how
// executors chain follow-up tasks atomically with their own effects.
// ---------------------------------------------------------------------------

/// Persist a one-shot task built from `spec` plus options. Returns its id.
pub fn push_task(conn: &Connection, spec: &TaskSpec, opts: TaskOptions) -> Result<i64> {
    let mut attributes = TaskAttributes {
        org_id: opts.org_id,
        ..Default::default()
    };
    if let Some(interval) = opts.retry_interval {
        parse_duration(&interval)?;
        attributes.retry_policy = Some(RetryPolicy {
            always_retry_on_failure: true,
            interval,
        });
    }
    let started_at = opts.started_at.unwrap_or_else(Utc::now);

    let id = insert_task(conn, &attributes, spec, started_at)?;
    info!(task_id = id, kind = spec.kind(), "task pushed");
    Ok(id)
}

/// Persist a recurring task. The first `started_at` is the next fire time
/// after `now` in the tenant's timezone. Validation failures leave the
/// store untouched.
pub fn create_cron_job(
    conn: &Connection,
    tz: &dyn TimezoneResolver,
    now: DateTime<Utc>,
    params: CronJobParams,
) -> Result<i64> {
    let (attributes, first_fire) = validate_cron_params(conn, tz, now, &params)?;
    let id = insert_task(conn, &attributes, &params.spec, first_fire)?;
    info!(
        task_id = id,
        kind = params.spec.kind(),
        cron = %params.cron_expression,
        first_fire = %first_fire,
        "cron job created"
    );
    Ok(id)
}

/// Replace a cronjob's attributes and spec, recomputing `started_at` from
/// `now`. Status is left untouched.
pub fn update_cron_job(
    conn: &Connection,
    tz: &dyn TimezoneResolver,
    now: DateTime<Utc>,
    task_id: i64,
    params: CronJobParams,
) -> Result<()> {
    let (attributes, next_fire) = validate_cron_params(conn, tz, now, &params)?;
    let spec_json = serde_json::to_string(&params.spec)?;
    let attr_json = serde_json::to_string(&attributes)?;

    let affected = conn.execute(
        "UPDATE tasks SET org_id = ?1, spec = ?2, attributes = ?3,
            started_at = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            attributes.org_id,
            spec_json,
            attr_json,
            fmt_ts(next_fire),
            fmt_ts(Utc::now()),
            task_id
        ],
    )?;
    if affected == 0 {
        return Err(SchedulerError::TaskNotFound { id: task_id });
    }
    info!(task_id, cron = %params.cron_expression, next_fire = %next_fire, "cron job updated");
    Ok(())
}

/// Suspend a cronjob. A paused task is never claimed; spec and
/// `started_at` are untouched.
pub fn pause_cron_job(conn: &Connection, task_id: i64) -> Result<()> {
    update_task_status(conn, task_id, TaskStatus::Paused)
}

/// Re-enable a paused cronjob.
pub fn resume_cron_job(conn: &Connection, task_id: i64) -> Result<()> {
    update_task_status(conn, task_id, TaskStatus::Pending)
}

pub fn update_task_status(conn: &Connection, task_id: i64, status: TaskStatus) -> Result<()> {
    let affected = conn.execute(
        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.to_string(), fmt_ts(Utc::now()), task_id],
    )?;
    if affected == 0 {
        return Err(SchedulerError::TaskNotFound { id: task_id });
    }
    Ok(())
}

pub fn update_task_started_at(
    conn: &Connection,
    task_id: i64,
    started_at: DateTime<Utc>,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE tasks SET started_at = ?1, updated_at = ?2 WHERE id = ?3",
        params![fmt_ts(started_at), fmt_ts(Utc::now()), task_id],
    )?;
    if affected == 0 {
        return Err(SchedulerError::TaskNotFound { id: task_id });
    }
    Ok(())
}

/// Fetch one task, fully decoded.
pub fn get_task(conn: &Connection, task_id: i64) -> Result<Task> {
    let row = conn
        .query_row(
            "SELECT id, org_id, spec, attributes, status, started_at, created_at, updated_at
             FROM tasks WHERE id = ?1",
            [task_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?
        .ok_or(SchedulerError::TaskNotFound { id: task_id })?;

    let (id, org_id, spec_json, attr_json, status, started_at, created_at, updated_at) = row;
    Ok(Task {
        id,
        org_id,
        spec: serde_json::from_str(&spec_json)?,
        attributes: serde_json::from_str(&attr_json)?,
        status: status.parse().map_err(SchedulerError::InvalidStatus)?,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Select the single most overdue eligible task: `pending`, `started_at`
/// arrived, smallest `started_at` first. Callers run this inside an
/// immediate-mode transaction so no other worker can claim the same row.
pub fn claim_due_task(conn: &Connection, now: DateTime<Utc>) -> Result<Option<TaskRow>> {
    let row = conn
        .query_row(
            "SELECT id, org_id, spec, attributes, status, started_at
             FROM tasks
             WHERE status = 'pending' AND started_at IS NOT NULL AND started_at <= ?1
             ORDER BY started_at ASC
             LIMIT 1",
            [fmt_ts(now)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, org_id, spec_json, attr_json, status, started_at)) = row else {
        return Ok(None);
    };
    Ok(Some(TaskRow {
        id,
        org_id,
        spec_json,
        attributes: serde_json::from_str(&attr_json)?,
        status: status.parse().map_err(SchedulerError::InvalidStatus)?,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
    }))
}

/// Append a failure event. Events are immutable once written.
pub fn insert_event(
    conn: &Connection,
    task_id: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (task_id, error, created_at) VALUES (?1, ?2, ?3)",
        params![task_id, error, fmt_ts(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All failure events for a task, oldest first.
pub fn list_task_events(conn: &Connection, task_id: i64) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, error, created_at FROM events
         WHERE task_id = ?1 ORDER BY id ASC",
    )?;
    let rows: Vec<(i64, i64, String, String)> = stmt
        .query_map([task_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<_, _>>()?;

    rows.into_iter()
        .map(|(id, task_id, error, created_at)| {
            Ok(Event {
                id,
                task_id,
                error,
                created_at: parse_ts(&created_at)?,
            })
        })
        .collect()
}

fn validate_cron_params(
    conn: &Connection,
    tz: &dyn TimezoneResolver,
    now: DateTime<Utc>,
    params: &CronJobParams,
) -> Result<(TaskAttributes, DateTime<Utc>)> {
    let schedule = CronSchedule::parse(&params.cron_expression)?;
    if let Some(timeout) = &params.timeout {
        parse_duration(timeout)?;
    }
    let zone = tz.resolve(conn, params.org_id);
    let next = schedule
        .next_after(now, zone)
        .ok_or_else(|| SchedulerError::NoUpcomingFire {
            expression: params.cron_expression.clone(),
        })?;
    let attributes = TaskAttributes {
        org_id: params.org_id,
        cronjob: Some(Cronjob {
            cron_expression: params.cron_expression.clone(),
        }),
        timeout: params.timeout.clone(),
        retry_policy: None,
    };
    Ok((attributes, next))
}

fn insert_task(
    conn: &Connection,
    attributes: &TaskAttributes,
    spec: &TaskSpec,
    started_at: DateTime<Utc>,
) -> Result<i64> {
    let spec_json = serde_json::to_string(spec)?;
    let attr_json = serde_json::to_string(attributes)?;
    let now = fmt_ts(Utc::now());
    conn.execute(
        "INSERT INTO tasks (org_id, spec, attributes, status, started_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
        params![
            attributes.org_id,
            spec_json,
            attr_json,
            fmt_ts(started_at),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Shared-handle wrapper for host callers outside the worker transaction.
// ---------------------------------------------------------------------------

/// Task creation API over a shared connection, for HTTP handlers, init
/// routines and other subsystems.
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
    timezones: Arc<dyn TimezoneResolver>,
}

impl TaskStore {
    pub fn new(conn: Arc<Mutex<Connection>>, timezones: Arc<dyn TimezoneResolver>) -> Self {
        Self { conn, timezones }
    }

    pub fn push_task(&self, spec: &TaskSpec, opts: TaskOptions) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        push_task(&conn, spec, opts)
    }

    pub fn create_cron_job(&self, params: CronJobParams) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        create_cron_job(&conn, &*self.timezones, Utc::now(), params)
    }

    pub fn update_cron_job(&self, task_id: i64, params: CronJobParams) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        update_cron_job(&conn, &*self.timezones, Utc::now(), task_id, params)
    }

    pub fn pause_cron_job(&self, task_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        pause_cron_job(&conn, task_id)
    }

    pub fn resume_cron_job(&self, task_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        resume_cron_job(&conn, task_id)
    }

    pub fn get_task(&self, task_id: i64) -> Result<Task> {
        let conn = self.conn.lock().unwrap();
        get_task(&conn, task_id)
    }

    pub fn list_task_events(&self, task_id: i64) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        list_task_events(&conn, task_id)
    }
}
