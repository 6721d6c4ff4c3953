//! Pre/post execution hooks driven by task attributes.
//!
//! All functions here run inside the worker's claim transaction, so the
//! schedule advance, the failure event and the status transition commit
//! atomically with the claim itself.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use streamctl_core::parse_duration;

use crate::cron::{CronSchedule, TimezoneResolver};
use crate::error::{Result, SchedulerError};
use crate::store;
use crate::types::{TaskRow, TaskStatus};

/// Pre-hook: for a cronjob, persist the *next* fire time before the task
/// body runs. If the process dies mid-execution the following occurrence
/// is already durable, so a recurring job cannot silently stop firing.
/// Non-cronjob tasks are a no-op.
pub fn handle_attributes(
    conn: &Connection,
    timezones: &dyn TimezoneResolver,
    now: DateTime<Utc>,
    task: &TaskRow,
) -> Result<()> {
    let Some(cronjob) = &task.attributes.cronjob else {
        return Ok(());
    };

    let schedule = CronSchedule::parse(&cronjob.cron_expression)?;
    let zone = timezones.resolve(conn, task.attributes.org_id);
    let next = schedule
        .next_after(now, zone)
        .ok_or_else(|| SchedulerError::NoUpcomingFire {
            expression: cronjob.cron_expression.clone(),
        })?;
    store::update_task_started_at(conn, task.id, next)?;
    info!(task_id = task.id, next = %next, tz = %zone, "cronjob advanced before execution");
    Ok(())
}

/// Post-hook on success. A cronjob stays `pending` for the fire time the
/// pre-hook already scheduled; a one-shot task terminates `completed`.
pub fn handle_completed(conn: &Connection, task: &TaskRow) -> Result<()> {
    if task.is_cronjob() {
        return Ok(());
    }
    store::update_task_status(conn, task.id, TaskStatus::Completed)
}

/// Post-hook on failure. The event is recorded unconditionally; then:
/// cronjobs keep their status (the next run is already scheduled), a
/// one-shot task with an always-retry policy is rescheduled to
/// now + interval, and anything else terminates `failed`.
pub fn handle_failed(
    conn: &Connection,
    now: DateTime<Utc>,
    task: &TaskRow,
    error: &str,
) -> Result<()> {
    store::insert_event(conn, task.id, error, now)?;

    if task.is_cronjob() {
        return Ok(());
    }

    if let Some(policy) = &task.attributes.retry_policy {
        if policy.always_retry_on_failure {
            let interval = parse_duration(&policy.interval)?;
            let next = now + Duration::seconds(interval.as_secs() as i64);
            store::update_task_started_at(conn, task.id, next)?;
            warn!(
                task_id = task.id,
                retry_at = %next,
                "task failed, rescheduled per retry policy"
            );
            return Ok(());
        }
    }

    store::update_task_status(conn, task.id, TaskStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::UtcResolver;
    use crate::store::{
        claim_due_task, create_cron_job, get_task, list_task_events, push_task, CronJobParams,
        TaskOptions,
    };
    use crate::types::TaskSpec;
    use chrono::TimeZone;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        conn
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn spec() -> TaskSpec {
        TaskSpec::DeleteSnapshot {
            cluster_id: 1,
            snapshot_id: 2,
        }
    }

    fn claimed(conn: &Connection, now: DateTime<Utc>) -> crate::types::TaskRow {
        claim_due_task(conn, now).unwrap().unwrap()
    }

    #[test]
    fn attributes_hook_advances_cronjob_schedule() {
        let conn = test_conn();
        let created = utc(2025, 3, 30, 23, 30, 0);
        let id = create_cron_job(
            &conn,
            &UtcResolver,
            created,
            CronJobParams {
                org_id: None,
                timeout: None,
                cron_expression: "0 0 * * *".into(),
                spec: spec(),
            },
        )
        .unwrap();

        // due at 2025-03-31T00:00:00; claim just after
        let now = utc(2025, 3, 31, 0, 0, 5);
        let task = claimed(&conn, now);
        assert_eq!(task.id, id);

        handle_attributes(&conn, &UtcResolver, now, &task).unwrap();
        let stored = get_task(&conn, id).unwrap();
        assert_eq!(stored.started_at, Some(utc(2025, 4, 1, 0, 0, 0)));
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[test]
    fn attributes_hook_ignores_one_shot_tasks() {
        let conn = test_conn();
        let at = utc(2025, 3, 1, 0, 0, 0);
        let id = push_task(&conn, &spec(), TaskOptions::new().started_at(at)).unwrap();
        let now = utc(2025, 3, 1, 0, 1, 0);
        let task = claimed(&conn, now);

        handle_attributes(&conn, &UtcResolver, now, &task).unwrap();
        assert_eq!(get_task(&conn, id).unwrap().started_at, Some(at));
    }

    #[test]
    fn completed_terminates_one_shot_but_not_cronjob() {
        let conn = test_conn();
        let now = utc(2025, 3, 1, 0, 1, 0);
        let one_shot = push_task(
            &conn,
            &spec(),
            TaskOptions::new().started_at(utc(2025, 3, 1, 0, 0, 0)),
        )
        .unwrap();
        let task = claimed(&conn, now);
        handle_completed(&conn, &task).unwrap();
        assert_eq!(
            get_task(&conn, one_shot).unwrap().status,
            TaskStatus::Completed
        );

        let cron = create_cron_job(
            &conn,
            &UtcResolver,
            utc(2025, 3, 1, 0, 0, 0),
            CronJobParams {
                org_id: None,
                timeout: None,
                cron_expression: "0 0 * * *".into(),
                spec: spec(),
            },
        )
        .unwrap();
        let task = claimed(&conn, utc(2025, 3, 2, 0, 0, 5));
        assert_eq!(task.id, cron);
        handle_completed(&conn, &task).unwrap();
        assert_eq!(get_task(&conn, cron).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn failed_one_shot_without_retry_terminates_failed() {
        let conn = test_conn();
        let at = utc(2025, 3, 1, 0, 0, 0);
        let id = push_task(&conn, &spec(), TaskOptions::new().started_at(at)).unwrap();
        let now = utc(2025, 3, 1, 0, 1, 0);
        let task = claimed(&conn, now);

        handle_failed(&conn, now, &task, "boom").unwrap();

        let stored = get_task(&conn, id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        // startedAt unchanged
        assert_eq!(stored.started_at, Some(at));
        let events = list_task_events(&conn, id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, "boom");
    }

    #[test]
    fn failed_one_shot_with_retry_reschedules_instead() {
        let conn = test_conn();
        let id = push_task(
            &conn,
            &spec(),
            TaskOptions::new()
                .started_at(utc(2025, 3, 1, 0, 0, 0))
                .always_retry_on_failure("30m"),
        )
        .unwrap();
        let now = utc(2025, 3, 1, 0, 1, 0);
        let task = claimed(&conn, now);

        handle_failed(&conn, now, &task, "transient").unwrap();

        let stored = get_task(&conn, id).unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.started_at, Some(utc(2025, 3, 1, 0, 31, 0)));
        assert_eq!(list_task_events(&conn, id).unwrap().len(), 1);
    }

    #[test]
    fn failed_cronjob_keeps_status_and_advanced_schedule() {
        let conn = test_conn();
        let id = create_cron_job(
            &conn,
            &UtcResolver,
            utc(2025, 3, 1, 0, 0, 0),
            CronJobParams {
                org_id: None,
                timeout: None,
                cron_expression: "0 0 * * *".into(),
                spec: spec(),
            },
        )
        .unwrap();

        let now = utc(2025, 3, 2, 0, 0, 5);
        let task = claimed(&conn, now);
        handle_attributes(&conn, &UtcResolver, now, &task).unwrap();
        handle_failed(&conn, now, &task, "backup failed").unwrap();

        let stored = get_task(&conn, id).unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        // startedAt is the fire time advanced *before* the failing run
        assert_eq!(stored.started_at, Some(utc(2025, 3, 3, 0, 0, 0)));
        assert_eq!(list_task_events(&conn, id).unwrap().len(), 1);
    }
}
