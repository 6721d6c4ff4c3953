//! Per-cluster periodic job configuration.
//!
//! Each cluster carries at most one auto-backup and one auto-diagnostic
//! cronjob. A config row remembers the task id so an update replaces the
//! existing job instead of stacking a second one, and enable/disable maps
//! onto pause/resume so the schedule survives a disable round-trip.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use streamctl_scheduler::store::{
    create_cron_job, get_task, pause_cron_job, resume_cron_job, update_cron_job, CronJobParams,
};
use streamctl_scheduler::{Task, TaskSpec};

use crate::error::Result;
use crate::store::{
    self, get_auto_backup_config, get_auto_diagnostic_config, insert_auto_backup_config,
    insert_auto_diagnostic_config, set_auto_backup_enabled, set_auto_diagnostic_enabled,
    JobConfigRow, OrgTimezoneResolver,
};
use crate::types::{AutoBackupConfig, AutoDiagnosticConfig};

/// Diagnostics dumps can be slow on a loaded cluster; give the cronjob a
/// generous advisory timeout.
const DIAGNOSTIC_TASK_TIMEOUT: &str = "30m";

pub struct ClusterConfigService {
    conn: Arc<Mutex<Connection>>,
}

impl ClusterConfigService {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn set_auto_backup_config(
        &self,
        cluster_id: i64,
        org_id: i64,
        config: &AutoBackupConfig,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let cluster = store::get_org_cluster(&tx, cluster_id, org_id)?;
        let spec = TaskSpec::AutoBackup {
            cluster_id: cluster.id,
            retention_duration: config.retention_duration.clone(),
        };
        let params = CronJobParams {
            org_id: Some(org_id),
            timeout: None,
            cron_expression: config.cron_expression.clone(),
            spec,
        };

        match get_auto_backup_config(&tx, cluster.id)? {
            None => {
                let task_id = create_cron_job(&tx, &OrgTimezoneResolver, Utc::now(), params)?;
                insert_auto_backup_config(&tx, cluster.id, task_id, config.enabled)?;
                if !config.enabled {
                    pause_cron_job(&tx, task_id)?;
                }
                info!(cluster_id = cluster.id, task_id, "auto backup configured");
            }
            Some(row) => {
                apply_job_toggle(&tx, &row, config.enabled)?;
                set_auto_backup_enabled(&tx, cluster.id, config.enabled)?;
                update_cron_job(&tx, &OrgTimezoneResolver, Utc::now(), row.task_id, params)?;
                info!(
                    cluster_id = cluster.id,
                    task_id = row.task_id,
                    enabled = config.enabled,
                    "auto backup config updated"
                );
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_auto_backup_config(&self, cluster_id: i64, org_id: i64) -> Result<AutoBackupConfig> {
        let conn = self.conn.lock().unwrap();
        let cluster = store::get_org_cluster(&conn, cluster_id, org_id)?;
        let Some(row) = get_auto_backup_config(&conn, cluster.id)? else {
            return Ok(AutoBackupConfig {
                enabled: false,
                cron_expression: String::new(),
                retention_duration: String::new(),
            });
        };
        let task = get_task(&conn, row.task_id)?;
        let retention = match &task.spec {
            TaskSpec::AutoBackup {
                retention_duration, ..
            } => retention_duration.clone(),
            _ => String::new(),
        };
        Ok(AutoBackupConfig {
            enabled: row.enabled,
            cron_expression: cron_expression_of(&task),
            retention_duration: retention,
        })
    }

    pub fn set_auto_diagnostic_config(
        &self,
        cluster_id: i64,
        org_id: i64,
        config: &AutoDiagnosticConfig,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let cluster = store::get_org_cluster(&tx, cluster_id, org_id)?;
        let spec = TaskSpec::AutoDiagnostic {
            cluster_id: cluster.id,
            retention_duration: config.retention_duration.clone(),
        };
        let params = CronJobParams {
            org_id: Some(org_id),
            timeout: Some(DIAGNOSTIC_TASK_TIMEOUT.to_string()),
            cron_expression: config.cron_expression.clone(),
            spec,
        };

        match get_auto_diagnostic_config(&tx, cluster.id)? {
            None => {
                let task_id = create_cron_job(&tx, &OrgTimezoneResolver, Utc::now(), params)?;
                insert_auto_diagnostic_config(&tx, cluster.id, task_id, config.enabled)?;
                if !config.enabled {
                    pause_cron_job(&tx, task_id)?;
                }
                info!(cluster_id = cluster.id, task_id, "auto diagnostic configured");
            }
            Some(row) => {
                apply_job_toggle(&tx, &row, config.enabled)?;
                set_auto_diagnostic_enabled(&tx, cluster.id, config.enabled)?;
                update_cron_job(&tx, &OrgTimezoneResolver, Utc::now(), row.task_id, params)?;
                info!(
                    cluster_id = cluster.id,
                    task_id = row.task_id,
                    enabled = config.enabled,
                    "auto diagnostic config updated"
                );
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_auto_diagnostic_config(
        &self,
        cluster_id: i64,
        org_id: i64,
    ) -> Result<AutoDiagnosticConfig> {
        let conn = self.conn.lock().unwrap();
        let cluster = store::get_org_cluster(&conn, cluster_id, org_id)?;
        let Some(row) = get_auto_diagnostic_config(&conn, cluster.id)? else {
            return Ok(AutoDiagnosticConfig {
                enabled: false,
                cron_expression: String::new(),
                retention_duration: String::new(),
            });
        };
        let task = get_task(&conn, row.task_id)?;
        let retention = match &task.spec {
            TaskSpec::AutoDiagnostic {
                retention_duration, ..
            } => retention_duration.clone(),
            _ => String::new(),
        };
        Ok(AutoDiagnosticConfig {
            enabled: row.enabled,
            cron_expression: cron_expression_of(&task),
            retention_duration: retention,
        })
    }
}

fn apply_job_toggle(conn: &Connection, row: &JobConfigRow, enabled: bool) -> Result<()> {
    if enabled {
        resume_cron_job(conn, row.task_id)?;
    } else {
        pause_cron_job(conn, row.task_id)?;
    }
    Ok(())
}

fn cron_expression_of(task: &Task) -> String {
    task.attributes
        .cronjob
        .as_ref()
        .map(|c| c.cron_expression.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::store::{create_cluster, create_organization};
    use crate::types::ClusterParams;
    use streamctl_scheduler::{SchedulerError, TaskStatus};

    fn setup() -> (Arc<Mutex<Connection>>, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        streamctl_scheduler::db::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();
        let org = create_organization(&conn, "acme", "UTC").unwrap();
        let cluster = create_cluster(
            &conn,
            &ClusterParams {
                org_id: org,
                name: "primary".into(),
                version: "v2.1.0".into(),
                host: "10.0.0.7".into(),
                meta_port: 5690,
                http_port: 5691,
            },
        )
        .unwrap();
        (Arc::new(Mutex::new(conn)), org, cluster)
    }

    fn backup_config(enabled: bool, cron: &str, retention: &str) -> AutoBackupConfig {
        AutoBackupConfig {
            enabled,
            cron_expression: cron.into(),
            retention_duration: retention.into(),
        }
    }

    #[test]
    fn first_configure_creates_one_cronjob() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(Arc::clone(&conn));

        svc.set_auto_backup_config(cluster, org, &backup_config(true, "0 3 * * *", "3d"))
            .unwrap();

        let got = svc.get_auto_backup_config(cluster, org).unwrap();
        assert!(got.enabled);
        assert_eq!(got.cron_expression, "0 3 * * *");
        assert_eq!(got.retention_duration, "3d");

        let guard = conn.lock().unwrap();
        let row = get_auto_backup_config(&guard, cluster).unwrap().unwrap();
        let task = get_task(&guard, row.task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.attributes.cronjob.is_some());
    }

    #[test]
    fn reconfigure_replaces_the_job_instead_of_stacking() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(Arc::clone(&conn));

        svc.set_auto_backup_config(cluster, org, &backup_config(true, "0 3 * * *", "3d"))
            .unwrap();
        let first = {
            let guard = conn.lock().unwrap();
            get_auto_backup_config(&guard, cluster).unwrap().unwrap().task_id
        };

        svc.set_auto_backup_config(cluster, org, &backup_config(true, "30 4 * * *", "7d"))
            .unwrap();

        let guard = conn.lock().unwrap();
        let row = get_auto_backup_config(&guard, cluster).unwrap().unwrap();
        assert_eq!(row.task_id, first);
        let task = get_task(&guard, row.task_id).unwrap();
        assert_eq!(
            task.attributes.cronjob.as_ref().unwrap().cron_expression,
            "30 4 * * *"
        );
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn disable_pauses_and_reenable_resumes() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(Arc::clone(&conn));

        svc.set_auto_backup_config(cluster, org, &backup_config(true, "0 3 * * *", "3d"))
            .unwrap();
        svc.set_auto_backup_config(cluster, org, &backup_config(false, "0 3 * * *", "3d"))
            .unwrap();

        let task_id = {
            let guard = conn.lock().unwrap();
            let row = get_auto_backup_config(&guard, cluster).unwrap().unwrap();
            assert!(!row.enabled);
            assert_eq!(get_task(&guard, row.task_id).unwrap().status, TaskStatus::Paused);
            row.task_id
        };
        assert!(!svc.get_auto_backup_config(cluster, org).unwrap().enabled);

        svc.set_auto_backup_config(cluster, org, &backup_config(true, "0 3 * * *", "3d"))
            .unwrap();
        let guard = conn.lock().unwrap();
        assert_eq!(get_task(&guard, task_id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn unconfigured_cluster_reads_as_disabled() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(conn);
        let got = svc.get_auto_backup_config(cluster, org).unwrap();
        assert!(!got.enabled);
        assert!(got.cron_expression.is_empty());
    }

    #[test]
    fn invalid_cron_leaves_no_config_behind() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(Arc::clone(&conn));

        let err = svc
            .set_auto_backup_config(cluster, org, &backup_config(true, "not a cron", "3d"))
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Scheduler(SchedulerError::InvalidCronExpression { .. })
        ));

        let guard = conn.lock().unwrap();
        assert!(get_auto_backup_config(&guard, cluster).unwrap().is_none());
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn wrong_tenant_cannot_configure() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(conn);
        let err = svc
            .set_auto_backup_config(cluster, org + 1, &backup_config(true, "0 3 * * *", "3d"))
            .unwrap_err();
        assert!(matches!(err, ClusterError::ClusterNotFound { .. }));
    }

    #[test]
    fn diagnostic_cronjob_carries_default_timeout() {
        let (conn, org, cluster) = setup();
        let svc = ClusterConfigService::new(Arc::clone(&conn));

        svc.set_auto_diagnostic_config(
            cluster,
            org,
            &AutoDiagnosticConfig {
                enabled: true,
                cron_expression: "*/15 * * * *".into(),
                retention_duration: "1d".into(),
            },
        )
        .unwrap();

        let guard = conn.lock().unwrap();
        let row = get_auto_diagnostic_config(&guard, cluster).unwrap().unwrap();
        let task = get_task(&guard, row.task_id).unwrap();
        assert_eq!(task.attributes.timeout.as_deref(), Some("30m"));
        match task.spec {
            TaskSpec::AutoDiagnostic { cluster_id, .. } => assert_eq!(cluster_id, cluster),
            other => panic!("unexpected spec: {other:?}"),
        }
    }
}
