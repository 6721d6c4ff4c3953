//! Per-task-type executors, dispatched on the spec variant.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::info;

use streamctl_core::parse_duration;
use streamctl_scheduler::store::push_task;
use streamctl_scheduler::{TaskHandler, TaskOptions, TaskSpec};

use crate::diag::DiagnosticsFetcher;
use crate::meta::MetaClientManager;
use crate::store;

/// Retry cadence for chained cleanup tasks. Cleanup is idempotent, so
/// hammering a flaky cluster every few minutes is safe.
const CLEANUP_RETRY_INTERVAL: &str = "10m";

pub struct ClusterTaskHandler {
    meta: Arc<dyn MetaClientManager>,
    diagnostics: Arc<dyn DiagnosticsFetcher>,
    now: fn() -> DateTime<Utc>,
}

impl ClusterTaskHandler {
    pub fn new(meta: Arc<dyn MetaClientManager>, diagnostics: Arc<dyn DiagnosticsFetcher>) -> Self {
        Self {
            meta,
            diagnostics,
            now: Utc::now,
        }
    }

    /// Replace the clock. Test hook.
    pub fn with_now(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Back up the cluster's meta store, record the snapshot, and chain a
    /// deletion task for when the retention window closes.
    fn execute_auto_backup(
        &self,
        conn: &Connection,
        cluster_id: i64,
        retention: &str,
        timeout: StdDuration,
    ) -> anyhow::Result<()> {
        let cluster = store::get_cluster(conn, cluster_id).context("failed to get cluster")?;
        let client = self
            .meta
            .connect(&cluster.version, &cluster.host, cluster.meta_port)
            .context("failed to open meta connection")?;
        let snapshot_id = client
            .meta_backup(timeout)
            .context("failed to run meta backup")?;
        info!(cluster_id = cluster.id, snapshot_id, "meta backup finished");

        store::create_snapshot(conn, cluster.id, snapshot_id)
            .context("failed to record snapshot")?;

        let retention = parse_duration(retention).context("failed to parse retention duration")?;
        let task_id = push_task(
            conn,
            &TaskSpec::DeleteSnapshot {
                cluster_id: cluster.id,
                snapshot_id,
            },
            TaskOptions::new()
                .org_id(cluster.org_id)
                .always_retry_on_failure(CLEANUP_RETRY_INTERVAL)
                .started_at((self.now)() + Duration::seconds(retention.as_secs() as i64)),
        )
        .context("failed to schedule snapshot deletion")?;
        info!(
            task_id,
            cluster_id = cluster.id,
            snapshot_id,
            "snapshot deletion scheduled"
        );
        Ok(())
    }

    /// Capture a diagnostics dump and chain its deletion the same way
    /// backups chain theirs.
    fn execute_auto_diagnostic(
        &self,
        conn: &Connection,
        cluster_id: i64,
        retention: &str,
        timeout: StdDuration,
    ) -> anyhow::Result<()> {
        let cluster = store::get_cluster(conn, cluster_id).context("failed to get cluster")?;
        let endpoint = format!("http://{}:{}", cluster.host, cluster.http_port);
        let content = self
            .diagnostics
            .fetch(&endpoint, timeout)
            .context("failed to fetch diagnostics")?;
        let diagnostic_id = store::create_diagnostic(conn, cluster.id, &content)
            .context("failed to record diagnostic")?;
        info!(cluster_id = cluster.id, diagnostic_id, "diagnostic captured");

        let retention = parse_duration(retention).context("failed to parse retention duration")?;
        let task_id = push_task(
            conn,
            &TaskSpec::DeleteClusterDiagnostic {
                cluster_id: cluster.id,
                diagnostic_id,
            },
            TaskOptions::new()
                .org_id(cluster.org_id)
                .always_retry_on_failure(CLEANUP_RETRY_INTERVAL)
                .started_at((self.now)() + Duration::seconds(retention.as_secs() as i64)),
        )
        .context("failed to schedule diagnostic deletion")?;
        info!(
            task_id,
            cluster_id = cluster.id,
            diagnostic_id,
            "diagnostic deletion scheduled"
        );
        Ok(())
    }

    fn execute_delete_snapshot(
        &self,
        conn: &Connection,
        cluster_id: i64,
        snapshot_id: i64,
        timeout: StdDuration,
    ) -> anyhow::Result<()> {
        let cluster = store::get_cluster(conn, cluster_id).context("failed to get cluster")?;
        let client = self
            .meta
            .connect(&cluster.version, &cluster.host, cluster.meta_port)
            .context("failed to open meta connection")?;
        client
            .delete_snapshot(snapshot_id, timeout)
            .with_context(|| format!("failed to delete snapshot {snapshot_id} on cluster"))?;

        if !store::delete_snapshot(conn, cluster.id, snapshot_id)? {
            info!(cluster_id, snapshot_id, "snapshot record already absent");
        }
        Ok(())
    }

    fn execute_delete_diagnostic(&self, conn: &Connection, diagnostic_id: i64) -> anyhow::Result<()> {
        if !store::delete_diagnostic(conn, diagnostic_id)? {
            info!(diagnostic_id, "diagnostic already absent, skipping delete");
        }
        Ok(())
    }

    fn execute_delete_opaque_key(&self, conn: &Connection, key_id: i64) -> anyhow::Result<()> {
        if !store::delete_opaque_key(conn, key_id)? {
            info!(key_id, "opaque key already absent, skipping delete");
        }
        Ok(())
    }
}

impl TaskHandler for ClusterTaskHandler {
    fn handle_task(
        &self,
        conn: &Connection,
        spec: &TaskSpec,
        timeout: StdDuration,
    ) -> anyhow::Result<()> {
        match spec {
            TaskSpec::AutoBackup {
                cluster_id,
                retention_duration,
            } => self.execute_auto_backup(conn, *cluster_id, retention_duration, timeout),
            TaskSpec::AutoDiagnostic {
                cluster_id,
                retention_duration,
            } => self.execute_auto_diagnostic(conn, *cluster_id, retention_duration, timeout),
            TaskSpec::DeleteSnapshot {
                cluster_id,
                snapshot_id,
            } => self.execute_delete_snapshot(conn, *cluster_id, *snapshot_id, timeout),
            TaskSpec::DeleteClusterDiagnostic { diagnostic_id, .. } => {
                self.execute_delete_diagnostic(conn, *diagnostic_id)
            }
            TaskSpec::DeleteOpaqueKey { key_id } => self.execute_delete_opaque_key(conn, *key_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetaClient;
    use crate::store::{
        create_cluster, create_diagnostic, create_opaque_key, create_organization,
        create_snapshot, get_diagnostic, get_opaque_key, list_snapshots,
    };
    use crate::types::ClusterParams;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use streamctl_scheduler::store::{claim_due_task, get_task};
    use streamctl_scheduler::types::TaskStatus;

    const TIMEOUT: StdDuration = StdDuration::from_secs(60);

    #[derive(Default)]
    struct MetaCalls {
        backups: usize,
        deleted: Vec<i64>,
    }

    struct FakeMeta {
        next_snapshot_id: i64,
        fail: bool,
        calls: Arc<Mutex<MetaCalls>>,
    }

    impl MetaClient for FakeMeta {
        fn meta_backup(&self, _timeout: StdDuration) -> anyhow::Result<i64> {
            if self.fail {
                anyhow::bail!("meta node unreachable");
            }
            self.calls.lock().unwrap().backups += 1;
            Ok(self.next_snapshot_id)
        }

        fn delete_snapshot(&self, snapshot_id: i64, _timeout: StdDuration) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("meta node unreachable");
            }
            self.calls.lock().unwrap().deleted.push(snapshot_id);
            Ok(())
        }
    }

    struct FakeMetaManager {
        next_snapshot_id: i64,
        fail: bool,
        calls: Arc<Mutex<MetaCalls>>,
    }

    impl FakeMetaManager {
        fn returning(next_snapshot_id: i64) -> Self {
            Self {
                next_snapshot_id,
                fail: false,
                calls: Arc::default(),
            }
        }

        fn unreachable() -> Self {
            Self {
                next_snapshot_id: 0,
                fail: true,
                calls: Arc::default(),
            }
        }
    }

    impl MetaClientManager for FakeMetaManager {
        fn connect(
            &self,
            _version: &str,
            _host: &str,
            _port: u16,
        ) -> anyhow::Result<Box<dyn MetaClient>> {
            Ok(Box::new(FakeMeta {
                next_snapshot_id: self.next_snapshot_id,
                fail: self.fail,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    struct FakeDiagnostics {
        content: &'static str,
    }

    impl DiagnosticsFetcher for FakeDiagnostics {
        fn fetch(&self, _endpoint: &str, _timeout: StdDuration) -> anyhow::Result<String> {
            Ok(self.content.to_string())
        }
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        streamctl_scheduler::db::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();
        conn
    }

    fn sample_cluster(conn: &Connection) -> (i64, i64) {
        let org = create_organization(conn, "acme", "UTC").unwrap();
        let cluster = create_cluster(
            conn,
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
        (org, cluster)
    }

    fn handler(meta: FakeMetaManager) -> ClusterTaskHandler {
        ClusterTaskHandler::new(
            Arc::new(meta),
            Arc::new(FakeDiagnostics { content: "{}" }),
        )
        .with_now(|| Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn auto_backup_records_snapshot_and_chains_deletion() {
        let conn = conn();
        let (org, cluster) = sample_cluster(&conn);

        let h = handler(FakeMetaManager::returning(42));
        h.handle_task(
            &conn,
            &TaskSpec::AutoBackup {
                cluster_id: cluster,
                retention_duration: "3d".into(),
            },
            TIMEOUT,
        )
        .unwrap();

        let snapshots = list_snapshots(&conn, cluster).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].snapshot_id, 42);

        // the chained deletion fires when the retention window closes
        let due = Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap();
        assert!(claim_due_task(&conn, due - Duration::seconds(1))
            .unwrap()
            .is_none());
        let chained = claim_due_task(&conn, due).unwrap().unwrap();
        let task = get_task(&conn, chained.id).unwrap();
        assert_eq!(task.org_id, Some(org));
        assert_eq!(
            task.spec,
            TaskSpec::DeleteSnapshot {
                cluster_id: cluster,
                snapshot_id: 42
            }
        );
        let retry = task.attributes.retry_policy.unwrap();
        assert!(retry.always_retry_on_failure);
        assert_eq!(retry.interval, "10m");
    }

    #[test]
    fn auto_backup_fails_when_meta_is_unreachable() {
        let conn = conn();
        let (_org, cluster) = sample_cluster(&conn);

        let h = handler(FakeMetaManager::unreachable());
        let err = h
            .handle_task(
                &conn,
                &TaskSpec::AutoBackup {
                    cluster_id: cluster,
                    retention_duration: "3d".into(),
                },
                TIMEOUT,
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("meta node unreachable"));
        assert!(list_snapshots(&conn, cluster).unwrap().is_empty());
    }

    #[test]
    fn auto_diagnostic_records_dump_and_chains_deletion() {
        let conn = conn();
        let (_org, cluster) = sample_cluster(&conn);

        let h = handler(FakeMetaManager::returning(1));
        h.handle_task(
            &conn,
            &TaskSpec::AutoDiagnostic {
                cluster_id: cluster,
                retention_duration: "1d".into(),
            },
            TIMEOUT,
        )
        .unwrap();

        let due = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let chained = claim_due_task(&conn, due).unwrap().unwrap();
        let task = get_task(&conn, chained.id).unwrap();
        match task.spec {
            TaskSpec::DeleteClusterDiagnostic { diagnostic_id, .. } => {
                let diag = get_diagnostic(&conn, diagnostic_id).unwrap().unwrap();
                assert_eq!(diag.content, "{}");
            }
            other => panic!("unexpected chained spec: {other:?}"),
        }
    }

    #[test]
    fn delete_snapshot_removes_cluster_side_then_record() {
        let conn = conn();
        let (_org, cluster) = sample_cluster(&conn);
        create_snapshot(&conn, cluster, 7).unwrap();

        let meta = FakeMetaManager::returning(0);
        let calls = Arc::clone(&meta.calls);
        let h = handler(meta);
        h.handle_task(
            &conn,
            &TaskSpec::DeleteSnapshot {
                cluster_id: cluster,
                snapshot_id: 7,
            },
            TIMEOUT,
        )
        .unwrap();

        assert_eq!(calls.lock().unwrap().deleted, vec![7]);
        assert!(list_snapshots(&conn, cluster).unwrap().is_empty());
    }

    #[test]
    fn cleanup_executors_treat_absent_records_as_success() {
        let conn = conn();
        let (_org, cluster) = sample_cluster(&conn);

        let h = handler(FakeMetaManager::returning(0));
        // no snapshot record, no diagnostic, no key: all succeed
        h.handle_task(
            &conn,
            &TaskSpec::DeleteSnapshot {
                cluster_id: cluster,
                snapshot_id: 99,
            },
            TIMEOUT,
        )
        .unwrap();
        h.handle_task(
            &conn,
            &TaskSpec::DeleteClusterDiagnostic {
                cluster_id: cluster,
                diagnostic_id: 99,
            },
            TIMEOUT,
        )
        .unwrap();
        h.handle_task(&conn, &TaskSpec::DeleteOpaqueKey { key_id: 99 }, TIMEOUT)
            .unwrap();
    }

    #[test]
    fn delete_executors_remove_existing_records() {
        let conn = conn();
        let (_org, cluster) = sample_cluster(&conn);
        let diag_id = create_diagnostic(&conn, cluster, "dump").unwrap();
        let key_id = create_opaque_key(&conn, b"secret").unwrap();

        let h = handler(FakeMetaManager::returning(0));
        h.handle_task(
            &conn,
            &TaskSpec::DeleteClusterDiagnostic {
                cluster_id: cluster,
                diagnostic_id: diag_id,
            },
            TIMEOUT,
        )
        .unwrap();
        h.handle_task(&conn, &TaskSpec::DeleteOpaqueKey { key_id }, TIMEOUT)
            .unwrap();

        assert!(get_diagnostic(&conn, diag_id).unwrap().is_none());
        assert!(get_opaque_key(&conn, key_id).is_err());
    }

    #[test]
    fn one_shot_statuses_settle_after_chained_claim() {
        // claimed chained tasks go back through the scheduler; sanity-check
        // the claimed row is the pending deletion
        let conn = conn();
        let (_org, cluster) = sample_cluster(&conn);

        let h = handler(FakeMetaManager::returning(9));
        h.handle_task(
            &conn,
            &TaskSpec::AutoBackup {
                cluster_id: cluster,
                retention_duration: "1h".into(),
            },
            TIMEOUT,
        )
        .unwrap();

        let due = Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap();
        let chained = claim_due_task(&conn, due).unwrap().unwrap();
        assert_eq!(chained.status, TaskStatus::Pending);
    }
}
