use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant. The timezone drives cron evaluation for every task the
/// tenant owns.
#[derive(Debug, Clone)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

/// An imported streaming-database cluster and the endpoints the control
/// plane talks to: the meta node for backups, the HTTP port for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    pub version: String,
    pub host: String,
    pub meta_port: u16,
    pub http_port: u16,
    pub created_at: DateTime<Utc>,
}

/// Parameters for importing a cluster.
#[derive(Debug, Clone)]
pub struct ClusterParams {
    pub org_id: i64,
    pub name: String,
    pub version: String,
    pub host: String,
    pub meta_port: u16,
    pub http_port: u16,
}

/// A meta-backup snapshot record. `snapshot_id` is assigned by the
/// cluster, not by us, hence the composite key with `cluster_id`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub cluster_id: i64,
    pub snapshot_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A captured diagnostics dump.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub id: i64,
    pub cluster_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Desired state for a cluster's periodic backup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBackupConfig {
    pub enabled: bool,
    #[serde(default)]
    pub cron_expression: String,
    #[serde(default)]
    pub retention_duration: String,
}

/// Desired state for a cluster's periodic diagnostics job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDiagnosticConfig {
    pub enabled: bool,
    #[serde(default)]
    pub cron_expression: String,
    #[serde(default)]
    pub retention_duration: String,
}
