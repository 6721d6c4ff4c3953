use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed payload of a task — exactly one variant per task type, each
/// carrying only its own fields. The wire tag lives in `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskSpec {
    /// Trigger a metadata backup of a cluster and schedule deletion of the
    /// resulting snapshot after the retention duration.
    AutoBackup {
        cluster_id: i64,
        retention_duration: String,
    },

    /// Fetch a diagnostic dump from a cluster and schedule its cleanup.
    AutoDiagnostic {
        cluster_id: i64,
        retention_duration: String,
    },

    /// Delete a snapshot on the cluster, then its record.
    DeleteSnapshot { cluster_id: i64, snapshot_id: i64 },

    /// Delete a stored diagnostic dump record.
    DeleteClusterDiagnostic { cluster_id: i64, diagnostic_id: i64 },

    /// Delete an expired opaque credential key record.
    DeleteOpaqueKey { key_id: i64 },
}

impl TaskSpec {
    /// Wire tag of the variant, as stored in the `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskSpec::AutoBackup { .. } => "auto-backup",
            TaskSpec::AutoDiagnostic { .. } => "auto-diagnostic",
            TaskSpec::DeleteSnapshot { .. } => "delete-snapshot",
            TaskSpec::DeleteClusterDiagnostic { .. } => "delete-cluster-diagnostic",
            TaskSpec::DeleteOpaqueKey { .. } => "delete-opaque-key",
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Eligible for claim once `started_at` arrives.
    Pending,
    /// Cronjob suspended by its owner; never claimed.
    Paused,
    /// One-shot task whose execution failed without a retry policy.
    Failed,
    /// One-shot task that ran to completion.
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Paused => "paused",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "paused" => Ok(TaskStatus::Paused),
            "failed" => Ok(TaskStatus::Failed),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Recurrence declaration for a cronjob task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cronjob {
    /// 5-field cron expression (minute hour day-of-month month day-of-week).
    pub cron_expression: String,
}

/// Opt-in retry behaviour for one-shot tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub always_retry_on_failure: bool,
    /// Delay before the rescheduled attempt, e.g. "30m".
    pub interval: String,
}

/// Out-of-band task metadata, independent of the effect payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttributes {
    /// Owning tenant; `None` marks a system-level task.
    #[serde(default)]
    pub org_id: Option<i64>,
    #[serde(default)]
    pub cronjob: Option<Cronjob>,
    /// Advisory per-task timeout as a duration string.
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

/// A fully decoded task record.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub org_id: Option<i64>,
    pub spec: TaskSpec,
    pub attributes: TaskAttributes,
    pub status: TaskStatus,
    /// Next-eligible instant, not an execution log. Advanced on every cron
    /// cycle and on retry rescheduling.
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A claimed task row. The spec is kept as raw JSON so an undecodable
/// payload surfaces as a dispatch failure for that one run instead of
/// poisoning the claim query.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub org_id: Option<i64>,
    pub spec_json: String,
    pub attributes: TaskAttributes,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    /// Whether this task recurs on a cron schedule.
    pub fn is_cronjob(&self) -> bool {
        self.attributes.cronjob.is_some()
    }
}

/// Append-only record of one failed task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub task_id: i64,
    pub error: String,
    pub created_at: DateTime<Utc>,
}
