use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Scheduler(#[from] streamctl_scheduler::SchedulerError),

    #[error(transparent)]
    InvalidDuration(#[from] streamctl_core::InvalidDuration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cluster not found: {id}")]
    ClusterNotFound { id: i64 },

    #[error("organization not found: {id}")]
    OrganizationNotFound { id: i64 },

    #[error("opaque key not found: {id}")]
    KeyNotFound { id: i64 },

    #[error("diagnostics endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid timestamp in database: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
