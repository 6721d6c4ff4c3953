use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression does not match the 5-field grammar.
    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    /// The cron expression parses but never fires again.
    #[error("Cron expression {expression:?} has no upcoming fire time")]
    NoUpcomingFire { expression: String },

    /// A duration string (retry interval, timeout) failed validation.
    #[error(transparent)]
    InvalidDuration(#[from] streamctl_core::InvalidDuration),

    /// No task with the given ID exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: i64 },

    /// Task spec or attributes JSON could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp is not valid RFC 3339.
    #[error("Invalid timestamp in store: {0}")]
    InvalidTimestamp(String),

    /// A stored status string is not a known [`crate::types::TaskStatus`].
    #[error("Invalid status in store: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
