//! `streamctl-scheduler` — background task engine with SQLite persistence.
//!
//! # Overview
//!
//! Tasks are persisted to a SQLite `tasks` table. A [`worker::Worker`]
//! polls the database, claims at most one eligible task per cycle inside
//! an immediate-mode transaction, advances a cronjob's next fire time
//! *before* running the task body, dispatches to a [`worker::TaskHandler`]
//! implementation, and records the outcome — all committed atomically.
//!
//! # Task shapes
//!
//! | Shape    | Behaviour                                                   |
//! |----------|-------------------------------------------------------------|
//! | One-shot | Runs once; terminates `completed` or `failed`               |
//! | Retrying | One-shot with a retry policy; failure reschedules instead   |
//! | Cronjob  | Recurs per a 5-field cron expression; only pauses/resumes   |
//!
//! Failed executions are appended to an immutable `events` log; a cronjob
//! failure never changes its status because the next occurrence is already
//! scheduled when the body runs.

pub mod cron;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod types;
pub mod worker;

pub use cron::{CronSchedule, TimezoneResolver, UtcResolver};
pub use error::{Result, SchedulerError};
pub use store::{CronJobParams, TaskOptions, TaskStore};
pub use types::{Event, RetryPolicy, Task, TaskAttributes, TaskSpec, TaskStatus};
pub use worker::{TaskHandler, Worker};
