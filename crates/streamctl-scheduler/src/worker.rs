use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::watch;
use tracing::{error, info, warn};

use streamctl_core::config::WorkerConfig;
use streamctl_core::parse_duration;

use crate::cron::TimezoneResolver;
use crate::error::Result;
use crate::lifecycle;
use crate::store;
use crate::types::{TaskRow, TaskSpec};

/// Per-task-type business logic, dispatched on the spec variant.
///
/// Implementations run inside the worker's claim transaction
/// (`Transaction` derefs to `Connection`), so any follow-up tasks they
/// push commit atomically with the claim. `timeout` is an advisory
/// deadline for external calls; the worker itself does not preempt.
pub trait TaskHandler: Send + Sync {
    fn handle_task(
        &self,
        conn: &Connection,
        spec: &TaskSpec,
        timeout: StdDuration,
    ) -> anyhow::Result<()>;
}

/// Claims one eligible task per cycle and drives it through
/// pre-hook → dispatch → post-hook inside a single transaction.
///
/// Multiple workers (each with its own connection to the same database)
/// are safe: the immediate-mode transaction takes the write lock before
/// the claim query runs, so two workers never see the same row.
pub struct Worker {
    conn: Arc<Mutex<Connection>>,
    handler: Arc<dyn TaskHandler>,
    timezones: Arc<dyn TimezoneResolver>,
    poll_interval: StdDuration,
    max_task_timeout: StdDuration,
    now: fn() -> DateTime<Utc>,
}

impl Worker {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        handler: Arc<dyn TaskHandler>,
        timezones: Arc<dyn TimezoneResolver>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        let max_task_timeout = parse_duration(&config.max_task_timeout)?;
        Ok(Self {
            conn,
            handler,
            timezones,
            poll_interval: StdDuration::from_secs(config.poll_interval_secs.max(1)),
            max_task_timeout,
            now: Utc::now,
        })
    }

    /// Replace the clock. Test hook.
    pub fn with_now(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Poll loop. Runs until `shutdown` broadcasts `true`.
    ///
    /// Each cycle is synchronous (SQLite plus whatever the executors call
    /// out to), so it runs on the blocking pool rather than the executor.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("task worker started");
        let worker = Arc::new(self);
        let mut interval = tokio::time::interval(worker.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cycle = Arc::clone(&worker);
                    match tokio::task::spawn_blocking(move || cycle.run_once()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(error = %e, "worker cycle failed"),
                        Err(e) => error!(error = %e, "worker cycle panicked"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("task worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One claim cycle. Returns whether a task was claimed.
    ///
    /// The whole cycle — claim, cron advance, dispatch, outcome — lives in
    /// one immediate-mode transaction. External effects inside dispatch
    /// are not transactional with the commit, so the contract for them is
    /// at-least-once; cleanup executors must stay idempotent.
    pub fn run_once(&self) -> Result<bool> {
        let now = (self.now)();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(task) = store::claim_due_task(&tx, now)? else {
            return Ok(false);
        };
        info!(task_id = task.id, "executing task");

        lifecycle::handle_attributes(&tx, &*self.timezones, now, &task)?;

        let timeout = self.task_timeout(&task);
        let outcome = match serde_json::from_str::<TaskSpec>(&task.spec_json) {
            Ok(spec) => self.handler.handle_task(&tx, &spec, timeout),
            Err(e) => Err(anyhow::anyhow!("invalid task spec: {e}")),
        };

        match outcome {
            Ok(()) => {
                lifecycle::handle_completed(&tx, &task)?;
                info!(task_id = task.id, "task completed");
            }
            Err(e) => {
                let text = format!("{e:#}");
                error!(task_id = task.id, error = %text, "task failed");
                lifecycle::handle_failed(&tx, now, &task, &text)?;
            }
        }

        tx.commit()?;
        Ok(true)
    }

    /// Advisory timeout for one task: the attribute value capped by the
    /// configured maximum; the maximum when unset or unparsable.
    fn task_timeout(&self, task: &TaskRow) -> StdDuration {
        match task.attributes.timeout.as_deref() {
            Some(raw) => match parse_duration(raw) {
                Ok(d) => d.min(self.max_task_timeout),
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "bad timeout attribute, using maximum");
                    self.max_task_timeout
                }
            },
            None => self.max_task_timeout,
        }
    }
}
